use tokio::sync::watch;
use tokio::time::Duration;

/// Cooperative cancellation signal shared by every long-running task
///
/// Cloning is cheap; all clones observe the same trigger.
#[derive(Clone, Debug)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Fires the associated [`Shutdown`] signal
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the trigger fired (or was dropped)
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means the trigger is gone, which is as final as a cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleep for `duration`; returns `false` if cancelled first
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

impl ShutdownTrigger {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}
