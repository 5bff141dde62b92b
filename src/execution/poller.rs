use crate::api::{CandleQuery, Endpoint, FetchError, MarketDataSource, RateLimits};
use crate::config::PollerConfig;
use crate::models::{Candle, Snapshot};
use crate::shutdown::Shutdown;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// What the poller hands to the orchestration loop
#[derive(Debug, Clone)]
pub enum PollerEvent {
    Snapshots(Vec<Snapshot>),
    Candles {
        instrument: String,
        candles: Vec<Candle>,
    },
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub snapshot_interval: Duration,
    /// `None` disables candle polling
    pub candle_interval: Option<Duration>,
    pub candle_query: CandleQuery,
    pub backoff: Duration,
    pub quote_prefix: String,
}

impl From<&PollerConfig> for PollerSettings {
    fn from(config: &PollerConfig) -> Self {
        Self {
            snapshot_interval: config.snapshot_interval(),
            candle_interval: config.candle_interval(),
            candle_query: CandleQuery {
                unit: config.candle_unit(),
                count: config.candle_count,
                to: None,
            },
            backoff: config.backoff(),
            quote_prefix: config.quote_prefix.clone(),
        }
    }
}

/// Timer-driven, rate-limited fetch loops
///
/// Snapshots and candles are polled by separate tasks that share the rate
/// limits and the event channel, so a long candle sweep never delays the
/// snapshot cadence.
pub struct Poller<S> {
    source: Arc<S>,
    limits: Arc<RateLimits>,
    settings: PollerSettings,
    tx: mpsc::Sender<PollerEvent>,
}

enum Flow {
    Continue,
    Stop,
}

impl<S: MarketDataSource + 'static> Poller<S> {
    pub fn new(
        source: Arc<S>,
        limits: Arc<RateLimits>,
        settings: PollerSettings,
        tx: mpsc::Sender<PollerEvent>,
    ) -> Self {
        Self {
            source,
            limits,
            settings,
            tx,
        }
    }

    /// Poll until cancelled; every sender is dropped on return
    pub async fn run(self, shutdown: Shutdown) {
        let (instruments_tx, instruments_rx) = watch::channel(Vec::new());

        let candle_task = self.settings.candle_interval.map(|every| {
            let candles = CandleLoop {
                source: Arc::clone(&self.source),
                limits: Arc::clone(&self.limits),
                query: self.settings.candle_query.clone(),
                every,
                backoff: self.settings.backoff,
                tx: self.tx.clone(),
                instruments: instruments_rx,
            };
            tokio::spawn(candles.run(shutdown.clone()))
        });

        tracing::info!(
            interval_ms = self.settings.snapshot_interval.as_millis() as u64,
            candles = candle_task.is_some(),
            "Poller started"
        );

        let snapshots = SnapshotLoop {
            source: self.source,
            limits: self.limits,
            settings: self.settings,
            tx: self.tx,
            instruments: instruments_tx,
        };
        snapshots.run(&shutdown).await;

        if let Some(task) = candle_task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Candle poller failed");
            }
        }

        tracing::info!("Poller stopped");
    }
}

struct SnapshotLoop<S> {
    source: Arc<S>,
    limits: Arc<RateLimits>,
    settings: PollerSettings,
    tx: mpsc::Sender<PollerEvent>,
    /// Latest filtered instrument list, read by the candle loop
    instruments: watch::Sender<Vec<String>>,
}

impl<S: MarketDataSource> SnapshotLoop<S> {
    async fn run(self, shutdown: &Shutdown) {
        let mut timer = interval(self.settings.snapshot_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let flow = match self.fetch(shutdown).await {
                Ok(batch) => {
                    tracing::debug!(count = batch.len(), "Fetched snapshots");
                    emit(&self.tx, PollerEvent::Snapshots(batch), shutdown).await
                }
                Err(e) => handle_error("snapshots", e, self.settings.backoff, shutdown).await,
            };
            if let Flow::Stop = flow {
                break;
            }
        }
    }

    async fn fetch(&self, shutdown: &Shutdown) -> Result<Vec<Snapshot>, FetchError> {
        acquire(&self.limits, Endpoint::Market, shutdown).await?;
        let markets = self.source.list_instruments().await?;

        let instruments: Vec<String> = markets
            .into_iter()
            .map(|m| m.market)
            .filter(|m| m.starts_with(&self.settings.quote_prefix))
            .collect();
        self.instruments.send_replace(instruments.clone());

        acquire(&self.limits, Endpoint::Ticker, shutdown).await?;
        self.source.snapshots(&instruments).await
    }
}

struct CandleLoop<S> {
    source: Arc<S>,
    limits: Arc<RateLimits>,
    query: CandleQuery,
    every: Duration,
    backoff: Duration,
    tx: mpsc::Sender<PollerEvent>,
    instruments: watch::Receiver<Vec<String>>,
}

impl<S: MarketDataSource> CandleLoop<S> {
    async fn run(self, shutdown: Shutdown) {
        let mut timer = interval(self.every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.tx.closed() => break,
                _ = timer.tick() => {}
            }

            if let Flow::Stop = self.sweep(&shutdown).await {
                break;
            }
        }
    }

    /// One candle request per instrument from the latest list
    async fn sweep(&self, shutdown: &Shutdown) -> Flow {
        let instruments = self.instruments.borrow().clone();
        for instrument in instruments {
            let result = async {
                acquire(&self.limits, Endpoint::Candles, shutdown).await?;
                self.source.candles(&instrument, &self.query).await
            }
            .await;

            let flow = match result {
                Ok(candles) => {
                    emit(&self.tx, PollerEvent::Candles { instrument, candles }, shutdown).await
                }
                Err(e) => handle_error("candles", e, self.backoff, shutdown).await,
            };
            if let Flow::Stop = flow {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}

async fn acquire(
    limits: &RateLimits,
    endpoint: Endpoint,
    shutdown: &Shutdown,
) -> Result<(), FetchError> {
    limits
        .acquire(endpoint, shutdown)
        .await
        .map_err(|_| FetchError::Cancelled)
}

/// Blocks while the consumer is behind
async fn emit(tx: &mpsc::Sender<PollerEvent>, event: PollerEvent, shutdown: &Shutdown) -> Flow {
    tokio::select! {
        sent = tx.send(event) => match sent {
            Ok(()) => Flow::Continue,
            Err(_) => {
                tracing::info!("Event consumer gone, stopping poller");
                Flow::Stop
            }
        },
        _ = shutdown.cancelled() => Flow::Stop,
    }
}

async fn handle_error(what: &str, error: FetchError, backoff: Duration, shutdown: &Shutdown) -> Flow {
    match error {
        FetchError::Cancelled => Flow::Stop,
        e if e.is_transient() => {
            tracing::warn!(
                error = %e,
                backoff_ms = backoff.as_millis() as u64,
                "Failed to fetch {}, backing off",
                what
            );
            if shutdown.sleep(backoff).await {
                Flow::Continue
            } else {
                Flow::Stop
            }
        }
        e => {
            tracing::error!(error = %e, "Skipping {} cycle", what);
            Flow::Continue
        }
    }
}

/// Start a poller task and return the receiving end of its event channel
pub fn spawn_poller<S: MarketDataSource + 'static>(
    source: Arc<S>,
    limits: Arc<RateLimits>,
    settings: PollerSettings,
    channel_capacity: usize,
    shutdown: Shutdown,
) -> (mpsc::Receiver<PollerEvent>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));
    let poller = Poller::new(source, limits, settings, tx);
    let task = tokio::spawn(poller.run(shutdown));
    (rx, task)
}
