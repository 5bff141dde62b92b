use crate::models::Side;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::shutdown::Shutdown;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WalletError {
    #[error("insufficient funds for {instrument}: need {required}, have {available}")]
    InsufficientFunds {
        instrument: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("no open position for {0}")]
    NoPosition(String),

    #[error("invalid order for {instrument}: {reason}")]
    InvalidOrder { instrument: String, reason: String },

    #[error("wallet actor is not running")]
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub instrument: String,
    pub quantity: Decimal,
    pub acquisition_price: Decimal,
    pub acquired_at: DateTime<Utc>,
}

impl Position {
    pub fn acquisition_price_f64(&self) -> f64 {
        self.acquisition_price.to_f64().unwrap_or(0.0)
    }
}

/// Receipt for an applied buy or sell
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub id: Uuid,
    pub instrument: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub balance_after: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Cash balance plus at most one open position per instrument
///
/// Plain state with synchronous operations. In the running engine it is
/// owned by [`WalletActor`] and only reachable through a [`WalletHandle`].
#[derive(Debug, Clone)]
pub struct Wallet {
    balance: Decimal,
    fee_rate: Decimal,
    positions: HashMap<String, Position>,
}

impl Wallet {
    pub fn new(balance: Decimal, fee_rate: Decimal) -> Self {
        Self {
            balance,
            fee_rate,
            positions: HashMap::new(),
        }
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn fee_rate(&self) -> Decimal {
        self.fee_rate
    }

    pub fn position(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    /// Open (or replace) the position for `instrument`
    ///
    /// Deducts `price * quantity` plus the fee. Leaves the wallet untouched
    /// on error.
    pub fn buy(
        &mut self,
        instrument: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Fill, WalletError> {
        validate(instrument, quantity, "quantity")?;
        validate(instrument, price, "price")?;

        let cost = price * quantity;
        let fee = cost * self.fee_rate;
        let required = cost + fee;

        if self.balance < required {
            return Err(WalletError::InsufficientFunds {
                instrument: instrument.to_string(),
                required,
                available: self.balance,
            });
        }

        let now = Utc::now();
        self.balance -= required;
        self.positions.insert(
            instrument.to_string(),
            Position {
                instrument: instrument.to_string(),
                quantity,
                acquisition_price: price,
                acquired_at: now,
            },
        );

        Ok(Fill {
            id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            side: Side::Buy,
            quantity,
            price,
            fee,
            balance_after: self.balance,
            timestamp: now,
        })
    }

    /// Close the whole position for `instrument` at `price`
    pub fn sell(&mut self, instrument: &str, price: Decimal) -> Result<Fill, WalletError> {
        if !self.positions.contains_key(instrument) {
            return Err(WalletError::NoPosition(instrument.to_string()));
        }
        validate(instrument, price, "price")?;

        let position = self
            .positions
            .remove(instrument)
            .ok_or_else(|| WalletError::NoPosition(instrument.to_string()))?;

        let proceeds = price * position.quantity;
        let fee = proceeds * self.fee_rate;
        self.balance += proceeds - fee;

        Ok(Fill {
            id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            side: Side::Sell,
            quantity: position.quantity,
            price,
            fee,
            balance_after: self.balance,
            timestamp: Utc::now(),
        })
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            balance: self.balance,
            positions: self.positions.clone(),
        }
    }
}

fn validate(instrument: &str, value: Decimal, what: &str) -> Result<(), WalletError> {
    if value <= Decimal::ZERO {
        return Err(WalletError::InvalidOrder {
            instrument: instrument.to_string(),
            reason: format!("{} must be positive, got {}", what, value),
        });
    }
    Ok(())
}

/// Point-in-time copy of the wallet for readers outside the actor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletSnapshot {
    pub balance: Decimal,
    pub positions: HashMap<String, Position>,
}

impl WalletSnapshot {
    pub fn has_position(&self, instrument: &str) -> bool {
        self.positions.contains_key(instrument)
    }

    pub fn position(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    /// Value every position at the given last prices
    ///
    /// Instruments without a known last price are valued at acquisition.
    pub fn summary(&self, last_prices: &HashMap<String, f64>) -> WalletSummary {
        let mut positions: Vec<PositionValue> = self
            .positions
            .values()
            .map(|p| {
                let last_price = last_prices
                    .get(&p.instrument)
                    .and_then(|&price| Decimal::from_f64(price))
                    .unwrap_or(p.acquisition_price);
                PositionValue {
                    instrument: p.instrument.clone(),
                    quantity: p.quantity,
                    acquisition_price: p.acquisition_price,
                    last_price,
                    value: p.quantity * last_price,
                }
            })
            .collect();
        positions.sort_by(|a, b| a.instrument.cmp(&b.instrument));

        let total = self.balance + positions.iter().map(|p| p.value).sum::<Decimal>();

        WalletSummary {
            balance: self.balance,
            positions,
            total,
            taken_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionValue {
    pub instrument: String,
    pub quantity: Decimal,
    pub acquisition_price: Decimal,
    pub last_price: Decimal,
    pub value: Decimal,
}

/// Balance, per-position value and total
#[derive(Debug, Clone, PartialEq)]
pub struct WalletSummary {
    pub balance: Decimal,
    pub positions: Vec<PositionValue>,
    pub total: Decimal,
    pub taken_at: DateTime<Utc>,
}

impl fmt::Display for WalletSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(66);
        writeln!(f, "{}", rule)?;
        writeln!(
            f,
            " Wallet Summary [{}]",
            self.taken_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "- Balance: {:.2}", self.balance)?;
        for p in &self.positions {
            writeln!(
                f,
                "- {} Value: {:.2} (Qty: {}, Buy: {}, Cur: {})",
                p.instrument, p.value, p.quantity, p.acquisition_price, p.last_price
            )?;
        }
        writeln!(f, "{}", rule)?;
        write!(f, " Total: {:.2}", self.total)
    }
}

enum WalletCommand {
    Buy {
        instrument: String,
        quantity: Decimal,
        price: Decimal,
        reply: oneshot::Sender<Result<Fill, WalletError>>,
    },
    Sell {
        instrument: String,
        price: Decimal,
        reply: oneshot::Sender<Result<Fill, WalletError>>,
    },
    Snapshot {
        reply: oneshot::Sender<WalletSnapshot>,
    },
}

/// Reply for a submitted buy/sell; resolves once the actor applied it
#[must_use = "the order is queued but its outcome is only known after wait()"]
pub struct PendingFill {
    rx: oneshot::Receiver<Result<Fill, WalletError>>,
}

impl PendingFill {
    pub async fn wait(self) -> Result<Fill, WalletError> {
        self.rx.await.unwrap_or(Err(WalletError::Closed))
    }
}

/// Cloneable entry point to the wallet actor's inbox
///
/// Messages are applied strictly in the order they enter the inbox.
#[derive(Clone)]
pub struct WalletHandle {
    tx: mpsc::Sender<WalletCommand>,
}

impl WalletHandle {
    /// Queue a buy; the queue position is fixed once this returns
    pub async fn submit_buy(
        &self,
        instrument: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<PendingFill, WalletError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WalletCommand::Buy {
                instrument: instrument.to_string(),
                quantity,
                price,
                reply,
            })
            .await
            .map_err(|_| WalletError::Closed)?;
        Ok(PendingFill { rx })
    }

    pub async fn submit_sell(
        &self,
        instrument: &str,
        price: Decimal,
    ) -> Result<PendingFill, WalletError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WalletCommand::Sell {
                instrument: instrument.to_string(),
                price,
                reply,
            })
            .await
            .map_err(|_| WalletError::Closed)?;
        Ok(PendingFill { rx })
    }

    pub async fn buy(
        &self,
        instrument: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Fill, WalletError> {
        self.submit_buy(instrument, quantity, price).await?.wait().await
    }

    pub async fn sell(&self, instrument: &str, price: Decimal) -> Result<Fill, WalletError> {
        self.submit_sell(instrument, price).await?.wait().await
    }

    pub async fn snapshot(&self) -> Result<WalletSnapshot, WalletError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WalletCommand::Snapshot { reply })
            .await
            .map_err(|_| WalletError::Closed)?;
        rx.await.map_err(|_| WalletError::Closed)
    }

    pub async fn summary(
        &self,
        last_prices: &HashMap<String, f64>,
    ) -> Result<WalletSummary, WalletError> {
        Ok(self.snapshot().await?.summary(last_prices))
    }
}

/// Single consumer of the wallet inbox
pub struct WalletActor {
    wallet: Wallet,
    inbox: mpsc::Receiver<WalletCommand>,
}

impl WalletActor {
    pub fn new(wallet: Wallet, inbox_capacity: usize) -> (Self, WalletHandle) {
        let (tx, inbox) = mpsc::channel(inbox_capacity.max(1));
        (Self { wallet, inbox }, WalletHandle { tx })
    }

    /// Process messages one at a time until shutdown or all handles drop
    pub async fn run(mut self, shutdown: Shutdown) -> Wallet {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("Wallet actor stopping (shutdown)");
                    break;
                }
                command = self.inbox.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        tracing::info!("Wallet actor stopping (all handles dropped)");
                        break;
                    }
                },
            }
        }
        self.wallet
    }

    fn handle(&mut self, command: WalletCommand) {
        match command {
            WalletCommand::Buy {
                instrument,
                quantity,
                price,
                reply,
            } => {
                let result = self.wallet.buy(&instrument, quantity, price);
                match &result {
                    Ok(fill) => tracing::info!(
                        instrument = %instrument,
                        quantity = %fill.quantity,
                        price = %fill.price,
                        fee = %fill.fee,
                        balance = %fill.balance_after,
                        "Bought"
                    ),
                    Err(e) => tracing::debug!(instrument = %instrument, error = %e, "Buy rejected"),
                }
                // Caller may have given up waiting
                let _ = reply.send(result);
            }
            WalletCommand::Sell {
                instrument,
                price,
                reply,
            } => {
                let result = self.wallet.sell(&instrument, price);
                match &result {
                    Ok(fill) => tracing::info!(
                        instrument = %instrument,
                        quantity = %fill.quantity,
                        price = %fill.price,
                        fee = %fill.fee,
                        balance = %fill.balance_after,
                        "Sold"
                    ),
                    Err(e) => tracing::debug!(instrument = %instrument, error = %e, "Sell rejected"),
                }
                let _ = reply.send(result);
            }
            WalletCommand::Snapshot { reply } => {
                let _ = reply.send(self.wallet.snapshot());
            }
        }
    }
}

/// Start the actor on the runtime; the join handle yields the final wallet
pub fn spawn_wallet(
    wallet: Wallet,
    inbox_capacity: usize,
    shutdown: Shutdown,
) -> (WalletHandle, JoinHandle<Wallet>) {
    let (actor, handle) = WalletActor::new(wallet, inbox_capacity);
    let task = tokio::spawn(actor.run(shutdown));
    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    fn wallet() -> Wallet {
        Wallet::new(dec!(1000000), dec!(0.0005))
    }

    #[test]
    fn test_buy_then_sell_scenario() {
        let mut w = wallet();

        let fill = w.buy("X", dec!(1), dec!(100000)).unwrap();
        assert_eq!(fill.fee, dec!(50));
        assert_eq!(w.balance(), dec!(899950));
        assert_eq!(w.position("X").unwrap().acquisition_price, dec!(100000));

        let fill = w.sell("X", dec!(110000)).unwrap();
        assert_eq!(fill.fee, dec!(55));
        assert_eq!(w.balance(), dec!(999895));
        assert!(w.position("X").is_none());
    }

    #[test]
    fn test_insufficient_funds_leaves_wallet_unchanged() {
        let mut w = Wallet::new(dec!(100000), dec!(0.0005));

        // 100_000 + 50 fee > 100_000
        let err = w.buy("X", dec!(1), dec!(100000)).unwrap_err();
        assert_eq!(
            err,
            WalletError::InsufficientFunds {
                instrument: "X".to_string(),
                required: dec!(100050),
                available: dec!(100000),
            }
        );
        assert_eq!(w.balance(), dec!(100000));
        assert!(w.positions().is_empty());
    }

    #[test]
    fn test_sell_without_position() {
        let mut w = wallet();
        w.buy("Y", dec!(2), dec!(1000)).unwrap();
        let before = w.snapshot();

        let err = w.sell("X", dec!(1000)).unwrap_err();
        assert_eq!(err, WalletError::NoPosition("X".to_string()));
        assert_eq!(w.snapshot(), before);
    }

    #[test]
    fn test_missing_position_reported_before_bad_price() {
        let mut w = wallet();
        w.buy("Y", dec!(2), dec!(1000)).unwrap();
        let before = w.snapshot();

        assert_eq!(
            w.sell("X", dec!(0)).unwrap_err(),
            WalletError::NoPosition("X".to_string())
        );
        // A held instrument with a bad price is an invalid order and stays held
        assert!(matches!(
            w.sell("Y", dec!(-1)),
            Err(WalletError::InvalidOrder { .. })
        ));
        assert_eq!(w.snapshot(), before);
    }

    #[test]
    fn test_invalid_order_rejected() {
        let mut w = wallet();
        assert!(matches!(
            w.buy("X", dec!(0), dec!(100)),
            Err(WalletError::InvalidOrder { .. })
        ));
        assert!(matches!(
            w.buy("X", dec!(1), dec!(-5)),
            Err(WalletError::InvalidOrder { .. })
        ));
        assert_eq!(w.balance(), dec!(1000000));
    }

    #[test]
    fn test_rebuy_overwrites_position() {
        let mut w = wallet();
        w.buy("X", dec!(1), dec!(100)).unwrap();
        w.buy("X", dec!(3), dec!(120)).unwrap();

        assert_eq!(w.positions().len(), 1);
        let p = w.position("X").unwrap();
        assert_eq!(p.quantity, dec!(3));
        assert_eq!(p.acquisition_price, dec!(120));
    }

    #[test]
    fn test_summary_values_positions() {
        let mut w = wallet();
        w.buy("KRW-BTC", dec!(2), dec!(1000)).unwrap();
        w.buy("KRW-ETH", dec!(1), dec!(500)).unwrap();

        let mut last = HashMap::new();
        last.insert("KRW-BTC".to_string(), 1_500.0);

        let summary = w.snapshot().summary(&last);
        assert_eq!(summary.positions.len(), 2);
        assert_eq!(summary.positions[0].instrument, "KRW-BTC");
        assert_eq!(summary.positions[0].value, dec!(3000));
        // No last price: valued at acquisition
        assert_eq!(summary.positions[1].value, dec!(500));
        assert_eq!(summary.total, summary.balance + dec!(3500));

        let text = summary.to_string();
        assert!(text.contains("Wallet Summary"));
        assert!(text.contains("KRW-BTC Value: 3000.00"));
    }

    #[tokio::test]
    async fn test_actor_scenario() {
        let (_trigger, shutdown) = Shutdown::new();
        let (handle, task) = spawn_wallet(wallet(), 16, shutdown);

        assert_ok!(handle.buy("X", dec!(1), dec!(100000)).await);
        assert_eq!(handle.snapshot().await.unwrap().balance, dec!(899950));

        assert_ok!(handle.sell("X", dec!(110000)).await);
        assert_err!(handle.sell("X", dec!(110000)).await);

        drop(handle);
        let final_wallet = task.await.unwrap();
        assert_eq!(final_wallet.balance(), dec!(999895));
    }

    #[tokio::test]
    async fn test_applies_in_submission_order() {
        enum Op {
            Buy(&'static str, Decimal, Decimal),
            Sell(&'static str, Decimal),
        }
        let ops = vec![
            Op::Buy("A", dec!(1), dec!(100000)),
            Op::Sell("B", dec!(10)),
            Op::Buy("B", dec!(5), dec!(20000)),
            Op::Sell("A", dec!(120000)),
            Op::Buy("C", dec!(100), dec!(9000)),
            Op::Sell("A", dec!(1)),
            Op::Buy("A", dec!(2), dec!(90000)),
            Op::Sell("B", dec!(19000)),
        ];

        let mut expected = wallet();
        let mut expected_results = Vec::new();
        for op in &ops {
            expected_results.push(match op {
                Op::Buy(i, q, p) => expected.buy(i, *q, *p).is_ok(),
                Op::Sell(i, p) => expected.sell(i, *p).is_ok(),
            });
        }

        let (_trigger, shutdown) = Shutdown::new();
        let (handle, task) = spawn_wallet(wallet(), 4, shutdown);

        // Queue everything first, then collect replies
        let mut pending = Vec::new();
        for op in &ops {
            pending.push(match op {
                Op::Buy(i, q, p) => handle.submit_buy(i, *q, *p).await.unwrap(),
                Op::Sell(i, p) => handle.submit_sell(i, *p).await.unwrap(),
            });
        }
        let mut results = Vec::new();
        for p in pending {
            results.push(p.wait().await.is_ok());
        }

        assert_eq!(results, expected_results);
        drop(handle);
        let actual = task.await.unwrap();
        assert_eq!(actual.balance(), expected.balance());
        assert_eq!(actual.snapshot().positions.len(), expected.positions().len());
    }

    #[tokio::test]
    async fn test_concurrent_buys_are_serialized() {
        let (_trigger, shutdown) = Shutdown::new();
        // Room for exactly 7 buys of 100_000 + 50 fee
        let (handle, task) = spawn_wallet(Wallet::new(dec!(700350), dec!(0.0005)), 8, shutdown);

        let mut tasks = Vec::new();
        for i in 0..20 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .buy(&format!("KRW-{}", i), dec!(1), dec!(100000))
                    .await
            }));
        }

        let mut filled = 0;
        let mut rejected = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(_) => filled += 1,
                Err(WalletError::InsufficientFunds { .. }) => rejected += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(filled, 7);
        assert_eq!(rejected, 13);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.balance, Decimal::ZERO);
        assert_eq!(snapshot.positions.len(), 7);

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_after_shutdown() {
        let (trigger, shutdown) = Shutdown::new();
        let (handle, task) = spawn_wallet(wallet(), 4, shutdown);

        trigger.cancel();
        task.await.unwrap();

        assert_eq!(
            handle.buy("X", dec!(1), dec!(1)).await.unwrap_err(),
            WalletError::Closed
        );
        assert_eq!(handle.snapshot().await.unwrap_err(), WalletError::Closed);
    }
}
