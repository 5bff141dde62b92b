use super::history::{CandleBook, HistoryStore, HistorySummary};
use super::poller::PollerEvent;
use super::trailing::TrailingTracker;
use super::wallet::{WalletError, WalletHandle, WalletSnapshot};
use crate::models::{Decision, Side, Snapshot};
use crate::shutdown::Shutdown;
use crate::strategy::{InstrumentView, StrategyEvaluator};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashSet;
use tokio::sync::{mpsc, watch};

/// Buy quantities are rounded to this many decimal places
const QUANTITY_SCALE: u32 = 8;

/// Drives one decision cycle per snapshot batch
pub struct Orchestrator {
    history: HistoryStore,
    candles: CandleBook,
    trailing: TrailingTracker,
    evaluator: StrategyEvaluator,
    wallet: WalletHandle,
    buy_unit: Decimal,
    summary_tx: watch::Sender<HistorySummary>,
}

/// Outcome counts of one cycle, mostly for logs and tests
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub decisions: usize,
    pub bought: usize,
    pub sold: usize,
    pub rejected: usize,
}

impl Orchestrator {
    pub fn new(
        history: HistoryStore,
        candles: CandleBook,
        evaluator: StrategyEvaluator,
        wallet: WalletHandle,
        buy_unit: Decimal,
    ) -> (Self, watch::Receiver<HistorySummary>) {
        let (summary_tx, summary_rx) = watch::channel(HistorySummary::default());
        let orchestrator = Self {
            history,
            candles,
            trailing: TrailingTracker::new(),
            evaluator,
            wallet,
            buy_unit,
            summary_tx,
        };
        (orchestrator, summary_rx)
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn trailing(&self) -> &TrailingTracker {
        &self.trailing
    }

    /// Consume poller events until cancelled or the channel closes
    pub async fn run(mut self, mut events: mpsc::Receiver<PollerEvent>, shutdown: Shutdown) -> Self {
        tracing::info!(
            strategies = self.evaluator.strategies().len(),
            "Orchestrator started"
        );

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("Orchestrator stopping (shutdown)");
                    break;
                }
                event = events.recv() => event,
            };

            match event {
                Some(PollerEvent::Snapshots(batch)) => match self.on_snapshots(batch).await {
                    Ok(report) => {
                        if report.decisions > 0 {
                            tracing::info!(
                                decisions = report.decisions,
                                bought = report.bought,
                                sold = report.sold,
                                rejected = report.rejected,
                                "Cycle complete"
                            );
                        }
                    }
                    Err(WalletError::Closed) => {
                        tracing::info!("Wallet closed, stopping orchestrator");
                        break;
                    }
                    Err(e) => tracing::error!(error = %e, "Cycle failed"),
                },
                Some(PollerEvent::Candles { instrument, candles }) => {
                    tracing::debug!(instrument = %instrument, count = candles.len(), "Candles updated");
                    self.candles.replace(&instrument, candles);
                }
                None => {
                    tracing::info!("Poller channel closed, stopping orchestrator");
                    break;
                }
            }
        }

        self
    }

    /// One full cycle: record, evaluate, trade, track, publish
    pub async fn on_snapshots(&mut self, batch: Vec<Snapshot>) -> Result<CycleReport, WalletError> {
        let mut instruments: Vec<String> = batch.iter().map(|s| s.instrument.clone()).collect();
        self.history.append_all(batch);

        let wallet = self.wallet.snapshot().await?;
        // Held instruments that left the batch still need their exits checked
        let mut missing: Vec<String> = wallet
            .positions
            .keys()
            .filter(|held| !instruments.contains(*held))
            .cloned()
            .collect();
        missing.sort();
        instruments.extend(missing);
        let views = self.build_views(&instruments, &wallet);

        let decisions = self.evaluator.evaluate(views).await;
        let (buys, sells): (Vec<Decision>, Vec<Decision>) =
            decisions.into_iter().partition(|d| d.side == Side::Buy);

        let mut report = CycleReport {
            decisions: buys.len() + sells.len(),
            ..CycleReport::default()
        };
        let mut sold = HashSet::new();

        for decision in &buys {
            self.execute_buy(decision, &mut report).await?;
        }
        for decision in &sells {
            if self.execute_sell(decision, &mut report).await? {
                sold.insert(decision.instrument.clone());
            }
        }

        self.update_trailing(&sold).await?;
        self.summary_tx.send_replace(self.history.summary());

        Ok(report)
    }

    fn build_views(&self, instruments: &[String], wallet: &WalletSnapshot) -> Vec<InstrumentView> {
        instruments
            .iter()
            .filter_map(|instrument| {
                let ticks = self.history.window(instrument)?;
                Some(InstrumentView {
                    instrument: instrument.clone(),
                    ticks,
                    candles: self.candles.series(instrument),
                    position: wallet.position(instrument).cloned(),
                    trailing: self.trailing.get(instrument),
                })
            })
            .collect()
    }

    async fn execute_buy(
        &self,
        decision: &Decision,
        report: &mut CycleReport,
    ) -> Result<(), WalletError> {
        let Some(price) = Decimal::from_f64(decision.price).filter(|p| *p > Decimal::ZERO) else {
            tracing::warn!(instrument = %decision.instrument, price = decision.price, "Unusable buy price");
            report.rejected += 1;
            return Ok(());
        };
        let quantity = (self.buy_unit / price).round_dp(QUANTITY_SCALE);

        match self.wallet.buy(&decision.instrument, quantity, price).await {
            Ok(_) => report.bought += 1,
            Err(WalletError::Closed) => return Err(WalletError::Closed),
            Err(e @ WalletError::InsufficientFunds { .. }) => {
                tracing::info!(instrument = %decision.instrument, error = %e, "Buy skipped");
                report.rejected += 1;
            }
            Err(e) => {
                tracing::warn!(instrument = %decision.instrument, error = %e, "Buy rejected");
                report.rejected += 1;
            }
        }
        Ok(())
    }

    /// Returns whether the position was closed
    async fn execute_sell(
        &self,
        decision: &Decision,
        report: &mut CycleReport,
    ) -> Result<bool, WalletError> {
        let Some(price) = Decimal::from_f64(decision.price) else {
            tracing::warn!(instrument = %decision.instrument, price = decision.price, "Unusable sell price");
            report.rejected += 1;
            return Ok(false);
        };

        match self.wallet.sell(&decision.instrument, price).await {
            Ok(_) => {
                report.sold += 1;
                Ok(true)
            }
            Err(WalletError::Closed) => Err(WalletError::Closed),
            Err(e) => {
                tracing::warn!(instrument = %decision.instrument, error = %e, "Sell rejected");
                report.rejected += 1;
                Ok(false)
            }
        }
    }

    /// Track the range of every held instrument; forget the rest
    async fn update_trailing(&mut self, sold: &HashSet<String>) -> Result<(), WalletError> {
        for instrument in sold {
            self.trailing.remove(instrument);
        }

        let wallet = self.wallet.snapshot().await?;
        self.trailing.retain_held(|i| wallet.has_position(i));
        for instrument in wallet.positions.keys() {
            if let Some(last) = self.history.latest(instrument) {
                self.trailing.observe(instrument, last.trade_price);
            }
        }
        Ok(())
    }
}
