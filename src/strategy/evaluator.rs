use super::{InstrumentView, Strategy};
use crate::models::{Decision, Side};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Runs the configured strategies against many instruments in parallel
#[derive(Debug, Clone)]
pub struct StrategyEvaluator {
    strategies: Arc<[Strategy]>,
}

impl StrategyEvaluator {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self {
            strategies: strategies.into(),
        }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    fn has_side(&self, side: Side) -> bool {
        self.strategies.iter().any(|s| s.side() == side)
    }

    /// One task per instrument; decisions come back in completion order
    ///
    /// Instruments with an open position only see sell strategies, the rest
    /// only buy strategies. The first strategy that fires decides.
    pub async fn evaluate(&self, views: Vec<InstrumentView>) -> Vec<Decision> {
        let mut tasks = JoinSet::new();

        for view in views {
            let side = if view.position.is_some() {
                Side::Sell
            } else {
                Side::Buy
            };
            if !self.has_side(side) {
                continue;
            }

            let strategies = Arc::clone(&self.strategies);
            tasks.spawn(async move {
                let strategy = strategies
                    .iter()
                    .filter(|s| s.side() == side)
                    .find(|s| s.check_instrument(&view))?;
                let last = view.last()?;
                Some(Decision {
                    instrument: view.instrument.clone(),
                    side,
                    price: last.trade_price,
                    strategy: strategy.name(),
                })
            });
        }

        let mut decisions = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(decision)) => decisions.push(decision),
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "Strategy task failed"),
            }
        }
        decisions
    }
}
