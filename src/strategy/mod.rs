// Trading strategy module
pub mod evaluator;
pub mod exit;
pub mod rsi_cross;
pub mod threshold;

pub use evaluator::StrategyEvaluator;
pub use exit::StopLossOrTakeProfit;
pub use rsi_cross::RsiCross;
pub use threshold::ThresholdDecline;

use crate::config::{AppConfig, StrategyKind};
use crate::execution::history::Window;
use crate::execution::wallet::Position;
use crate::models::{Candle, PriceRange, Side, Snapshot};
use std::sync::Arc;

/// Everything a strategy may look at for one instrument
///
/// All fields are owned or frozen, so a view can move into a task without
/// borrowing engine state.
#[derive(Debug, Clone)]
pub struct InstrumentView {
    pub instrument: String,
    pub ticks: Window,
    pub candles: Option<Arc<[Candle]>>,
    pub position: Option<Position>,
    pub trailing: Option<PriceRange>,
}

impl InstrumentView {
    pub fn last(&self) -> Option<&Snapshot> {
        self.ticks.back()
    }
}

/// The closed set of signal generators the engine knows about
#[derive(Debug, Clone)]
pub enum Strategy {
    ThresholdDecline(ThresholdDecline),
    RsiCross(RsiCross),
    StopLossOrTakeProfit(StopLossOrTakeProfit),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::ThresholdDecline(_) => "ThresholdDecline",
            Strategy::RsiCross(_) => "RsiCross",
            Strategy::StopLossOrTakeProfit(_) => "StopLossOrTakeProfit",
        }
    }

    /// Whether a firing means buy (no position held) or sell (position held)
    pub fn side(&self) -> Side {
        match self {
            Strategy::ThresholdDecline(_) | Strategy::RsiCross(_) => Side::Buy,
            Strategy::StopLossOrTakeProfit(_) => Side::Sell,
        }
    }

    pub fn check_instrument(&self, view: &InstrumentView) -> bool {
        match self {
            Strategy::ThresholdDecline(s) => s.check_instrument(view),
            Strategy::RsiCross(s) => s.check_instrument(view),
            Strategy::StopLossOrTakeProfit(s) => s.check_instrument(view),
        }
    }

    /// Instantiate the enabled strategies in configured order
    pub fn from_config(config: &AppConfig) -> Vec<Strategy> {
        let s = &config.strategy;
        s.enabled
            .iter()
            .map(|kind| match kind {
                StrategyKind::ThresholdDecline => Strategy::ThresholdDecline(ThresholdDecline {
                    detected_rate: s.detected_rate,
                    min_samples: config.min_samples(),
                }),
                StrategyKind::RsiCross => Strategy::RsiCross(RsiCross {
                    period: s.rsi_period,
                    threshold: s.rsi_buy_threshold,
                }),
                StrategyKind::StopLossOrTakeProfit => {
                    Strategy::StopLossOrTakeProfit(StopLossOrTakeProfit {
                        lose_rate: s.lose_rate,
                        period: s.rsi_period,
                        take_profit_threshold: s.rsi_take_profit_threshold,
                        panic_threshold: s.rsi_panic_threshold,
                    })
                }
            })
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_default_config() {
        let strategies = Strategy::from_config(&AppConfig::default());
        let names: Vec<&str> = strategies.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec!["ThresholdDecline", "RsiCross", "StopLossOrTakeProfit"]
        );
        assert_eq!(strategies[0].side(), Side::Buy);
        assert_eq!(strategies[1].side(), Side::Buy);
        assert_eq!(strategies[2].side(), Side::Sell);
    }

    #[test]
    fn test_from_config_respects_enabled_list() {
        let mut config = AppConfig::default();
        config.strategy.enabled = vec![StrategyKind::StopLossOrTakeProfit];
        let strategies = Strategy::from_config(&config);
        assert_eq!(strategies.len(), 1);
        assert_eq!(strategies[0].name(), "StopLossOrTakeProfit");
    }
}
