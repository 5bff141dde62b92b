use super::rsi_cross::{candle_prices_with_tick, rsi_transition};
use super::InstrumentView;

/// Sell rule for held instruments
///
/// Exits on any of:
/// - last price below acquisition price by more than `lose_rate` (stop loss)
/// - last price below the trailing high by more than `lose_rate` (trailing stop)
/// - candle RSI crossing down through `take_profit_threshold`
/// - candle RSI below `panic_threshold`
#[derive(Debug, Clone)]
pub struct StopLossOrTakeProfit {
    pub lose_rate: f64,
    pub period: usize,
    pub take_profit_threshold: f64,
    pub panic_threshold: f64,
}

impl StopLossOrTakeProfit {
    pub fn check_instrument(&self, view: &InstrumentView) -> bool {
        let (Some(position), Some(tick)) = (view.position.as_ref(), view.last()) else {
            return false;
        };
        let last = tick.trade_price;
        let keep = 1.0 - self.lose_rate;

        let acquisition = position.acquisition_price_f64();
        if last < acquisition * keep {
            tracing::info!(
                instrument = %view.instrument,
                last,
                acquisition,
                "Stop loss triggered"
            );
            return true;
        }

        if let Some(range) = view.trailing {
            if last < range.max * keep {
                tracing::info!(
                    instrument = %view.instrument,
                    last,
                    high = range.max,
                    "Trailing stop triggered"
                );
                return true;
            }
        }

        let Some(candles) = view.candles.as_deref().filter(|c| !c.is_empty()) else {
            return false;
        };
        let prices = candle_prices_with_tick(candles, tick);
        let (prev, cur) = rsi_transition(&prices, self.period);

        if prev > self.take_profit_threshold && cur <= self.take_profit_threshold {
            tracing::info!(
                instrument = %view.instrument,
                prev_rsi = prev,
                cur_rsi = cur,
                "RSI crossed down through {}",
                self.take_profit_threshold
            );
            return true;
        }

        // An undefined RSI (flat or too short series) is below any threshold
        if cur < self.panic_threshold {
            tracing::info!(
                instrument = %view.instrument,
                prev_rsi = prev,
                cur_rsi = cur,
                "RSI below panic threshold {}",
                self.panic_threshold
            );
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::wallet::Position;
    use crate::models::PriceRange;
    use crate::strategy::test_support::{base_time, candles, view};
    use rust_decimal::Decimal;

    fn strategy() -> StopLossOrTakeProfit {
        StopLossOrTakeProfit {
            lose_rate: 0.05,
            period: 14,
            take_profit_threshold: 0.7,
            panic_threshold: 0.10,
        }
    }

    fn held(prices: &[f64], acquisition: i64) -> InstrumentView {
        let mut v = view("KRW-BTC", prices);
        v.position = Some(Position {
            instrument: "KRW-BTC".to_string(),
            quantity: Decimal::ONE,
            acquisition_price: Decimal::from(acquisition),
            acquired_at: base_time(),
        });
        v
    }

    #[test]
    fn test_stop_loss() {
        // 94 < 100 * 0.95
        assert!(strategy().check_instrument(&held(&[100.0, 94.0], 100)));
        assert!(!strategy().check_instrument(&held(&[100.0, 96.0], 100)));
    }

    #[test]
    fn test_trailing_stop() {
        let mut v = held(&[100.0, 120.0, 113.0], 100);
        v.trailing = Some(PriceRange { min: 100.0, max: 120.0 });
        // 113 < 120 * 0.95 = 114
        assert!(strategy().check_instrument(&v));

        v.trailing = Some(PriceRange { min: 100.0, max: 118.0 });
        assert!(!strategy().check_instrument(&v));
    }

    #[test]
    fn test_rsi_take_profit_cross() {
        let mut v = held(&[100.0, 103.0], 100);
        v.candles = Some(candles("KRW-BTC", &[100.0, 102.0, 104.0, 106.0, 108.0]));
        // prices = 100,102,104,106,103: prev = RSI(100..106) = 1.0,
        // cur = RSI(102,104,106,103) < 0.7
        assert!(strategy().check_instrument(&v));
    }

    #[test]
    fn test_rsi_panic() {
        let mut v = held(&[100.0, 99.0], 100);
        v.candles = Some(candles("KRW-BTC", &[103.0, 102.0, 101.0, 100.0, 100.0]));
        // prices = 103,102,101,100,99: cur = 0.0 < 0.10
        assert!(strategy().check_instrument(&v));
    }

    #[test]
    fn test_flat_candles_sell_on_undefined_rsi() {
        let mut v = held(&[100.0, 100.0], 100);
        v.candles = Some(candles("KRW-BTC", &[100.0; 5]));
        // No movement at all: RSI is the -1 sentinel, below the panic level
        assert!(strategy().check_instrument(&v));
    }

    #[test]
    fn test_holds_on_mixed_candles() {
        let mut v = held(&[100.0, 101.0], 100);
        v.candles = Some(candles("KRW-BTC", &[100.0, 101.0, 100.0, 101.0, 100.0]));
        // prev and cur RSI both sit between the panic and take-profit levels
        assert!(!strategy().check_instrument(&v));
    }

    #[test]
    fn test_ignores_instruments_without_position() {
        let v = view("KRW-BTC", &[100.0, 50.0]);
        assert!(!strategy().check_instrument(&v));
    }
}
