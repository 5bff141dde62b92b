use super::InstrumentView;
use crate::indicators::rsi_or_undefined;
use crate::models::{Candle, Snapshot};

/// Candle close prices with the latest tick folded in
///
/// A tick inside the last candle's period replaces that candle's close.
/// A tick past it starts a new period: the oldest close drops off and the
/// tick price is appended, so the length stays the same.
pub fn candle_prices_with_tick(candles: &[Candle], tick: &Snapshot) -> Vec<f64> {
    let mut prices: Vec<f64> = candles.iter().map(|c| c.close).collect();

    match candles.last() {
        Some(last) if tick.timestamp < last.period_end() => {
            if let Some(close) = prices.last_mut() {
                *close = tick.trade_price;
            }
        }
        Some(_) => {
            prices.remove(0);
            prices.push(tick.trade_price);
        }
        None => {}
    }

    prices
}

/// RSI of the series without its newest point, and without its oldest
pub fn rsi_transition(prices: &[f64], period: usize) -> (f64, f64) {
    let n = prices.len();
    if n == 0 {
        return (
            rsi_or_undefined(&[], period),
            rsi_or_undefined(&[], period),
        );
    }
    (
        rsi_or_undefined(&prices[..n - 1], period),
        rsi_or_undefined(&prices[1..], period),
    )
}

/// Buys when RSI over recent candles crosses up through `threshold`
#[derive(Debug, Clone)]
pub struct RsiCross {
    pub period: usize,
    pub threshold: f64,
}

impl RsiCross {
    pub fn check_instrument(&self, view: &InstrumentView) -> bool {
        let (Some(candles), Some(tick)) = (view.candles.as_deref(), view.last()) else {
            return false;
        };
        if candles.is_empty() {
            return false;
        }

        let prices = candle_prices_with_tick(candles, tick);
        let (prev, cur) = rsi_transition(&prices, self.period);

        if prev < self.threshold && cur >= self.threshold {
            tracing::info!(
                instrument = %view.instrument,
                prev_rsi = prev,
                cur_rsi = cur,
                "RSI crossed up through {}",
                self.threshold
            );
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::UNDEFINED_RSI;
    use crate::strategy::test_support::{base_time, candles, view};
    use chrono::Duration;

    fn strategy() -> RsiCross {
        RsiCross {
            period: 14,
            threshold: 0.3,
        }
    }

    #[test]
    fn test_tick_inside_last_candle_replaces_close() {
        let series = candles("KRW-BTC", &[1.0, 2.0, 3.0]);
        let tick = Snapshot::at_price("KRW-BTC", 9.0, base_time() + Duration::seconds(30));

        assert_eq!(candle_prices_with_tick(&series, &tick), vec![1.0, 2.0, 9.0]);
    }

    #[test]
    fn test_tick_after_last_candle_shifts() {
        let series = candles("KRW-BTC", &[1.0, 2.0, 3.0]);
        let tick = Snapshot::at_price("KRW-BTC", 9.0, base_time() + Duration::seconds(60));

        assert_eq!(candle_prices_with_tick(&series, &tick), vec![2.0, 3.0, 9.0]);
    }

    #[test]
    fn test_transition_splits_series() {
        let (prev, cur) = rsi_transition(&[100.0, 101.0, 100.0], 14);
        assert_eq!(prev, 1.0);
        assert_eq!(cur, 0.0);

        assert_eq!(rsi_transition(&[], 14), (UNDEFINED_RSI, UNDEFINED_RSI));
    }

    #[test]
    fn test_fires_on_upward_cross() {
        // Falling series; the fresh tick jumps back up within the last minute
        let mut v = view("KRW-BTC", &[100.0, 130.0]);
        v.candles = Some(candles("KRW-BTC", &[120.0, 115.0, 110.0, 105.0, 100.0]));

        // prev = RSI(120,115,110,105) = 0, cur = RSI(115,110,105,130) > 0.3
        assert!(strategy().check_instrument(&v));
    }

    #[test]
    fn test_quiet_when_already_above() {
        let mut v = view("KRW-BTC", &[100.0, 106.0]);
        v.candles = Some(candles("KRW-BTC", &[100.0, 101.0, 102.0, 103.0, 104.0]));
        assert!(!strategy().check_instrument(&v));
    }

    #[test]
    fn test_quiet_without_candles() {
        let v = view("KRW-BTC", &[100.0, 130.0]);
        assert!(!strategy().check_instrument(&v));
    }
}
