use super::InstrumentView;

/// Buys once the latest price has bounced far enough off the window low
///
/// Fires when `min * detected_rate < last - min` over the whole tick window.
#[derive(Debug, Clone)]
pub struct ThresholdDecline {
    pub detected_rate: f64,
    /// Ticks required before the window is trusted
    pub min_samples: usize,
}

impl ThresholdDecline {
    pub fn check_instrument(&self, view: &InstrumentView) -> bool {
        if view.ticks.len() < self.min_samples.max(1) {
            return false;
        }
        let prices: Vec<f64> = view.ticks.iter().map(|s| s.trade_price).collect();
        let fired = self.check_prices(&prices);
        if fired {
            tracing::info!(
                instrument = %view.instrument,
                last = prices.last().copied().unwrap_or_default(),
                min = prices.iter().copied().fold(f64::INFINITY, f64::min),
                "ThresholdDecline buy signal"
            );
        }
        fired
    }

    /// Core rule on a plain price window, oldest first
    pub fn check_prices(&self, prices: &[f64]) -> bool {
        let Some(&last) = prices.last() else {
            return false;
        };
        let min = prices.iter().copied().fold(f64::INFINITY, f64::min);

        min * self.detected_rate < last - min
    }
}
