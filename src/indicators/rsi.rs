/// Sentinel returned by [`rsi_or_undefined`] when the indicator is undefined
pub const UNDEFINED_RSI: f64 = -1.0;

/// Default smoothing period
pub const DEFAULT_RSI_PERIOD: usize = 14;

/// Calculate an exponentially weighted Relative Strength Index
///
/// Every successive price difference contributes, weighted by
/// `(1 - 1/period)^age` where the most recent difference has age 0
/// (weight 1). The result is the weighted share of upward movement in
/// `[0, 1]`.
///
/// Returns `None` when there are fewer than two prices or when the series
/// is completely flat.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < 2 || period == 0 {
        return None;
    }

    let decay = 1.0 - 1.0 / period as f64;
    let diffs = prices.len() - 1;

    let mut weight = 1.0;
    let mut weight_sum = 0.0;
    let mut up_sum = 0.0;
    let mut down_sum = 0.0;

    // Walk newest to oldest so the weight decays with age
    for i in (0..diffs).rev() {
        let change = prices[i + 1] - prices[i];
        if change > 0.0 {
            up_sum += weight * change;
        } else if change < 0.0 {
            down_sum += weight * change.abs();
        }
        weight_sum += weight;
        weight *= decay;
    }

    if up_sum == 0.0 && down_sum == 0.0 {
        return None;
    }

    let avg_up = up_sum / weight_sum;
    let avg_down = down_sum / weight_sum;

    Some(avg_up / (avg_up + avg_down))
}

/// Same as [`calculate_rsi`] but maps an undefined value to [`UNDEFINED_RSI`]
///
/// Crossing checks compare against thresholds in `[0, 1]`, so an undefined
/// previous value always counts as "below" a buy threshold.
pub fn rsi_or_undefined(prices: &[f64], period: usize) -> f64 {
    calculate_rsi(prices, period).unwrap_or(UNDEFINED_RSI)
}
