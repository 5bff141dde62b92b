use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped price observation for an instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub instrument: String,
    pub trade_price: f64,
    pub opening_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub prev_closing_price: f64,
    pub trade_volume: f64,
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    /// Snapshot with every OHLC field set to `price`
    pub fn at_price(instrument: &str, price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            instrument: instrument.to_string(),
            trade_price: price,
            opening_price: price,
            high_price: price,
            low_price: price,
            prev_closing_price: price,
            trade_volume: 0.0,
            timestamp,
        }
    }
}

/// Fixed-duration aggregate of trades
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub instrument: String,
    pub period_start: DateTime<Utc>,
    pub period_secs: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    /// Last trade price inside the period
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// First instant after this candle's period
    pub fn period_end(&self) -> DateTime<Utc> {
        self.period_start + Duration::seconds(self.period_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Outcome of a strategy firing for one instrument
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub instrument: String,
    pub side: Side,
    pub price: f64,
    pub strategy: &'static str,
}

/// Trailing min/max trade price observed while a position is held
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

impl PriceRange {
    pub fn new(price: f64) -> Self {
        Self {
            min: price,
            max: price,
        }
    }

    pub fn observe(&mut self, price: f64) {
        if price > self.max {
            self.max = price;
        }
        if price < self.min {
            self.min = price;
        }
    }
}
