use crate::models::{Candle, Snapshot};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Frozen view of one instrument's snapshot history, oldest first
pub type Window = Arc<VecDeque<Snapshot>>;

/// Rolling window of snapshots for each instrument
///
/// Owned by a single writer. Readers get [`Window`]s: appending after a
/// window was handed out copies the buffer instead of touching the shared
/// one, so a window never changes under a reader.
#[derive(Debug)]
pub struct HistoryStore {
    data: HashMap<String, Window>,
    capacity: usize,
}

impl HistoryStore {
    /// Create a new store
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of snapshots to keep per instrument (at least 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            data: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add a snapshot, evicting the oldest if the buffer is full
    pub fn append(&mut self, snapshot: Snapshot) {
        let capacity = self.capacity;
        let window = self
            .data
            .entry(snapshot.instrument.clone())
            .or_insert_with(|| Arc::new(VecDeque::with_capacity(capacity)));

        let buffer = Arc::make_mut(window);
        buffer.push_back(snapshot);
        while buffer.len() > capacity {
            buffer.pop_front();
        }
    }

    pub fn append_all(&mut self, snapshots: impl IntoIterator<Item = Snapshot>) {
        for snapshot in snapshots {
            self.append(snapshot);
        }
    }

    /// Most recent snapshot for an instrument
    pub fn latest(&self, instrument: &str) -> Option<&Snapshot> {
        self.data.get(instrument).and_then(|w| w.back())
    }

    /// Immutable view of the full buffer
    pub fn window(&self, instrument: &str) -> Option<Window> {
        self.data.get(instrument).cloned()
    }

    pub fn len(&self, instrument: &str) -> usize {
        self.data.get(instrument).map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(|k| k.as_str())
    }

    /// Latest trade price per instrument
    pub fn last_prices(&self) -> HashMap<String, f64> {
        self.data
            .iter()
            .filter_map(|(k, w)| w.back().map(|s| (k.clone(), s.trade_price)))
            .collect()
    }

    /// Read-only projection: last snapshot of every instrument
    pub fn summary(&self) -> HistorySummary {
        let mut latest: Vec<Snapshot> = self.data.values().filter_map(|w| w.back().cloned()).collect();
        latest.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        HistorySummary { latest }
    }
}

/// Last known snapshot per instrument
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySummary {
    pub latest: Vec<Snapshot>,
}

impl HistorySummary {
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.latest.iter().map(|s| s.timestamp).max()
    }

    pub fn last_prices(&self) -> HashMap<String, f64> {
        self.latest
            .iter()
            .map(|s| (s.instrument.clone(), s.trade_price))
            .collect()
    }
}

impl fmt::Display for HistorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last_update() {
            Some(ts) => writeln!(
                f,
                "{} instruments, last update: {}",
                self.latest.len(),
                ts.to_rfc3339_opts(SecondsFormat::Secs, true)
            )?,
            None => writeln!(f, "0 instruments, no data yet")?,
        }
        for s in &self.latest {
            writeln!(
                f,
                "  {}: {} ({})",
                s.instrument,
                s.trade_price,
                s.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
            )?;
        }
        Ok(())
    }
}

/// Latest candle series per instrument, replaced wholesale on refresh
#[derive(Debug)]
pub struct CandleBook {
    data: HashMap<String, Arc<[Candle]>>,
    capacity: usize,
}

impl CandleBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Store the newest `capacity` candles of an ascending series
    pub fn replace(&mut self, instrument: &str, candles: Vec<Candle>) {
        let skip = candles.len().saturating_sub(self.capacity);
        let series: Arc<[Candle]> = candles.into_iter().skip(skip).collect();
        self.data.insert(instrument.to_string(), series);
    }

    pub fn series(&self, instrument: &str) -> Option<Arc<[Candle]>> {
        self.data.get(instrument).filter(|s| !s.is_empty()).cloned()
    }

    pub fn len(&self, instrument: &str) -> usize {
        self.data.get(instrument).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn snapshot(instrument: &str, price: f64, secs: i64) -> Snapshot {
        let base = DateTime::from_timestamp(1_709_284_500, 0).unwrap();
        Snapshot::at_price(instrument, price, base + Duration::seconds(secs))
    }

    fn candle(price: f64, minute: i64) -> Candle {
        let base = DateTime::from_timestamp(1_709_284_500, 0).unwrap();
        Candle {
            instrument: "KRW-BTC".to_string(),
            period_start: base + Duration::minutes(minute),
            period_secs: 60,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
        }
    }

    #[test]
    fn test_new_store() {
        let store = HistoryStore::new(100);
        assert_eq!(store.capacity(), 100);
        assert!(store.is_empty());
        assert!(store.latest("KRW-BTC").is_none());
        assert!(store.window("KRW-BTC").is_none());
    }

    #[test]
    fn test_append_and_latest() {
        let mut store = HistoryStore::new(10);
        store.append(snapshot("KRW-BTC", 100.0, 0));
        store.append(snapshot("KRW-BTC", 101.0, 1));

        assert_eq!(store.len("KRW-BTC"), 2);
        assert_eq!(store.latest("KRW-BTC").unwrap().trade_price, 101.0);
    }

    #[test]
    fn test_capacity_limit_evicts_oldest() {
        let mut store = HistoryStore::new(5);
        for i in 0..10 {
            store.append(snapshot("KRW-BTC", 100.0 + i as f64, i));
        }

        let window = store.window("KRW-BTC").unwrap();
        assert_eq!(window.len(), 5);
        assert_eq!(window[0].trade_price, 105.0);
        assert_eq!(window[4].trade_price, 109.0);
    }

    #[test]
    fn test_random_appends_never_exceed_capacity() {
        let mut rng = StdRng::seed_from_u64(7);
        let instruments = ["KRW-BTC", "KRW-ETH", "KRW-XRP"];
        let mut store = HistoryStore::new(8);

        for i in 0..500 {
            let instrument = instruments[rng.gen_range(0..instruments.len())];
            store.append(snapshot(instrument, rng.gen_range(1.0..1000.0), i));
            for name in instruments {
                assert!(store.len(name) <= 8);
            }
        }
    }

    #[test]
    fn test_window_is_frozen() {
        let mut store = HistoryStore::new(3);
        store.append(snapshot("KRW-BTC", 1.0, 0));
        store.append(snapshot("KRW-BTC", 2.0, 1));

        let frozen = store.window("KRW-BTC").unwrap();
        store.append(snapshot("KRW-BTC", 3.0, 2));
        store.append(snapshot("KRW-BTC", 4.0, 3));

        let prices: Vec<f64> = frozen.iter().map(|s| s.trade_price).collect();
        assert_eq!(prices, vec![1.0, 2.0]);

        let current: Vec<f64> = store
            .window("KRW-BTC")
            .unwrap()
            .iter()
            .map(|s| s.trade_price)
            .collect();
        assert_eq!(current, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_multiple_instruments() {
        let mut store = HistoryStore::new(10);
        store.append_all(vec![
            snapshot("KRW-BTC", 100.0, 0),
            snapshot("KRW-ETH", 200.0, 0),
            snapshot("KRW-XRP", 300.0, 0),
        ]);

        let mut names: Vec<&str> = store.instruments().collect();
        names.sort();
        assert_eq!(names, vec!["KRW-BTC", "KRW-ETH", "KRW-XRP"]);

        let prices = store.last_prices();
        assert_eq!(prices["KRW-ETH"], 200.0);
    }

    #[test]
    fn test_summary_lists_latest_sorted() {
        let mut store = HistoryStore::new(10);
        store.append(snapshot("KRW-XRP", 300.0, 5));
        store.append(snapshot("KRW-BTC", 100.0, 1));
        store.append(snapshot("KRW-BTC", 110.0, 9));

        let summary = store.summary();
        assert_eq!(summary.latest.len(), 2);
        assert_eq!(summary.latest[0].instrument, "KRW-BTC");
        assert_eq!(summary.latest[0].trade_price, 110.0);
        assert_eq!(summary.last_update(), Some(summary.latest[0].timestamp));

        let text = summary.to_string();
        assert!(text.starts_with("2 instruments"));
        assert!(text.contains("KRW-XRP: 300"));
    }

    #[test]
    fn test_empty_summary() {
        let summary = HistoryStore::new(3).summary();
        assert!(summary.last_update().is_none());
        assert!(summary.to_string().contains("no data yet"));
    }

    #[test]
    fn test_candle_book_keeps_newest() {
        let mut book = CandleBook::new(3);
        book.replace("KRW-BTC", (0..5).map(|i| candle(i as f64, i)).collect());

        let series = book.series("KRW-BTC").unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series[0].close, 2.0);
        assert_eq!(series[2].close, 4.0);
    }

    #[test]
    fn test_candle_book_empty_series_is_none() {
        let mut book = CandleBook::new(3);
        book.replace("KRW-BTC", Vec::new());
        assert!(book.series("KRW-BTC").is_none());
        assert_eq!(book.len("KRW-BTC"), 0);
    }
}
