use crate::models::PriceRange;
use std::collections::HashMap;

/// Min/max trade price seen per held instrument since it was bought
#[derive(Debug, Default)]
pub struct TrailingTracker {
    ranges: HashMap<String, PriceRange>,
}

impl TrailingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a price; starts a fresh range for unseen instruments
    pub fn observe(&mut self, instrument: &str, price: f64) {
        match self.ranges.get_mut(instrument) {
            Some(range) => range.observe(price),
            None => {
                self.ranges
                    .insert(instrument.to_string(), PriceRange::new(price));
            }
        }
    }

    pub fn get(&self, instrument: &str) -> Option<PriceRange> {
        self.ranges.get(instrument).copied()
    }

    pub fn remove(&mut self, instrument: &str) -> Option<PriceRange> {
        self.ranges.remove(instrument)
    }

    /// Drop ranges for instruments no longer held
    pub fn retain_held<F>(&mut self, mut is_held: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.ranges.retain(|k, _| is_held(k));
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
