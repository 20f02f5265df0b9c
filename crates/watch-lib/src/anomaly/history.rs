//! Rolling history of visit ratios

use std::collections::VecDeque;

/// Default history length (~3 days of hourly polls)
pub const DEFAULT_HISTORY_CAPACITY: usize = 72;

/// Fixed-capacity, oldest-first window of observed ratios
#[derive(Debug, Clone)]
pub struct RatioHistory {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RatioHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Seed the window, keeping only the newest `capacity` values
    pub fn from_values(values: impl IntoIterator<Item = f64>, capacity: usize) -> Self {
        let mut history = Self::new(capacity);
        for value in values {
            history.push(value);
        }
        history
    }

    /// Append a ratio, evicting the oldest one when full
    pub fn push(&mut self, value: f64) {
        while self.values.len() >= self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Contiguous copy of the window, oldest first
    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }
}

impl Default for RatioHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
