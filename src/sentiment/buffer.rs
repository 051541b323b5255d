use crate::sentiment::types::{SentimentPoint, Series, SERIES_CAPACITY};
use std::sync::Arc;

/// Ordered, deduplicated, capacity-bounded sentiment series.
///
/// The held series is swapped wholesale on every merge, so a snapshot handed
/// out earlier never changes underneath its reader.
#[derive(Debug)]
pub struct TimeSeriesBuffer {
    held: Series,
    capacity: usize,
}

impl Default for TimeSeriesBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSeriesBuffer {
    pub fn new() -> Self {
        Self::with_capacity(SERIES_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            held: Series::from(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn merge<I>(&mut self, incoming: I) -> Series
    where
        I: IntoIterator<Item = SentimentPoint>,
    {
        let mut merged: Vec<SentimentPoint> = self.held.iter().cloned().chain(incoming).collect();

        // Latest write first, so the stable sort leaves it at the head of each equal-key run.
        merged.reverse();
        merged.sort_by_key(|point| point.timestamp());
        merged.dedup_by_key(|point| point.timestamp());

        if merged.len() > self.capacity {
            let overflow = merged.len() - self.capacity;
            merged.drain(0..overflow);
        }

        self.held = Series::from(merged);
        self.snapshot()
    }

    pub fn reset(&mut self) {
        self.held = Series::from(Vec::new());
    }

    pub fn snapshot(&self) -> Series {
        Arc::clone(&self.held)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
