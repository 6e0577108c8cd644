//! Fixed-capacity ring buffer of recent ticks.

use std::collections::VecDeque;

/// Price/volume/timestamp triple kept in the ring buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickRecord {
    pub price: f64,
    pub volume: f64,
    pub timestamp: i64,
}

/// Ring buffer storing the N most recent ticks, oldest evicted first
#[derive(Debug, Clone)]
pub struct TickRing {
    ticks: VecDeque<TickRecord>,
    max_size: usize,
    /// Newest timestamp ever buffered, survives eviction
    newest_ts: Option<i64>,
    total_volume: f64,
}

impl TickRing {
    pub fn new(max_size: usize) -> Self {
        Self {
            ticks: VecDeque::with_capacity(max_size),
            max_size,
            newest_ts: None,
            total_volume: 0.0,
        }
    }

    /// Append a tick, evicting the oldest entry at capacity. Returns the evicted record.
    pub fn push(&mut self, record: TickRecord) -> Option<TickRecord> {
        let evicted = if self.ticks.len() >= self.max_size {
            self.ticks.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            self.total_volume -= old.volume;
        }

        self.newest_ts = Some(self.newest_ts.map_or(record.timestamp, |ts| ts.max(record.timestamp)));
        self.total_volume += record.volume;
        self.ticks.push_back(record);
        evicted
    }

    pub fn newest_timestamp(&self) -> Option<i64> {
        self.newest_ts
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn latest(&self) -> Option<&TickRecord> {
        self.ticks.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TickRecord> {
        self.ticks.iter()
    }

    pub fn total_volume(&self) -> f64 {
        self.total_volume
    }

    /// Volume-weighted average price of the buffered ticks.
    pub fn vwap(&self) -> Option<f64> {
        if self.total_volume > 0.0 {
            let sum_pv: f64 = self.ticks.iter().map(|t| t.price * t.volume).sum();
            Some(sum_pv / self.total_volume)
        } else {
            None
        }
    }
}
