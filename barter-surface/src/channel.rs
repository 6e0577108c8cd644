//! Bounded hand-off of [`VisualSnapshot`]s from the aggregation domain to the rendering domain.
//!
//! Each symbol owns a small queue. When it fills up the oldest undelivered snapshot is
//! discarded, and snapshots that are not newer than the last one published are dropped.
//! The consumer drains once per frame and only ever sees the latest snapshot per symbol.

use crate::{config::ChannelConfig, snapshot::VisualSnapshot, tick::Symbol};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ChannelStats {
    pub published: u64,
    pub delivered: u64,
    /// Superseded by a newer snapshot of the same symbol before delivery
    pub coalesced: u64,
    /// Discarded because the per-symbol queue was full
    pub overflow_dropped: u64,
    /// Rejected because the sequence did not advance
    pub stale_dropped: u64,
    /// Snapshots currently waiting
    pub pending: usize,
}

/// Result of a single [`SnapshotPublisher::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Queued,
    /// Queued after discarding the oldest pending snapshot
    Overflowed,
    /// Not newer than the last published snapshot for the symbol
    Stale,
    /// The receiving side is gone
    Closed,
}

#[derive(Debug, Default)]
struct SymbolQueue {
    queue: VecDeque<VisualSnapshot>,
    last_published: u64,
}

#[derive(Debug)]
struct Pending {
    capacity: usize,
    symbols: FnvHashMap<Symbol, SymbolQueue>,
    stats: ChannelStats,
}

#[derive(Debug)]
struct Shared {
    pending: Mutex<Pending>,
    closed: AtomicBool,
}

/// Create a connected publisher/receiver pair.
pub fn update_channel(config: &ChannelConfig) -> (SnapshotPublisher, SnapshotReceiver) {
    let shared = Arc::new(Shared {
        pending: Mutex::new(Pending {
            capacity: config.per_symbol_capacity.max(1),
            symbols: FnvHashMap::default(),
            stats: ChannelStats::default(),
        }),
        closed: AtomicBool::new(false),
    });

    (
        SnapshotPublisher {
            shared: Arc::clone(&shared),
        },
        SnapshotReceiver { shared },
    )
}

#[derive(Debug, Clone)]
pub struct SnapshotPublisher {
    shared: Arc<Shared>,
}

impl SnapshotPublisher {
    pub fn publish(&self, snapshot: VisualSnapshot) -> PublishOutcome {
        if self.is_closed() {
            return PublishOutcome::Closed;
        }

        let mut pending = self.shared.pending.lock();
        let capacity = pending.capacity;
        let Pending { symbols, stats, .. } = &mut *pending;
        let entry = symbols.entry(snapshot.symbol.clone()).or_default();

        if snapshot.sequence <= entry.last_published {
            stats.stale_dropped += 1;
            return PublishOutcome::Stale;
        }
        entry.last_published = snapshot.sequence;
        stats.published += 1;

        let outcome = if entry.queue.len() >= capacity {
            entry.queue.pop_front();
            stats.overflow_dropped += 1;
            stats.pending -= 1;
            PublishOutcome::Overflowed
        } else {
            PublishOutcome::Queued
        };
        entry.queue.push_back(snapshot);
        stats.pending += 1;
        outcome
    }

    /// Discard queued snapshots and sequence history for a symbol that is no longer aggregated.
    pub fn forget(&self, symbol: &Symbol) {
        let mut pending = self.shared.pending.lock();
        if let Some(entry) = pending.symbols.remove(symbol) {
            pending.stats.pending -= entry.queue.len();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct SnapshotReceiver {
    shared: Arc<Shared>,
}

impl SnapshotReceiver {
    /// Take every pending snapshot, keeping only the newest per symbol.
    pub fn drain(&mut self) -> Vec<VisualSnapshot> {
        let mut pending = self.shared.pending.lock();
        let Pending { symbols, stats, .. } = &mut *pending;

        let mut latest = Vec::new();
        for entry in symbols.values_mut() {
            let waiting = entry.queue.len();
            if let Some(newest) = entry.queue.pop_back() {
                stats.coalesced += (waiting - 1) as u64;
                stats.delivered += 1;
                entry.queue.clear();
                latest.push(newest);
            }
        }
        stats.pending = 0;
        latest
    }

    pub fn has_pending(&self) -> bool {
        self.shared.pending.lock().stats.pending > 0
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.pending.lock().stats
    }
}

impl Drop for SnapshotReceiver {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(symbol: &str, sequence: u64, price: f64) -> VisualSnapshot {
        VisualSnapshot {
            symbol: Symbol::new(symbol),
            sequence,
            timestamp: sequence as i64,
            price,
            previous_price: None,
            profile: Default::default(),
            volatility: Default::default(),
            range: Default::default(),
        }
    }

    #[test]
    fn test_drain_delivers_latest_per_symbol() {
        let (publisher, mut receiver) = update_channel(&ChannelConfig::default());

        publisher.publish(snapshot("BTC", 1, 100.0));
        publisher.publish(snapshot("BTC", 2, 101.0));
        publisher.publish(snapshot("ETH", 1, 10.0));

        let mut delivered = receiver.drain();
        delivered.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].sequence, 2);
        assert_eq!(delivered[0].price, 101.0);
        assert_eq!(receiver.stats().coalesced, 1);
        assert!(!receiver.has_pending());
        assert!(receiver.drain().is_empty());
    }

    #[test]
    fn test_publish_outcomes() {
        struct TestCase {
            input: VisualSnapshot,
            expected: PublishOutcome,
        }

        let (publisher, _receiver) =
            update_channel(&ChannelConfig::default().with_per_symbol_capacity(2));

        let tests = vec![
            TestCase {
                // TC0: first snapshot
                input: snapshot("BTC", 1, 100.0),
                expected: PublishOutcome::Queued,
            },
            TestCase {
                // TC1: fills the queue
                input: snapshot("BTC", 2, 100.0),
                expected: PublishOutcome::Queued,
            },
            TestCase {
                // TC2: queue full, oldest discarded
                input: snapshot("BTC", 3, 100.0),
                expected: PublishOutcome::Overflowed,
            },
            TestCase {
                // TC3: sequence did not advance
                input: snapshot("BTC", 3, 100.0),
                expected: PublishOutcome::Stale,
            },
            TestCase {
                // TC4: sequence went backwards
                input: snapshot("BTC", 1, 100.0),
                expected: PublishOutcome::Stale,
            },
            TestCase {
                // TC5: other symbols are independent
                input: snapshot("ETH", 1, 10.0),
                expected: PublishOutcome::Queued,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = publisher.publish(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_overflow_keeps_pending_bounded() {
        let (publisher, receiver) =
            update_channel(&ChannelConfig::default().with_per_symbol_capacity(4));

        for sequence in 1..=100 {
            publisher.publish(snapshot("BTC", sequence, 100.0));
        }

        let stats = receiver.stats();
        assert_eq!(stats.pending, 4);
        assert_eq!(stats.overflow_dropped, 96);
    }

    #[test]
    fn test_forget_clears_sequence_history() {
        let (publisher, mut receiver) = update_channel(&ChannelConfig::default());
        let btc = Symbol::new("BTC");
        publisher.publish(snapshot("BTC", 5, 100.0));

        publisher.forget(&btc);
        assert!(!receiver.has_pending());

        // a restarted stream counts from one again
        assert_eq!(publisher.publish(snapshot("BTC", 1, 100.0)), PublishOutcome::Queued);
        assert_eq!(receiver.drain().len(), 1);
    }

    #[test]
    fn test_publisher_sees_closed_receiver() {
        let (publisher, receiver) = update_channel(&ChannelConfig::default());
        drop(receiver);

        assert!(publisher.is_closed());
        assert_eq!(publisher.publish(snapshot("BTC", 1, 100.0)), PublishOutcome::Closed);
    }
}
