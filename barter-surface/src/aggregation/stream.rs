//! Per-symbol aggregation state.

use super::{
    profile::{ProfileAdd, VolumeProfile},
    range::{DayRange, RangeUpdate},
    ring::{TickRecord, TickRing},
    volatility::EwmaVolatility,
};
use crate::{
    config::AggregationConfig,
    snapshot::VisualSnapshot,
    tick::{Symbol, Tick},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How one tick was folded into the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// In order (or within tolerance): every analytic updated
    Accepted,
    /// Beyond the out-of-order tolerance: volatility skipped
    Late,
}

/// Counters kept per symbol stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct StreamStats {
    pub accepted: u64,
    pub late: u64,
    /// Ticks too old for the profile window
    pub expired: u64,
    /// Ticks priced too far from the profile origin to bucket
    pub out_of_range: u64,
    /// Ticks belonging to an already completed session
    pub previous_session: u64,
    pub emitted: u64,
}

#[derive(Debug, Clone)]
pub struct SymbolStream {
    symbol: Symbol,
    config: AggregationConfig,
    ring: TickRing,
    profile: Option<VolumeProfile>,
    volatility: EwmaVolatility,
    range: DayRange,
    last_price: Option<f64>,
    last_ts: i64,
    emitted_price: Option<f64>,
    sequence: u64,
    changed: bool,
    stats: StreamStats,
}

impl SymbolStream {
    pub fn new(symbol: Symbol, config: &AggregationConfig) -> Self {
        Self {
            symbol,
            config: config.clone(),
            ring: TickRing::new(config.ring_capacity),
            profile: None,
            volatility: EwmaVolatility::new(config.ewma_lambda),
            range: DayRange::new(config.adr_days, config.session_offset_hours),
            last_price: None,
            last_ts: 0,
            emitted_price: None,
            sequence: 0,
            changed: false,
            stats: StreamStats::default(),
        }
    }

    /// Continue numbering snapshots after `sequence`.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn ring(&self) -> &TickRing {
        &self.ring
    }

    pub fn ingest(&mut self, tick: &Tick) -> IngestOutcome {
        let tolerance = self.config.late_tolerance.as_millis() as i64;
        let late = self
            .ring
            .newest_timestamp()
            .is_some_and(|newest| newest - tick.timestamp > tolerance);

        self.ring.push(TickRecord {
            price: tick.price,
            volume: tick.volume,
            timestamp: tick.timestamp,
        });
        let newest = self.ring.newest_timestamp().unwrap_or(tick.timestamp);

        if !late {
            self.volatility.update(tick.price);
            if tick.timestamp >= self.last_ts {
                self.last_price = Some(tick.price);
                self.last_ts = tick.timestamp;
            }
        } else {
            debug!(
                symbol = %self.symbol,
                lag_ms = newest - tick.timestamp,
                "late tick excluded from volatility"
            );
        }

        if !late || self.config.late_ticks_in_profile {
            let profile = self.profile.get_or_insert_with(|| {
                let width = tick.price * self.config.bucket_width_bps / 10_000.0;
                VolumeProfile::new(
                    tick.price,
                    width,
                    self.config.profile_window.as_millis() as i64,
                    self.config.profile_slice.as_millis() as i64,
                    self.config.max_profile_buckets,
                )
            });
            match profile.add(tick.price, tick.volume, tick.timestamp, newest) {
                ProfileAdd::Added => {}
                ProfileAdd::Expired => self.stats.expired += 1,
                ProfileAdd::OutOfRange => {
                    self.stats.out_of_range += 1;
                    debug!(symbol = %self.symbol, price = tick.price, "price outside profile range");
                }
            }
        }

        if self.range.update(tick.price, tick.timestamp) == RangeUpdate::Ignored {
            self.stats.previous_session += 1;
        }

        self.changed = true;
        if late {
            self.stats.late += 1;
            IngestOutcome::Late
        } else {
            self.stats.accepted += 1;
            IngestOutcome::Accepted
        }
    }

    /// Emit a snapshot if anything changed since the previous cycle.
    pub fn cycle(&mut self) -> Option<VisualSnapshot> {
        if !self.changed {
            return None;
        }
        self.changed = false;

        // Only late ticks so far: nothing in-order to price from
        let price = self.last_price.or_else(|| self.ring.latest().map(|t| t.price))?;

        self.sequence += 1;
        self.stats.emitted += 1;
        let profile = self
            .profile
            .as_ref()
            .map(|p| p.summary(self.config.profile_top_n))
            .unwrap_or_default();

        let snapshot = VisualSnapshot {
            symbol: self.symbol.clone(),
            sequence: self.sequence,
            timestamp: self.ring.newest_timestamp().unwrap_or(self.last_ts),
            price,
            previous_price: self.emitted_price.replace(price),
            profile,
            volatility: self.volatility.summary(),
            range: self.range.summary(),
        };
        Some(snapshot)
    }
}
