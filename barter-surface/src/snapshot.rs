//! Immutable per-symbol analytics handed from the aggregation domain to the rendering domain.

use crate::tick::Symbol;
use serde::{Deserialize, Serialize};

/// Versioned summary of one symbol's analytics at the end of an aggregation cycle.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VisualSnapshot {
    pub symbol: Symbol,
    /// Strictly increasing per symbol
    pub sequence: u64,
    /// Timestamp of the newest tick folded into this snapshot
    pub timestamp: i64,
    pub price: f64,
    /// Price of the previous snapshot, used for directional colouring
    pub previous_price: Option<f64>,
    pub profile: ProfileSummary,
    pub volatility: VolatilitySummary,
    pub range: RangeSummary,
}

impl VisualSnapshot {
    /// Direction of the last price change: 1 up, -1 down, 0 flat or unknown.
    pub fn direction(&self) -> i8 {
        match self.previous_price {
            Some(prev) if self.price > prev => 1,
            Some(prev) if self.price < prev => -1,
            _ => 0,
        }
    }
}

/// One price level of the volume profile.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ProfileLevel {
    pub price_low: f64,
    pub price_high: f64,
    pub volume: f64,
}

impl ProfileLevel {
    pub fn mid(&self) -> f64 {
        (self.price_low + self.price_high) / 2.0
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.price_low && price < self.price_high
    }
}

/// Top-N levels of the rolling volume profile.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ProfileSummary {
    /// Highest-volume levels, sorted by descending volume
    pub levels: Vec<ProfileLevel>,
    /// Level holding the most volume
    pub point_of_control: Option<ProfileLevel>,
    /// Price bounds containing ~70% of the window's volume around the point of control
    pub value_area: Option<(f64, f64)>,
    pub total_volume: f64,
    pub bucket_width: f64,
}

impl ProfileSummary {
    /// Levels re-ordered by descending price, the order they are drawn in.
    pub fn levels_by_price(&self) -> Vec<ProfileLevel> {
        let mut levels = self.levels.clone();
        levels.sort_by(|a, b| b.price_low.total_cmp(&a.price_low));
        levels
    }

    pub fn max_volume(&self) -> f64 {
        self.levels.iter().map(|l| l.volume).fold(0.0, f64::max)
    }
}

/// Volatility trend relative to the previous cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum VolTrend {
    Expanding,
    Contracting,
    #[default]
    Stable,
}

impl VolTrend {
    pub fn label(&self) -> &'static str {
        match self {
            VolTrend::Expanding => "EXPANDING",
            VolTrend::Contracting => "CONTRACTING",
            VolTrend::Stable => "STABLE",
        }
    }

    pub fn arrow(&self) -> &'static str {
        match self {
            VolTrend::Expanding => "▲",
            VolTrend::Contracting => "▼",
            VolTrend::Stable => "→",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct VolatilitySummary {
    /// Per-tick standard deviation of log returns
    pub sigma: f64,
    /// `sigma` expressed in basis points
    pub sigma_bps: f64,
    pub trend: VolTrend,
    /// Returns folded into the estimate so far
    pub samples: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct RangeSummary {
    pub day_high: f64,
    pub day_low: f64,
    /// Average of prior completed sessions' ranges
    pub adr: Option<f64>,
    /// Completed sessions folded into `adr`
    pub adr_days: usize,
}

impl RangeSummary {
    pub fn day_range(&self) -> f64 {
        (self.day_high - self.day_low).max(0.0)
    }

    /// Today's range as a fraction of the ADR.
    pub fn range_to_adr(&self) -> Option<f64> {
        match self.adr {
            Some(adr) if adr > 0.0 => Some(self.day_range() / adr),
            _ => None,
        }
    }

    /// Position of `price` inside the day range, 0.0 at the low and 1.0 at the high.
    pub fn position(&self, price: f64) -> Option<f64> {
        let range = self.day_range();
        if range > 0.0 {
            Some(((price - self.day_low) / range).clamp(0.0, 1.0))
        } else {
            None
        }
    }
}
