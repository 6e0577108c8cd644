//! Settings for the aggregation domain, the update channel and the rendering domain.
//!
//! Every value has a default, can be overridden through a builder-style `with_*` setter,
//! and can be read from `SURFACE_*` environment variables via [`Settings::from_env`].

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

/// Top-level settings bundle shared by the aggregation and rendering domains.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub aggregation: AggregationConfig,
    pub channel: ChannelConfig,
    pub render: RenderConfig,
}

/// Tick normaliser & aggregator settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Fixed cadence of the aggregation cycle
    #[serde(with = "duration_ms")]
    pub cycle_interval: Duration,
    /// Capacity of the per-symbol recent tick ring buffer
    pub ring_capacity: usize,
    /// Rolling window covered by the volume profile
    #[serde(with = "duration_ms")]
    pub profile_window: Duration,
    /// Granularity at which profile volume expires out of the window
    #[serde(with = "duration_ms")]
    pub profile_slice: Duration,
    /// Number of price levels reported in a snapshot's profile summary
    pub profile_top_n: usize,
    /// Bucket count above which the profile re-bins at double width
    pub max_profile_buckets: usize,
    /// Bucket width in basis points of the first observed price
    pub bucket_width_bps: f64,
    /// Ticks older than the newest buffered tick by more than this skip volatility
    #[serde(with = "duration_ms")]
    pub late_tolerance: Duration,
    /// Whether late ticks still contribute to the volume profile
    pub late_ticks_in_profile: bool,
    /// EWMA decay factor for the variance of log returns
    pub ewma_lambda: f64,
    /// Number of completed sessions averaged into the ADR
    pub adr_days: usize,
    /// Session boundary offset from 00:00 UTC, in whole hours
    pub session_offset_hours: i64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_millis(50),
            ring_capacity: 1024,
            profile_window: Duration::from_secs(24 * 60 * 60),
            profile_slice: Duration::from_secs(60 * 60),
            profile_top_n: 12,
            max_profile_buckets: 512,
            bucket_width_bps: 5.0,
            late_tolerance: Duration::from_secs(2),
            late_ticks_in_profile: true,
            ewma_lambda: 0.94,
            adr_days: 14,
            session_offset_hours: 0,
        }
    }
}

impl AggregationConfig {
    pub fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    pub fn with_profile_window(mut self, window: Duration, slice: Duration) -> Self {
        self.profile_window = window;
        self.profile_slice = slice;
        self
    }

    pub fn with_profile_top_n(mut self, top_n: usize) -> Self {
        self.profile_top_n = top_n;
        self
    }

    pub fn with_max_profile_buckets(mut self, max_buckets: usize) -> Self {
        self.max_profile_buckets = max_buckets;
        self
    }

    pub fn with_bucket_width_bps(mut self, bps: f64) -> Self {
        self.bucket_width_bps = bps;
        self
    }

    pub fn with_late_tolerance(mut self, tolerance: Duration) -> Self {
        self.late_tolerance = tolerance;
        self
    }

    pub fn with_late_ticks_in_profile(mut self, include: bool) -> Self {
        self.late_ticks_in_profile = include;
        self
    }

    pub fn with_ewma_lambda(mut self, lambda: f64) -> Self {
        self.ewma_lambda = lambda;
        self
    }

    pub fn with_adr_days(mut self, days: usize) -> Self {
        self.adr_days = days;
        self
    }

    pub fn with_session_offset_hours(mut self, hours: i64) -> Self {
        self.session_offset_hours = hours;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_interval.is_zero() {
            return Err(ConfigError::Zero { key: "cycle_interval" });
        }
        if self.ring_capacity == 0 {
            return Err(ConfigError::Zero { key: "ring_capacity" });
        }
        if self.profile_slice.is_zero() || self.profile_window < self.profile_slice {
            return Err(ConfigError::OutOfRange {
                key: "profile_slice",
                value: format!("{:?} (window {:?})", self.profile_slice, self.profile_window),
            });
        }
        if self.profile_top_n == 0 {
            return Err(ConfigError::Zero { key: "profile_top_n" });
        }
        if self.max_profile_buckets < 2 {
            return Err(ConfigError::OutOfRange {
                key: "max_profile_buckets",
                value: self.max_profile_buckets.to_string(),
            });
        }
        if !(self.bucket_width_bps.is_finite() && self.bucket_width_bps > 0.0) {
            return Err(ConfigError::OutOfRange {
                key: "bucket_width_bps",
                value: self.bucket_width_bps.to_string(),
            });
        }
        if !(self.ewma_lambda > 0.0 && self.ewma_lambda < 1.0) {
            return Err(ConfigError::OutOfRange {
                key: "ewma_lambda",
                value: self.ewma_lambda.to_string(),
            });
        }
        if self.adr_days == 0 {
            return Err(ConfigError::Zero { key: "adr_days" });
        }
        if !(-23..=23).contains(&self.session_offset_hours) {
            return Err(ConfigError::OutOfRange {
                key: "session_offset_hours",
                value: self.session_offset_hours.to_string(),
            });
        }
        Ok(())
    }
}

/// Cross-domain update channel settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Undelivered snapshots retained per symbol before the oldest is discarded
    pub per_symbol_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            per_symbol_capacity: 4,
        }
    }
}

impl ChannelConfig {
    pub fn with_per_symbol_capacity(mut self, capacity: usize) -> Self {
        self.per_symbol_capacity = capacity;
        self
    }
}

/// Rendering domain settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Total time budget shared by every display within one frame tick
    #[serde(with = "duration_us")]
    pub frame_budget: Duration,
    /// Consecutive redraw failures that trip a display's circuit breaker
    pub failure_threshold: u32,
    /// How long a tripped display stays unavailable before a trial redraw
    #[serde(with = "duration_ms")]
    pub breaker_cooldown: Duration,
    /// A display with no snapshot for this long is shown as stale
    #[serde(with = "duration_ms")]
    pub stale_after: Duration,
    /// Dirty regions beyond this count collapse into a full-surface invalidation
    pub max_dirty_regions: usize,
    /// Merge regions while the union stays below this multiple of their summed areas
    pub coalesce_factor: f64,
    /// Surface size used until the host assigns an area
    pub default_width: u16,
    pub default_height: u16,
    /// Frame times kept for percentile reporting
    pub frame_history: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frame_budget: Duration::from_micros(16_667),
            failure_threshold: 3,
            breaker_cooldown: Duration::from_secs(5),
            stale_after: Duration::from_secs(5),
            max_dirty_regions: 32,
            coalesce_factor: 1.5,
            default_width: 40,
            default_height: 12,
            frame_history: 600,
        }
    }
}

impl RenderConfig {
    pub fn with_frame_budget(mut self, budget: Duration) -> Self {
        self.frame_budget = budget;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_breaker_cooldown(mut self, cooldown: Duration) -> Self {
        self.breaker_cooldown = cooldown;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_max_dirty_regions(mut self, max: usize) -> Self {
        self.max_dirty_regions = max;
        self
    }

    pub fn with_default_size(mut self, width: u16, height: u16) -> Self {
        self.default_width = width;
        self.default_height = height;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_budget.is_zero() {
            return Err(ConfigError::Zero { key: "frame_budget" });
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Zero { key: "failure_threshold" });
        }
        if self.max_dirty_regions == 0 {
            return Err(ConfigError::Zero { key: "max_dirty_regions" });
        }
        if !(self.coalesce_factor.is_finite() && self.coalesce_factor >= 1.0) {
            return Err(ConfigError::OutOfRange {
                key: "coalesce_factor",
                value: self.coalesce_factor.to_string(),
            });
        }
        if self.default_width == 0 || self.default_height == 0 {
            return Err(ConfigError::Zero { key: "default_size" });
        }
        Ok(())
    }
}

impl Settings {
    pub fn with_aggregation(mut self, aggregation: AggregationConfig) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_render(mut self, render: RenderConfig) -> Self {
        self.render = render;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.aggregation.validate()?;
        self.render.validate()?;
        if self.channel.per_symbol_capacity == 0 {
            return Err(ConfigError::Zero { key: "per_symbol_capacity" });
        }
        Ok(())
    }

    /// Read settings from `SURFACE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();
        let agg = &mut settings.aggregation;

        if let Some(ms) = parse_var::<u64, _>(&lookup, "SURFACE_CYCLE_MS")? {
            agg.cycle_interval = Duration::from_millis(ms);
        }
        if let Some(capacity) = parse_var(&lookup, "SURFACE_RING_CAPACITY")? {
            agg.ring_capacity = capacity;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SURFACE_PROFILE_WINDOW_SECS")? {
            agg.profile_window = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SURFACE_PROFILE_SLICE_SECS")? {
            agg.profile_slice = Duration::from_secs(secs);
        }
        if let Some(top_n) = parse_var(&lookup, "SURFACE_PROFILE_TOP_N")? {
            agg.profile_top_n = top_n;
        }
        if let Some(max) = parse_var(&lookup, "SURFACE_PROFILE_MAX_BUCKETS")? {
            agg.max_profile_buckets = max;
        }
        if let Some(bps) = parse_var(&lookup, "SURFACE_PROFILE_BUCKET_BPS")? {
            agg.bucket_width_bps = bps;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SURFACE_LATE_TOLERANCE_MS")? {
            agg.late_tolerance = Duration::from_millis(ms);
        }
        if let Some(include) = parse_var(&lookup, "SURFACE_LATE_IN_PROFILE")? {
            agg.late_ticks_in_profile = include;
        }
        if let Some(lambda) = parse_var(&lookup, "SURFACE_EWMA_LAMBDA")? {
            agg.ewma_lambda = lambda;
        }
        if let Some(days) = parse_var(&lookup, "SURFACE_ADR_DAYS")? {
            agg.adr_days = days;
        }
        if let Some(hours) = parse_var(&lookup, "SURFACE_SESSION_OFFSET_HOURS")? {
            agg.session_offset_hours = hours;
        }

        if let Some(capacity) = parse_var(&lookup, "SURFACE_CHANNEL_PER_SYMBOL")? {
            settings.channel.per_symbol_capacity = capacity;
        }

        let render = &mut settings.render;
        if let Some(us) = parse_var::<u64, _>(&lookup, "SURFACE_FRAME_BUDGET_US")? {
            render.frame_budget = Duration::from_micros(us);
        }
        if let Some(threshold) = parse_var(&lookup, "SURFACE_BREAKER_THRESHOLD")? {
            render.failure_threshold = threshold;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SURFACE_BREAKER_COOLDOWN_MS")? {
            render.breaker_cooldown = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SURFACE_STALE_AFTER_MS")? {
            render.stale_after = Duration::from_millis(ms);
        }
        if let Some(max) = parse_var(&lookup, "SURFACE_MAX_DIRTY_REGIONS")? {
            render.max_dirty_regions = max;
        }
        if let Some(factor) = parse_var(&lookup, "SURFACE_COALESCE_FACTOR")? {
            render.coalesce_factor = factor;
        }

        settings.validate()?;
        Ok(settings)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse {
                key: key.to_string(),
                value: raw,
            }),
    }
}

/// Colour scheme applied to a display's layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Green/red by price direction
    #[default]
    Directional,
    /// Gradient by relative intensity
    Spectrum,
    /// One accent colour throughout
    Single,
}

/// Per-display visual options supplied by the workspace chrome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisualConfig {
    pub show_market_profile: bool,
    pub show_volatility_indicator: bool,
    pub show_day_range: bool,
    pub color_mode: ColorMode,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            show_market_profile: true,
            show_volatility_indicator: true,
            show_day_range: true,
            color_mode: ColorMode::default(),
        }
    }
}

/// Sub-cell resolution used for bars, the terminal analogue of a pixel-density scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Density {
    /// Whole-cell blocks
    #[default]
    Standard,
    /// Eighth-cell blocks
    High,
}

impl Density {
    /// Sub-steps drawable within one cell.
    pub fn scale(&self) -> u8 {
        match self {
            Density::Standard => 1,
            Density::High => 8,
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            Density::Standard => Density::High,
            Density::High => Density::Standard,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod duration_us {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.render.frame_budget, Duration::from_micros(16_667));
        assert_eq!(settings.render.failure_threshold, 3);
        assert_eq!(settings.aggregation.profile_window, Duration::from_secs(86_400));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SURFACE_CYCLE_MS", "25"),
            ("SURFACE_LATE_TOLERANCE_MS", "500"),
            ("SURFACE_LATE_IN_PROFILE", "false"),
            ("SURFACE_BREAKER_THRESHOLD", "5"),
        ]);

        let settings = Settings::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(settings.aggregation.cycle_interval, Duration::from_millis(25));
        assert_eq!(settings.aggregation.late_tolerance, Duration::from_millis(500));
        assert!(!settings.aggregation.late_ticks_in_profile);
        assert_eq!(settings.render.failure_threshold, 5);
        assert_eq!(settings.render.stale_after, Duration::from_secs(5));
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        struct TestCase {
            key: &'static str,
            value: &'static str,
        }

        let tests = vec![
            TestCase {
                // TC0: unparsable number
                key: "SURFACE_RING_CAPACITY",
                value: "lots",
            },
            TestCase {
                // TC1: lambda outside (0, 1)
                key: "SURFACE_EWMA_LAMBDA",
                value: "1.5",
            },
            TestCase {
                // TC2: zero budget
                key: "SURFACE_FRAME_BUDGET_US",
                value: "0",
            },
            TestCase {
                // TC3: coalesce factor below one
                key: "SURFACE_COALESCE_FACTOR",
                value: "0.5",
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let result = Settings::from_lookup(|key| {
                (key == test.key).then(|| test.value.to_string())
            });
            assert!(result.is_err(), "TC{} failed", index);
        }
    }

    #[test]
    fn test_visual_config_json_shape() {
        let config: VisualConfig = serde_json::from_str(
            r#"{"showMarketProfile":false,"showVolatilityIndicator":true,"showDayRange":true,"colorMode":"spectrum"}"#,
        )
        .unwrap();

        assert!(!config.show_market_profile);
        assert_eq!(config.color_mode, ColorMode::Spectrum);

        let partial: VisualConfig = serde_json::from_str(r#"{"colorMode":"single"}"#).unwrap();
        assert!(partial.show_market_profile);
        assert_eq!(partial.color_mode, ColorMode::Single);
    }

    #[test]
    fn test_density_scale() {
        assert_eq!(Density::Standard.scale(), 1);
        assert_eq!(Density::High.scale(), 8);
        assert_eq!(Density::Standard.toggled(), Density::High);
    }
}
