//! Rolling volume-at-price histogram.
//!
//! Bucket boundaries are anchored to the first observed price and never move. When the
//! traded range outgrows `max_buckets` the histogram re-bins at twice the width; because the
//! origin is fixed, every new boundary is also an old one. Volume expires out of the rolling
//! window at slice granularity using tick time, not wall-clock time.

use crate::snapshot::{ProfileLevel, ProfileSummary};
use fnv::FnvHashMap;
use std::collections::VecDeque;

/// Fraction of volume enclosed by the value area.
const VALUE_AREA_SHARE: f64 = 0.70;

/// Residual volume treated as empty after subtraction.
const VOLUME_EPSILON: f64 = 1e-9;

/// Bucket indices stay well inside `i64` so range arithmetic cannot overflow.
const INDEX_LIMIT: f64 = (1_u64 << 52) as f64;

/// Re-bins one trade may force before it is left out of the histogram.
const MAX_REBINS_PER_TRADE: u32 = 64;

/// Result of folding one trade into the histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileAdd {
    Added,
    /// Older than the rolling window
    Expired,
    /// Too far from the origin to bucket even after re-binning
    OutOfRange,
}

#[derive(Debug, Clone)]
struct ProfileSlice {
    start: i64,
    volumes: FnvHashMap<i64, f64>,
}

#[derive(Debug, Clone)]
pub struct VolumeProfile {
    origin: f64,
    width: f64,
    low_index: i64,
    buckets: VecDeque<f64>,
    slices: VecDeque<ProfileSlice>,
    window_ms: i64,
    slice_ms: i64,
    max_buckets: usize,
    total_volume: f64,
    rebins: u32,
}

impl VolumeProfile {
    pub fn new(origin: f64, width: f64, window_ms: i64, slice_ms: i64, max_buckets: usize) -> Self {
        // a subnormal origin can round the width down to zero
        let width = if width.is_finite() && width >= f64::MIN_POSITIVE {
            width
        } else {
            f64::MIN_POSITIVE
        };
        Self {
            origin,
            width,
            low_index: 0,
            buckets: VecDeque::new(),
            slices: VecDeque::new(),
            window_ms,
            slice_ms: slice_ms.max(1),
            max_buckets: max_buckets.max(2),
            total_volume: 0.0,
            rebins: 0,
        }
    }

    /// Fold a trade into the histogram, unless `ts` already lies outside the rolling window
    /// ending at `newest_ts`.
    pub fn add(&mut self, price: f64, volume: f64, ts: i64, newest_ts: i64) -> ProfileAdd {
        if ts < newest_ts.saturating_sub(self.window_ms) {
            return ProfileAdd::Expired;
        }

        let Some(index) = self.reserve(price) else {
            return ProfileAdd::OutOfRange;
        };
        let offset = (index - self.low_index) as usize;
        self.buckets[offset] += volume;
        self.total_volume += volume;

        let start = ts.div_euclid(self.slice_ms) * self.slice_ms;
        let position = self.slices.iter().rposition(|s| s.start <= start);
        let slice = match position {
            Some(i) if self.slices[i].start == start => &mut self.slices[i],
            Some(i) => {
                self.slices.insert(i + 1, ProfileSlice { start, volumes: FnvHashMap::default() });
                &mut self.slices[i + 1]
            }
            None => {
                self.slices.push_front(ProfileSlice { start, volumes: FnvHashMap::default() });
                &mut self.slices[0]
            }
        };
        *slice.volumes.entry(index).or_insert(0.0) += volume;

        self.expire(newest_ts);
        ProfileAdd::Added
    }

    /// Drop every slice that ended before the window starting at `newest_ts - window`.
    pub fn expire(&mut self, newest_ts: i64) {
        let horizon = newest_ts.saturating_sub(self.window_ms);
        while let Some(front) = self.slices.front() {
            if front.start + self.slice_ms > horizon {
                break;
            }
            let Some(expired) = self.slices.pop_front() else {
                break;
            };
            for (index, volume) in expired.volumes {
                if let Some(bucket) = self.bucket_mut(index) {
                    *bucket = (*bucket - volume).max(0.0);
                }
                self.total_volume -= volume;
            }
        }
        if self.total_volume < VOLUME_EPSILON {
            self.total_volume = 0.0;
        }
        self.trim();
    }

    pub fn bucket_width(&self) -> f64 {
        self.width
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn total_volume(&self) -> f64 {
        self.total_volume
    }

    pub fn rebins(&self) -> u32 {
        self.rebins
    }

    /// Lower bound of the bucket holding `price`.
    pub fn bucket_floor(&self, price: f64) -> Option<f64> {
        self.index_of(price).map(|index| self.origin + index as f64 * self.width)
    }

    pub fn summary(&self, top_n: usize) -> ProfileSummary {
        if self.total_volume <= 0.0 {
            return ProfileSummary {
                bucket_width: self.width,
                ..Default::default()
            };
        }

        let mut populated: Vec<(i64, f64)> = self
            .buckets
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > VOLUME_EPSILON)
            .map(|(offset, v)| (self.low_index + offset as i64, *v))
            .collect();
        populated.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let levels: Vec<ProfileLevel> = populated
            .iter()
            .take(top_n)
            .map(|(index, volume)| self.level(*index, *volume))
            .collect();

        ProfileSummary {
            point_of_control: levels.first().copied(),
            value_area: populated.first().map(|(poc, _)| self.value_area(*poc)),
            levels,
            total_volume: self.total_volume,
            bucket_width: self.width,
        }
    }

    fn level(&self, index: i64, volume: f64) -> ProfileLevel {
        let price_low = self.origin + index as f64 * self.width;
        ProfileLevel {
            price_low,
            price_high: price_low + self.width,
            volume,
        }
    }

    /// Expand outwards from the point of control, always taking the heavier neighbour,
    /// until the enclosed share reaches [`VALUE_AREA_SHARE`].
    fn value_area(&self, poc: i64) -> (f64, f64) {
        let target = self.total_volume * VALUE_AREA_SHARE;
        let mut low = (poc - self.low_index) as usize;
        let mut high = low;
        let mut enclosed = self.buckets[low];

        while enclosed < target && (low > 0 || high + 1 < self.buckets.len()) {
            let below = if low > 0 { Some(self.buckets[low - 1]) } else { None };
            let above = self.buckets.get(high + 1).copied();
            match (below, above) {
                (Some(b), Some(a)) if a >= b => {
                    high += 1;
                    enclosed += a;
                }
                (Some(b), _) => {
                    low -= 1;
                    enclosed += b;
                }
                (None, Some(a)) => {
                    high += 1;
                    enclosed += a;
                }
                (None, None) => break,
            }
        }

        let price_low = self.origin + (self.low_index + low as i64) as f64 * self.width;
        let price_high = self.origin + (self.low_index + high as i64 + 1) as f64 * self.width;
        (price_low, price_high)
    }

    fn index_of(&self, price: f64) -> Option<i64> {
        let index = ((price - self.origin) / self.width).floor();
        (index.is_finite() && index.abs() < INDEX_LIMIT).then_some(index as i64)
    }

    fn bucket_mut(&mut self, index: i64) -> Option<&mut f64> {
        if index < self.low_index {
            return None;
        }
        self.buckets.get_mut((index - self.low_index) as usize)
    }

    /// Make room for `price`, extending the range or re-binning. Returns its bucket index,
    /// or `None` (leaving the histogram untouched) if it cannot be bucketed within
    /// [`MAX_REBINS_PER_TRADE`] re-bins.
    fn reserve(&mut self, price: f64) -> Option<i64> {
        let rebins = self.rebins_needed(price)?;
        for _ in 0..rebins {
            self.rebin();
        }

        let index = self.index_of(price)?;
        if self.buckets.is_empty() {
            self.low_index = index;
            self.buckets.push_back(0.0);
            return Some(index);
        }
        while index < self.low_index {
            self.buckets.push_front(0.0);
            self.low_index -= 1;
        }
        while index > self.low_index + self.buckets.len() as i64 - 1 {
            self.buckets.push_back(0.0);
        }
        Some(index)
    }

    /// Fewest doublings of the bucket width after which `price` and the current range
    /// fit in `max_buckets`.
    fn rebins_needed(&self, price: f64) -> Option<u32> {
        let offset = price - self.origin;
        let high_index = self.low_index + self.buckets.len() as i64 - 1;
        (0..=MAX_REBINS_PER_TRADE).find(|rebins| {
            let scale = 2_f64.powi(*rebins as i32);
            let index = (offset / (self.width * scale)).floor();
            if !(index.is_finite() && index.abs() < INDEX_LIMIT) {
                return false;
            }
            if self.buckets.is_empty() {
                return true;
            }
            let low = (self.low_index as f64 / scale).floor();
            let high = (high_index as f64 / scale).floor();
            high.max(index) - low.min(index) + 1.0 <= self.max_buckets as f64
        })
    }

    fn rebin(&mut self) {
        let new_low = self.low_index.div_euclid(2);
        let mut merged: VecDeque<f64> = VecDeque::with_capacity(self.buckets.len() / 2 + 1);
        for (offset, volume) in self.buckets.iter().enumerate() {
            let slot = ((self.low_index + offset as i64).div_euclid(2) - new_low) as usize;
            if slot == merged.len() {
                merged.push_back(0.0);
            }
            merged[slot] += volume;
        }

        for slice in self.slices.iter_mut() {
            let mut remapped = FnvHashMap::default();
            for (index, volume) in slice.volumes.drain() {
                *remapped.entry(index.div_euclid(2)).or_insert(0.0) += volume;
            }
            slice.volumes = remapped;
        }

        self.low_index = new_low;
        self.buckets = merged;
        self.width *= 2.0;
        self.rebins += 1;
    }

    fn trim(&mut self) {
        while self.buckets.len() > 1 && self.buckets.front().is_some_and(|v| *v <= VOLUME_EPSILON) {
            self.buckets.pop_front();
            self.low_index += 1;
        }
        while self.buckets.len() > 1 && self.buckets.back().is_some_and(|v| *v <= VOLUME_EPSILON) {
            self.buckets.pop_back();
        }
        if self.total_volume == 0.0 && self.slices.is_empty() {
            self.buckets.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 60 * 60 * 1000;

    fn profile() -> VolumeProfile {
        VolumeProfile::new(100.0, 1.0, 24 * HOUR, HOUR, 64)
    }

    #[test]
    fn test_profile_accumulates_by_bucket() {
        let mut profile = profile();
        profile.add(100.2, 1.0, 1_000, 1_000);
        profile.add(100.8, 2.0, 1_001, 1_001);
        profile.add(102.5, 4.0, 1_002, 1_002);

        let summary = profile.summary(10);
        assert_eq!(summary.levels.len(), 2);
        assert_eq!(summary.levels[0].price_low, 102.0);
        assert_eq!(summary.levels[0].volume, 4.0);
        assert_eq!(summary.levels[1].price_low, 100.0);
        assert_eq!(summary.levels[1].volume, 3.0);
        assert_eq!(summary.total_volume, 7.0);
        assert_eq!(summary.point_of_control.map(|l| l.price_low), Some(102.0));
    }

    #[test]
    fn test_profile_extends_below_origin() {
        let mut profile = profile();
        profile.add(100.0, 1.0, 1, 1);
        profile.add(95.5, 1.0, 2, 2);

        assert_eq!(profile.bucket_count(), 6);
        assert_eq!(profile.bucket_floor(95.5), Some(95.0));
        assert_eq!(profile.rebins(), 0);
    }

    #[test]
    fn test_profile_rebins_on_overflow_keeping_boundaries_aligned() {
        let mut profile = VolumeProfile::new(100.0, 1.0, 24 * HOUR, HOUR, 4);
        profile.add(100.5, 1.0, 1, 1);
        profile.add(103.5, 1.0, 2, 2);
        assert_eq!(profile.rebins(), 0);

        // 104.5 needs 5 buckets of width 1 -> width 2
        profile.add(104.5, 1.0, 3, 3);
        assert_eq!(profile.rebins(), 1);
        assert_eq!(profile.bucket_width(), 2.0);
        assert_eq!(profile.bucket_floor(103.5), Some(102.0));
        assert_eq!(profile.total_volume(), 3.0);

        let summary = profile.summary(10);
        let volume: f64 = summary.levels.iter().map(|l| l.volume).sum();
        assert_eq!(volume, 3.0);
    }

    #[test]
    fn test_profile_expires_volume_outside_window() {
        let mut profile = profile();
        profile.add(100.5, 5.0, 0, 0);
        profile.add(101.5, 1.0, 10 * HOUR, 10 * HOUR);
        assert_eq!(profile.total_volume(), 6.0);

        // 25h later the first slice [0, 1h) is entirely outside the window
        profile.add(101.5, 1.0, 25 * HOUR + 1, 25 * HOUR + 1);
        assert_eq!(profile.total_volume(), 2.0);
        let summary = profile.summary(10);
        assert_eq!(summary.levels.len(), 1);
        assert_eq!(summary.levels[0].price_low, 101.0);
    }

    #[test]
    fn test_profile_rejects_ticks_older_than_window() {
        let mut profile = profile();
        assert_eq!(profile.add(100.0, 1.0, 30 * HOUR, 30 * HOUR), ProfileAdd::Added);
        assert_eq!(profile.add(100.0, 1.0, 5 * HOUR, 30 * HOUR), ProfileAdd::Expired);
        assert_eq!(profile.total_volume(), 1.0);
    }

    #[test]
    fn test_profile_value_area_encloses_seventy_percent() {
        let mut profile = profile();
        // volumes by bucket 100..105: 1, 2, 10, 3, 1
        for (price, volume) in [(100.5, 1.0), (101.5, 2.0), (102.5, 10.0), (103.5, 3.0), (104.5, 1.0)] {
            profile.add(price, volume, 1, 1);
        }

        let summary = profile.summary(3);
        assert_eq!(summary.levels.len(), 3);
        // 10 alone is 58.8% of 17, adding 103 (3) reaches 76.5%
        assert_eq!(summary.value_area, Some((102.0, 104.0)));
    }

    #[test]
    fn test_profile_rebins_to_fit_outlier_price() {
        let mut profile = VolumeProfile::new(100.0, 1.0, 24 * HOUR, HOUR, 64);
        assert_eq!(profile.add(100.0, 1.0, 1, 1), ProfileAdd::Added);
        assert_eq!(profile.add(1e20, 1.0, 2, 2), ProfileAdd::Added);

        assert!(profile.rebins() > 0);
        assert!(profile.bucket_count() <= 64);
        assert_eq!(profile.total_volume(), 2.0);
        assert_eq!(profile.summary(10).levels.len(), 2);
    }

    #[test]
    fn test_profile_leaves_out_unbucketable_prices() {
        struct TestCase {
            origin: f64,
            width: f64,
            price: f64,
            expected: ProfileAdd,
        }

        let tests = vec![
            TestCase {
                // TC0: zero width from a subnormal origin
                origin: 1e-310,
                width: 0.0,
                price: 1e-310,
                expected: ProfileAdd::Added,
            },
            TestCase {
                // TC1: too many doublings needed from a subnormal width
                origin: 1e-310,
                width: 0.0,
                price: 100.0,
                expected: ProfileAdd::OutOfRange,
            },
            TestCase {
                // TC2: largest finite price
                origin: 100.0,
                width: 1.0,
                price: f64::MAX,
                expected: ProfileAdd::OutOfRange,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut profile = VolumeProfile::new(test.origin, test.width, 24 * HOUR, HOUR, 64);
            profile.add(test.origin, 1.0, 1, 1);
            let width = profile.bucket_width();

            assert_eq!(profile.add(test.price, 1.0, 2, 2), test.expected, "TC{} failed", index);
            assert!(width > 0.0, "TC{} failed", index);
            if test.expected == ProfileAdd::OutOfRange {
                assert_eq!(profile.bucket_width(), width, "TC{} failed", index);
                assert_eq!(profile.total_volume(), 1.0, "TC{} failed", index);
            }
        }
    }

    #[test]
    fn test_empty_profile_summary() {
        let profile = profile();
        let summary = profile.summary(5);
        assert!(summary.levels.is_empty());
        assert_eq!(summary.point_of_control, None);
        assert_eq!(summary.bucket_width, 1.0);
    }
}
