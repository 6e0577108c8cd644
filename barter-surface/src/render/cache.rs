//! Painted layer cache.

use super::layer::LayerId;
use crate::{config::Density, display::DisplayId};
use ratatui::{buffer::Buffer, layout::Rect};
use fnv::FnvHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub display: DisplayId,
    pub layer: LayerId,
    pub density: Density,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    version: u64,
    buffer: Buffer,
}

/// Cached layer buffers for one display. An entry is valid only while both the
/// layer's source version and the area it was painted for are unchanged.
#[derive(Debug, Clone, Default)]
pub struct ContentCache {
    entries: FnvHashMap<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: &CacheKey, version: u64, area: Rect) -> Option<&Buffer> {
        match self.entries.get(key) {
            Some(entry) if entry.version == version && entry.buffer.area == area => {
                self.hits += 1;
                Some(&entry.buffer)
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    /// Lookup without touching the hit/miss counters.
    pub fn peek(&self, key: &CacheKey) -> Option<&Buffer> {
        self.entries.get(key).map(|entry| &entry.buffer)
    }

    pub fn insert(&mut self, key: CacheKey, version: u64, buffer: Buffer) {
        self.entries.insert(key, CacheEntry { version, buffer });
    }

    /// Remove every entry painted at `density`.
    pub fn purge_density(&mut self, density: Density) {
        self.entries.retain(|key, _| key.density != density);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(layer: LayerId, density: Density) -> CacheKey {
        CacheKey {
            display: DisplayId::from(7),
            layer,
            density,
        }
    }

    #[test]
    fn test_cache_hit_requires_matching_version_and_area() {
        let mut cache = ContentCache::new();
        let area = Rect::new(0, 0, 4, 2);
        let frame = key(LayerId::Frame, Density::Standard);
        cache.insert(frame, 1, Buffer::empty(area));

        assert!(cache.get(&frame, 1, area).is_some());
        assert!(cache.get(&frame, 2, area).is_none());
        assert!(cache.get(&frame, 1, Rect::new(0, 0, 5, 2)).is_none());
        assert!(cache.get(&key(LayerId::Frame, Density::High), 1, area).is_none());

        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 3);
        assert_eq!(cache.hit_ratio(), 0.25);
    }

    #[test]
    fn test_cache_purge() {
        let mut cache = ContentCache::new();
        let area = Rect::new(0, 0, 4, 2);
        cache.insert(key(LayerId::Frame, Density::Standard), 0, Buffer::empty(area));
        cache.insert(key(LayerId::Profile, Density::Standard), 0, Buffer::empty(area));
        cache.insert(key(LayerId::Profile, Density::High), 0, Buffer::empty(area));

        cache.purge_density(Density::High);
        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&key(LayerId::Profile, Density::High)).is_none());
        assert!(cache.peek(&key(LayerId::Profile, Density::Standard)).is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}
