use super::{
    cache::{CacheKey, ContentCache},
    layer::{DisplayLayout, DisplayView, LayerId, LayerPainter},
    region::{DirtySet, cells},
    surface::Surface,
};
use crate::{
    config::{Density, RenderConfig, VisualConfig},
    display::DisplayId,
    error::RenderError,
};
use ratatui::{
    buffer::{Buffer, Cell},
    layout::Rect,
};
use tracing::trace;

/// Summary of one successful [`DirtyRegionRenderer::redraw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RedrawStats {
    pub regions: usize,
    pub cells: u32,
    pub full: bool,
    pub layers_painted: usize,
    pub layers_cached: usize,
}

enum LayerSource {
    Cached,
    Fresh(Buffer),
}

/// Tracks the stale areas of one display surface and repaints only those.
///
/// Every layer is painted into its own buffer and composited onto the surface,
/// clipped to each dirty region. Cells left at [`Cell::default`] by a layer are
/// transparent so lower layers show through.
#[derive(Debug, Clone)]
pub struct DirtyRegionRenderer {
    display: DisplayId,
    layout: DisplayLayout,
    visual: VisualConfig,
    dirty: DirtySet,
    cache: ContentCache,
    versions: [u64; LayerId::ALL.len()],
    selective_renders: u64,
    full_renders: u64,
}

impl DirtyRegionRenderer {
    /// New renderer with the whole area dirty.
    pub fn new(display: DisplayId, area: Rect, visual: VisualConfig, config: &RenderConfig) -> Self {
        let mut dirty = DirtySet::new(area, config.max_dirty_regions, config.coalesce_factor);
        dirty.invalidate_all();
        Self {
            display,
            layout: DisplayLayout::compute(area, &visual),
            visual,
            dirty,
            cache: ContentCache::new(),
            versions: [0; LayerId::ALL.len()],
            selective_renders: 0,
            full_renders: 0,
        }
    }

    pub fn layout(&self) -> &DisplayLayout {
        &self.layout
    }

    pub fn dirty(&self) -> &DirtySet {
        &self.dirty
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn layer_version(&self, layer: LayerId) -> u64 {
        self.versions[layer.index()]
    }

    pub fn selective_renders(&self) -> u64 {
        self.selective_renders
    }

    pub fn full_renders(&self) -> u64 {
        self.full_renders
    }

    pub fn invalidate(&mut self, region: Rect) {
        self.dirty.add(region);
    }

    pub fn invalidate_all(&mut self) {
        self.dirty.invalidate_all();
    }

    /// The layer's source data changed: drop its cached content and dirty its area.
    pub fn invalidate_layer(&mut self, layer: LayerId) {
        self.versions[layer.index()] += 1;
        if let Some(area) = self.layout.area_of(layer) {
            self.dirty.add(area);
        }
    }

    /// New surface area. Layout is recomputed and everything repainted.
    pub fn set_area(&mut self, area: Rect) {
        self.layout = DisplayLayout::compute(area, &self.visual);
        self.dirty.set_bounds(area);
        self.cache.clear();
    }

    pub fn set_visual(&mut self, visual: VisualConfig) {
        self.visual = visual;
        self.layout = DisplayLayout::compute(self.dirty.bounds(), &visual);
        for version in self.versions.iter_mut() {
            *version += 1;
        }
        self.dirty.invalidate_all();
    }

    /// Density changed: entries painted at the old density are useless.
    pub fn density_changed(&mut self, previous: Density) {
        self.cache.purge_density(previous);
        self.dirty.invalidate_all();
    }

    /// Drop every cached layer, used when the display goes away.
    pub fn purge_cache(&mut self) {
        self.cache.clear();
    }

    /// Repaint the dirty regions of `surface`. On error the surface is untouched and
    /// the dirty set is kept so the next attempt repaints the same regions.
    pub fn redraw(
        &mut self,
        surface: &mut Surface,
        view: &DisplayView<'_>,
        painter: &dyn LayerPainter,
    ) -> Result<RedrawStats, RenderError> {
        if self.dirty.is_empty() {
            return Ok(RedrawStats::default());
        }
        if surface.area().is_empty() {
            return Err(RenderError::EmptySurface);
        }

        let regions = self.dirty.regions().to_vec();
        let full = self.dirty.is_full();
        let density = surface.density();

        let mut stats = RedrawStats {
            regions: regions.len(),
            cells: regions.iter().map(|r| cells(*r)).sum(),
            full,
            ..Default::default()
        };

        // Paint everything first so a failing layer leaves the surface as it was
        let mut sources = Vec::new();
        for (layer, area) in self.layout.layers() {
            if !regions.iter().any(|r| r.intersects(area)) {
                continue;
            }

            let key = self.key(layer, density);
            let version = self.versions[layer.index()];
            if layer.cacheable() && self.cache.get(&key, version, area).is_some() {
                stats.layers_cached += 1;
                sources.push((layer, area, LayerSource::Cached));
                continue;
            }

            let mut buffer = Buffer::empty(area);
            painter.paint(layer, view, area, &mut buffer)?;
            stats.layers_painted += 1;
            sources.push((layer, area, LayerSource::Fresh(buffer)));
        }

        let target = surface.buffer_mut();
        for region in &regions {
            for y in region.top()..region.bottom() {
                for x in region.left()..region.right() {
                    target[(x, y)].reset();
                }
            }
        }

        for (layer, area, source) in &sources {
            let buffer = match source {
                LayerSource::Fresh(buffer) => Some(buffer),
                LayerSource::Cached => self.cache.peek(&self.key(*layer, density)),
            };
            let Some(buffer) = buffer else {
                continue;
            };
            for region in &regions {
                composite(buffer, region.intersection(*area), target);
            }
        }

        for (layer, _, source) in sources {
            if let LayerSource::Fresh(buffer) = source {
                if layer.cacheable() {
                    let key = self.key(layer, density);
                    self.cache.insert(key, self.versions[layer.index()], buffer);
                }
            }
        }

        self.dirty.clear();
        if full {
            self.full_renders += 1;
        } else {
            self.selective_renders += 1;
        }
        trace!(id = %self.display, ?stats, "redraw complete");
        Ok(stats)
    }

    fn key(&self, layer: LayerId, density: Density) -> CacheKey {
        CacheKey {
            display: self.display,
            layer,
            density,
        }
    }
}

/// Copy the non-transparent cells of `source` inside `clip` onto `target`.
fn composite(source: &Buffer, clip: Rect, target: &mut Buffer) {
    if clip.is_empty() {
        return;
    }
    let transparent = Cell::default();
    for y in clip.top()..clip.bottom() {
        for x in clip.left()..clip.right() {
            let cell = &source[(x, y)];
            if *cell != transparent {
                target[(x, y)] = cell.clone();
            }
        }
    }
}
