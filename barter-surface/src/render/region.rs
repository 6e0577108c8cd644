//! Dirty-region bookkeeping for one surface.

use ratatui::layout::Rect;

/// Cell count of a rectangle.
pub fn cells(rect: Rect) -> u32 {
    u32::from(rect.width) * u32::from(rect.height)
}

/// True if the rectangles overlap or share an edge.
fn touches(a: Rect, b: Rect) -> bool {
    a.x <= b.right() && b.x <= a.right() && a.y <= b.bottom() && b.y <= a.bottom()
}

/// Set of stale sub-areas of a surface.
///
/// Regions are clipped to the surface bounds. Two regions merge when their
/// bounding box covers less than `coalesce_factor` times their summed areas, which
/// keeps the set small without repainting much clean area. Past `max_regions` the
/// set collapses to the whole surface.
#[derive(Debug, Clone, PartialEq)]
pub struct DirtySet {
    bounds: Rect,
    regions: Vec<Rect>,
    full: bool,
    max_regions: usize,
    coalesce_factor: f64,
}

impl DirtySet {
    pub fn new(bounds: Rect, max_regions: usize, coalesce_factor: f64) -> Self {
        Self {
            bounds,
            regions: Vec::new(),
            full: false,
            max_regions: max_regions.max(1),
            coalesce_factor,
        }
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Change the surface bounds. Everything becomes dirty.
    pub fn set_bounds(&mut self, bounds: Rect) {
        self.bounds = bounds;
        self.invalidate_all();
    }

    pub fn add(&mut self, region: Rect) {
        if self.full {
            return;
        }
        let clipped = region.intersection(self.bounds);
        if clipped.is_empty() {
            return;
        }
        if clipped == self.bounds {
            self.invalidate_all();
            return;
        }

        self.regions.push(clipped);
        self.coalesce();

        if self.regions.len() > self.max_regions {
            self.invalidate_all();
        }
    }

    pub fn invalidate_all(&mut self) {
        self.regions.clear();
        if !self.bounds.is_empty() {
            self.full = true;
            self.regions.push(self.bounds);
        }
    }

    pub fn clear(&mut self) {
        self.regions.clear();
        self.full = false;
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn regions(&self) -> &[Rect] {
        &self.regions
    }

    pub fn contains(&self, x: u16, y: u16) -> bool {
        self.regions
            .iter()
            .any(|r| x >= r.x && x < r.right() && y >= r.y && y < r.bottom())
    }

    fn should_merge(&self, a: Rect, b: Rect) -> bool {
        if !touches(a, b) {
            return false;
        }
        let merged = f64::from(cells(a.union(b)));
        merged < self.coalesce_factor * f64::from(cells(a) + cells(b))
    }

    fn coalesce(&mut self) {
        'restart: loop {
            for i in 0..self.regions.len() {
                for j in (i + 1)..self.regions.len() {
                    let (a, b) = (self.regions[i], self.regions[j]);
                    if self.should_merge(a, b) {
                        self.regions[i] = a.union(b);
                        self.regions.swap_remove(j);
                        continue 'restart;
                    }
                }
            }
            break;
        }
    }
}
