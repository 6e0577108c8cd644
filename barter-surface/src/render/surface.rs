//! Display surfaces and the live-surface gauges used for leak accounting.

use super::region::cells;
use crate::{config::Density, display::DisplayId, error::ReleaseError};
use ratatui::{buffer::Buffer, layout::Rect};
use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

/// Cell grid a display renders into, together with its sub-cell density.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    buffer: Buffer,
    density: Density,
}

impl Surface {
    pub fn new(area: Rect, density: Density) -> Self {
        Self {
            buffer: Buffer::empty(area),
            density,
        }
    }

    pub fn area(&self) -> Rect {
        self.buffer.area
    }

    pub fn density(&self) -> Density {
        self.density
    }

    pub fn set_density(&mut self, density: Density) {
        self.density = density;
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }

    /// Reallocate at a new area. Previous content is discarded.
    pub fn resize(&mut self, area: Rect) {
        self.buffer = Buffer::empty(area);
    }
}

/// Rendering-domain record of live surfaces, shared by the manager and the
/// ledger release callbacks.
#[derive(Debug, Clone, Default)]
pub struct ResourceGauges {
    surfaces: Rc<RefCell<BTreeMap<DisplayId, u32>>>,
}

impl ResourceGauges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire_surface(&self, display: DisplayId, area: Rect) {
        self.surfaces.borrow_mut().insert(display, cells(area));
    }

    pub fn resize_surface(&self, display: DisplayId, area: Rect) {
        if let Some(count) = self.surfaces.borrow_mut().get_mut(&display) {
            *count = cells(area);
        }
    }

    pub fn release_surface(&self, display: DisplayId) -> Result<(), ReleaseError> {
        match self.surfaces.borrow_mut().remove(&display) {
            Some(_) => Ok(()),
            None => Err(ReleaseError::AlreadyReleased {
                kind: "surface".to_string(),
                record: display.to_string(),
            }),
        }
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces.borrow().len()
    }

    /// Cells held by all live surfaces.
    pub fn live_cells(&self) -> u64 {
        self.surfaces.borrow().values().map(|c| u64::from(*c)).sum()
    }
}
