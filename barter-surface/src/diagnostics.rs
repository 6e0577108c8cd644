use crate::{
    display::{Display, DisplayId, RenderState},
    tick::Symbol,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Point-in-time health of one display.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DisplayDiagnostics {
    pub id: DisplayId,
    pub symbol: Symbol,
    pub state: RenderState,
    pub last_render: Option<Duration>,
    pub selective_renders: u64,
    pub full_renders: u64,
    pub cache_hit_ratio: f64,
    pub dirty_regions: usize,
    pub render_failures: u64,
    pub consecutive_failures: u32,
    pub breaker_open: bool,
    pub breaker_trips: u32,
    pub stale: bool,
    pub last_sequence: u64,
}

impl From<&Display> for DisplayDiagnostics {
    fn from(display: &Display) -> Self {
        let renderer = display.renderer();
        Self {
            id: display.id(),
            symbol: display.symbol().clone(),
            state: display.state(),
            last_render: display.last_render(),
            selective_renders: renderer.selective_renders(),
            full_renders: renderer.full_renders(),
            cache_hit_ratio: renderer.cache().hit_ratio(),
            dirty_regions: renderer.dirty().len(),
            render_failures: display.render_failures(),
            consecutive_failures: display.breaker().consecutive_failures(),
            breaker_open: display.breaker().is_open(),
            breaker_trips: display.breaker().trips(),
            stale: display.is_stale(),
            last_sequence: display.last_sequence(),
        }
    }
}

/// Live resource totals of a [`DisplayManager`](crate::display::DisplayManager). All zero
/// once every display is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ResourceCounts {
    pub displays: usize,
    pub surfaces: usize,
    pub surface_cells: u64,
    pub timers: usize,
    pub subscriptions: usize,
    pub subscribed_symbols: usize,
    pub ledger_entries: usize,
    pub cache_entries: usize,
    pub held_updates: usize,
}

impl ResourceCounts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
