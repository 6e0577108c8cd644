use super::{DisplayId, timer::TimerId};
use crate::{
    config::{Density, RenderConfig, VisualConfig},
    error::RenderError,
    ledger::{ReleaseReport, ResourceLedger},
    render::{
        DirtyRegionRenderer, DisplayView, LayerId, LayerPainter, RedrawStats, Surface,
        layer::paint_unavailable,
    },
    scheduler::breaker::CircuitBreaker,
    snapshot::VisualSnapshot,
    tick::Symbol,
};
use ratatui::layout::Rect;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Render state machine of one display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum RenderState {
    /// Surface matches the latest applied state
    #[default]
    Idle,
    /// Has invalidated regions waiting for a frame tick
    Dirty,
    /// Selected by the current frame tick
    Rendering,
}

/// Result of completing one redraw attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    Failed,
    /// Failed and tripped the circuit breaker
    Tripped,
}

/// One on-screen visualisation of a symbol.
#[derive(Debug)]
pub struct Display {
    id: DisplayId,
    symbol: Symbol,
    visual: VisualConfig,
    surface: Surface,
    renderer: DirtyRegionRenderer,
    snapshot: Option<VisualSnapshot>,
    last_sequence: u64,
    ledger: ResourceLedger,
    timer: TimerId,
    state: RenderState,
    breaker: CircuitBreaker,
    stale: bool,
    showing_unavailable: bool,
    last_render: Option<Duration>,
    render_failures: u64,
}

impl Display {
    pub(crate) fn new(
        id: DisplayId,
        symbol: Symbol,
        visual: VisualConfig,
        area: Rect,
        config: &RenderConfig,
        ledger: ResourceLedger,
        timer: TimerId,
    ) -> Self {
        Self {
            id,
            symbol,
            visual,
            surface: Surface::new(area, Density::default()),
            renderer: DirtyRegionRenderer::new(id, area, visual, config),
            snapshot: None,
            last_sequence: 0,
            ledger,
            timer,
            state: RenderState::Dirty,
            breaker: CircuitBreaker::new(config.failure_threshold, config.breaker_cooldown),
            stale: false,
            showing_unavailable: false,
            last_render: None,
            render_failures: 0,
        }
    }

    pub fn id(&self) -> DisplayId {
        self.id
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn visual(&self) -> VisualConfig {
        self.visual
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn renderer(&self) -> &DirtyRegionRenderer {
        &self.renderer
    }

    pub fn snapshot(&self) -> Option<&VisualSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn last_render(&self) -> Option<Duration> {
        self.last_render
    }

    pub fn render_failures(&self) -> u64 {
        self.render_failures
    }

    pub(crate) fn timer(&self) -> TimerId {
        self.timer
    }

    pub fn needs_render(&self) -> bool {
        self.renderer.is_dirty()
    }

    /// Apply a snapshot if it is newer than the last one applied, invalidating the
    /// layers whose content it changes.
    pub fn apply_snapshot(&mut self, snapshot: VisualSnapshot) -> bool {
        if snapshot.sequence <= self.last_sequence {
            return false;
        }
        self.last_sequence = snapshot.sequence;

        let profile_changed = match &self.snapshot {
            None => true,
            Some(previous) => {
                previous.profile != snapshot.profile
                    || price_level(previous) != price_level(&snapshot)
            }
        };

        self.renderer.invalidate_layer(LayerId::Price);
        self.renderer.invalidate_layer(LayerId::DayRange);
        self.renderer.invalidate_layer(LayerId::Volatility);
        if profile_changed {
            self.renderer.invalidate_layer(LayerId::Profile);
        }

        self.stale = false;
        self.snapshot = Some(snapshot);
        self.mark_dirty();
        true
    }

    /// No snapshot for a while: dim the price. Returns `true` on the transition.
    pub fn mark_stale(&mut self) -> bool {
        if self.stale || self.snapshot.is_none() {
            return false;
        }
        self.stale = true;
        self.renderer.invalidate_layer(LayerId::Price);
        self.mark_dirty();
        true
    }

    pub fn resize(&mut self, area: Rect) {
        if area == self.surface.area() {
            return;
        }
        self.surface.resize(area);
        self.renderer.set_area(area);
        self.showing_unavailable = false;
        self.mark_dirty();
    }

    pub fn set_density(&mut self, density: Density) {
        let previous = self.surface.density();
        if previous == density {
            return;
        }
        self.surface.set_density(density);
        self.renderer.density_changed(previous);
        self.mark_dirty();
    }

    pub fn set_visual(&mut self, visual: VisualConfig) {
        if visual == self.visual {
            return;
        }
        self.visual = visual;
        self.renderer.set_visual(visual);
        self.mark_dirty();
    }

    fn mark_dirty(&mut self) {
        if self.state == RenderState::Idle {
            self.state = RenderState::Dirty;
        }
    }

    pub(crate) fn begin_render(&mut self) {
        self.state = RenderState::Rendering;
    }

    /// Repaint dirty regions. Panics from the painter propagate to the caller.
    pub(crate) fn redraw(&mut self, painter: &dyn LayerPainter) -> Result<RedrawStats, RenderError> {
        let view = DisplayView {
            id: self.id,
            symbol: self.symbol.as_str(),
            snapshot: self.snapshot.as_ref(),
            config: self.visual,
            density: self.surface.density(),
            stale: self.stale,
        };
        self.renderer.redraw(&mut self.surface, &view, painter)
    }

    pub(crate) fn complete_render(
        &mut self,
        result: &Result<RedrawStats, RenderError>,
        cost: Duration,
        now: Instant,
    ) -> RenderOutcome {
        self.last_render = Some(cost);
        match result {
            Ok(_) => {
                self.breaker.record_success();
                self.showing_unavailable = false;
                self.state = if self.renderer.is_dirty() {
                    RenderState::Dirty
                } else {
                    RenderState::Idle
                };
                RenderOutcome::Rendered
            }
            Err(_) => {
                self.render_failures += 1;
                self.state = RenderState::Dirty;
                if self.breaker.record_failure(now) {
                    self.show_unavailable();
                    RenderOutcome::Tripped
                } else {
                    RenderOutcome::Failed
                }
            }
        }
    }

    /// Whether the breaker lets a redraw through at `now`.
    pub(crate) fn allow_render(&mut self, now: Instant) -> bool {
        self.breaker.allow(now)
    }

    /// Replace the surface with the static unavailable state, once per trip.
    pub(crate) fn show_unavailable(&mut self) {
        if self.showing_unavailable {
            return;
        }
        let area = self.surface.area();
        let buffer = self.surface.buffer_mut();
        buffer.reset();
        paint_unavailable(&self.symbol, area, buffer);
        // full repaint once the breaker lets redraws through again
        self.renderer.invalidate_all();
        self.showing_unavailable = true;
    }

    pub fn is_showing_unavailable(&self) -> bool {
        self.showing_unavailable
    }

    /// Release every ledger entry and drop cached content.
    pub(crate) fn teardown(mut self) -> ReleaseReport {
        self.renderer.purge_cache();
        self.ledger.release_all()
    }
}

/// Bucket-floor of the profile level holding the current price, if any.
fn price_level(snapshot: &VisualSnapshot) -> Option<u64> {
    snapshot
        .profile
        .levels
        .iter()
        .find(|level| level.contains(snapshot.price))
        .map(|level| level.price_low.to_bits())
}
