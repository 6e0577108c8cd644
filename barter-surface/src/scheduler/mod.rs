//! Frame-budgeted render scheduling across every live display.
//!
//! Each [`RenderScheduler::frame_tick`] pumps pending snapshot updates, fires staleness
//! timers and then redraws dirty displays round-robin until the frame budget is spent.
//! Displays that do not fit are deferred and the next tick resumes with them.

use crate::{
    display::{DisplayId, DisplayManager, RenderOutcome},
    error::RenderError,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    panic::{AssertUnwindSafe, catch_unwind},
    time::Duration,
};
use tracing::{debug, error, warn};

pub mod breaker;
pub mod clock;

pub use breaker::{BreakerState, CircuitBreaker};
pub use clock::{Clock, ManualClock, SystemClock};

/// Summary of one frame tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct FrameReport {
    pub rendered: usize,
    /// Dirty displays left for the next tick
    pub deferred: usize,
    pub failed: usize,
    /// Failures that tripped a circuit breaker
    pub tripped: usize,
    /// Dirty displays skipped because their breaker is open
    pub skipped_unavailable: usize,
    pub updates_applied: usize,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct RenderScheduler<C = SystemClock> {
    clock: C,
    /// Display the next tick starts from
    cursor: Option<DisplayId>,
    history: VecDeque<Duration>,
    history_capacity: usize,
    last_report: Option<FrameReport>,
    ticks: u64,
}

impl RenderScheduler<SystemClock> {
    pub fn new(history_capacity: usize) -> Self {
        Self::with_clock(SystemClock, history_capacity)
    }
}

impl<C> RenderScheduler<C>
where
    C: Clock,
{
    pub fn with_clock(clock: C, history_capacity: usize) -> Self {
        Self {
            clock,
            cursor: None,
            history: VecDeque::with_capacity(history_capacity),
            history_capacity: history_capacity.max(1),
            last_report: None,
            ticks: 0,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn last_report(&self) -> Option<FrameReport> {
        self.last_report
    }

    /// Run one frame: pump updates, fire timers, redraw dirty displays within budget.
    pub fn frame_tick(&mut self, manager: &mut DisplayManager) -> FrameReport {
        let start = self.clock.now();
        let budget = manager.config().frame_budget;
        let painter = manager.painter();

        let mut report = FrameReport {
            updates_applied: manager.pump_updates(start),
            ..FrameReport::default()
        };
        let stale = manager.fire_timers(start);
        if !stale.is_empty() {
            debug!(?stale, "displays marked stale");
        }

        let order = self.rotation(manager.ids());
        self.cursor = None;

        for (position, &id) in order.iter().enumerate() {
            let Some(mut instance) = manager.checkout(id) else {
                continue;
            };
            if !instance.needs_render() {
                manager.checkin(instance);
                continue;
            }

            let now = self.clock.now();
            if !instance.allow_render(now) {
                instance.show_unavailable();
                report.skipped_unavailable += 1;
                manager.checkin(instance);
                continue;
            }

            let spent = now.saturating_duration_since(start);
            let expected = instance.last_render().unwrap_or_default();
            let attempted = report.rendered + report.failed;
            if attempted > 0 && (spent >= budget || spent + expected > budget) {
                manager.checkin(instance);
                self.cursor = Some(id);
                report.deferred = order[position..]
                    .iter()
                    .filter(|id| manager.is_dirty(**id))
                    .count();
                debug!(%id, deferred = report.deferred, ?spent, "frame budget exhausted");
                break;
            }

            instance.begin_render();
            let result = catch_unwind(AssertUnwindSafe(|| instance.redraw(painter.as_ref())))
                .unwrap_or_else(|payload| Err(RenderError::from_panic(payload)));
            let finished = self.clock.now();
            let cost = finished.saturating_duration_since(now);

            match instance.complete_render(&result, cost, finished) {
                RenderOutcome::Rendered => report.rendered += 1,
                RenderOutcome::Failed => {
                    report.failed += 1;
                    if let Err(error) = &result {
                        error!(%id, symbol = %instance.symbol(), %error, "display redraw failed");
                    }
                }
                RenderOutcome::Tripped => {
                    report.failed += 1;
                    report.tripped += 1;
                    if let Err(error) = &result {
                        error!(%id, symbol = %instance.symbol(), %error, "display redraw failed, now unavailable");
                    }
                }
            }
            manager.checkin(instance);
        }

        report.elapsed = self.clock.now().saturating_duration_since(start);
        if report.elapsed > budget {
            warn!(elapsed = ?report.elapsed, ?budget, rendered = report.rendered, "frame over budget");
        }

        self.record(report);
        report
    }

    /// Live ids starting at the cursor, wrapping around.
    fn rotation(&self, ids: Vec<DisplayId>) -> Vec<DisplayId> {
        let Some(cursor) = self.cursor else {
            return ids;
        };
        let split = ids.partition_point(|id| *id < cursor);
        let (before, after) = ids.split_at(split);
        after.iter().chain(before).copied().collect()
    }

    fn record(&mut self, report: FrameReport) {
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(report.elapsed);
        self.last_report = Some(report);
        self.ticks += 1;
    }

    /// Nearest-rank percentile of recent frame times, `p` in `0..=100`.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.history.is_empty() {
            return None;
        }
        let mut sorted: Vec<Duration> = self.history.iter().copied().collect();
        sorted.sort_unstable();

        let rank = ((p.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
        sorted.get(rank.saturating_sub(1)).copied()
    }

    /// Frame times currently held for percentile reporting.
    pub fn frame_count(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{SnapshotPublisher, update_channel},
        config::{ChannelConfig, RenderConfig, VisualConfig},
        display::RenderState,
        render::{DisplayView, LayerId, LayerPainter},
        snapshot::VisualSnapshot,
        tick::Symbol,
    };
    use ratatui::{buffer::Buffer, layout::Rect};
    use std::rc::Rc;
    use tokio::sync::mpsc;

    /// Advances the shared clock per painted layer and fails for symbols with a given prefix.
    struct TimedPainter {
        clock: ManualClock,
        per_layer: Duration,
        failing: Option<&'static str>,
    }

    impl LayerPainter for TimedPainter {
        fn paint(
            &self,
            layer: LayerId,
            view: &DisplayView<'_>,
            area: Rect,
            buf: &mut Buffer,
        ) -> Result<(), RenderError> {
            self.clock.advance(self.per_layer);
            if self.failing.is_some_and(|prefix| view.symbol.starts_with(prefix)) {
                return Err(RenderError::Paint {
                    layer: layer.name().to_string(),
                    reason: "injected".to_string(),
                });
            }
            buf.set_string(area.x, area.y, layer.name(), ratatui::style::Style::default());
            Ok(())
        }
    }

    fn setup(
        per_layer: Duration,
        failing: Option<&'static str>,
    ) -> (DisplayManager, RenderScheduler<ManualClock>, SnapshotPublisher) {
        let clock = ManualClock::new();
        let (publisher, receiver) = update_channel(&ChannelConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let painter = TimedPainter {
            clock: clock.clone(),
            per_layer,
            failing,
        };
        let manager = DisplayManager::new(RenderConfig::default(), receiver, tx).with_painter(Rc::new(painter));
        (manager, RenderScheduler::with_clock(clock, 100), publisher)
    }

    fn snapshot(symbol: &str, sequence: u64) -> VisualSnapshot {
        VisualSnapshot {
            symbol: Symbol::new(symbol),
            sequence,
            timestamp: sequence as i64,
            price: 100.0 + sequence as f64,
            previous_price: None,
            profile: Default::default(),
            volatility: Default::default(),
            range: Default::default(),
        }
    }

    #[test]
    fn test_renders_all_within_budget() {
        let (mut manager, mut scheduler, _publisher) = setup(Duration::from_micros(100), None);
        for symbol in ["BTC", "ETH", "SOL"] {
            manager.create(symbol, VisualConfig::default()).unwrap();
        }

        let report = scheduler.frame_tick(&mut manager);
        assert_eq!(report.rendered, 3);
        assert_eq!(report.deferred, 0);
        assert!(manager.ids().into_iter().all(|id| !manager.is_dirty(id)));

        let report = scheduler.frame_tick(&mut manager);
        assert_eq!(report.rendered, 0);
    }

    #[test]
    fn test_over_budget_defers_and_resumes() {
        // five layers at 2ms: 10ms per display against a 16.7ms budget
        let (mut manager, mut scheduler, _publisher) = setup(Duration::from_millis(2), None);
        let ids: Vec<DisplayId> = (0..4)
            .map(|i| manager.create(&format!("SYM{i}"), VisualConfig::default()).unwrap())
            .collect();

        // first tick: no costs measured yet, so render until spent exceeds budget
        let report = scheduler.frame_tick(&mut manager);
        assert_eq!(report.rendered, 2);
        assert_eq!(report.deferred, 2);
        assert!(manager.is_dirty(ids[2]));

        let report = scheduler.frame_tick(&mut manager);
        assert_eq!(report.rendered, 2);
        assert_eq!(report.deferred, 0);
        assert!(ids.iter().all(|id| !manager.is_dirty(*id)));
    }

    #[test]
    fn test_sustained_overload_renders_round_robin() {
        // every redraw costs at least 10ms, so exactly one display fits per tick
        let (mut manager, mut scheduler, publisher) = setup(Duration::from_millis(10), None);
        let symbols = ["SYM0", "SYM1", "SYM2", "SYM3", "SYM4"];
        let ids: Vec<DisplayId> = symbols
            .iter()
            .map(|symbol| manager.create(symbol, VisualConfig::default()).unwrap())
            .collect();

        let renders = |manager: &DisplayManager| -> Vec<u64> {
            ids.iter()
                .map(|id| {
                    let diagnostics = manager.diagnostics(*id).unwrap();
                    diagnostics.full_renders + diagnostics.selective_renders
                })
                .collect()
        };

        for tick in 0..3 * ids.len() {
            for symbol in symbols {
                publisher.publish(snapshot(symbol, tick as u64 + 1));
            }
            let before = renders(&manager);
            let report = scheduler.frame_tick(&mut manager);
            let after = renders(&manager);

            assert_eq!(report.rendered, 1, "tick {tick}");
            assert_eq!(report.deferred, ids.len() - 1, "tick {tick}");
            let rendered: Vec<usize> = (0..ids.len()).filter(|i| after[*i] > before[*i]).collect();
            assert_eq!(rendered, vec![tick % ids.len()], "tick {tick}");
        }

        assert!(renders(&manager).iter().all(|count| *count == 3));
    }

    #[test]
    fn test_failing_redraws_count_against_budget() {
        // every redraw fails on its first layer after 4ms
        let (mut manager, mut scheduler, _publisher) = setup(Duration::from_millis(4), Some("BAD"));
        for i in 0..6 {
            manager.create(&format!("BAD{i}"), VisualConfig::default()).unwrap();
        }
        let budget = manager.config().frame_budget;

        // attempts start at 0, 4, 8, 12 and 16ms; the sixth would start past the budget
        let report = scheduler.frame_tick(&mut manager);
        assert_eq!(report.rendered, 0);
        assert_eq!(report.failed, 5);
        assert_eq!(report.deferred, 1);
        assert!(report.elapsed < budget + Duration::from_millis(4));

        // resumes at the deferred display, then the measured 4ms cost stops it after 16ms
        let report = scheduler.frame_tick(&mut manager);
        assert_eq!(report.failed, 4);
        assert_eq!(report.deferred, 2);
        assert_eq!(manager.display(DisplayId(1)).unwrap().render_failures(), 2);
        assert_eq!(manager.display(DisplayId(6)).unwrap().render_failures(), 1);
    }

    #[test]
    fn test_single_slow_display_still_progresses() {
        let (mut manager, mut scheduler, _publisher) = setup(Duration::from_millis(50), None);
        let id = manager.create("BTC", VisualConfig::default()).unwrap();

        let report = scheduler.frame_tick(&mut manager);
        assert_eq!(report.rendered, 1);
        assert!(!manager.is_dirty(id));
        assert!(report.elapsed > manager.config().frame_budget);
    }

    #[test]
    fn test_failing_display_trips_without_blocking_others() {
        let (mut manager, mut scheduler, _publisher) = setup(Duration::from_micros(10), Some("BAD"));
        let bad = manager.create("BAD", VisualConfig::default()).unwrap();
        let good = manager.create("GOOD", VisualConfig::default()).unwrap();

        let reports: Vec<FrameReport> = (0..3).map(|_| scheduler.frame_tick(&mut manager)).collect();
        assert_eq!(reports.iter().map(|r| r.failed).sum::<usize>(), 3);
        assert_eq!(reports[2].tripped, 1);
        assert_eq!(reports[0].rendered, 1);

        let display = manager.display(bad).unwrap();
        assert!(display.breaker().is_open());
        assert!(display.is_showing_unavailable());
        assert_eq!(manager.display(good).unwrap().state(), RenderState::Idle);

        let report = scheduler.frame_tick(&mut manager);
        assert_eq!(report.skipped_unavailable, 1);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_breaker_half_open_trial_after_cooldown() {
        let (mut manager, mut scheduler, _publisher) = setup(Duration::from_micros(10), Some("BAD"));
        let bad = manager.create("BAD", VisualConfig::default()).unwrap();
        for _ in 0..3 {
            scheduler.frame_tick(&mut manager);
        }
        assert!(manager.display(bad).unwrap().breaker().is_open());

        scheduler.clock().advance(manager.config().breaker_cooldown);
        let report = scheduler.frame_tick(&mut manager);
        // trial failed, breaker re-opens
        assert_eq!(report.tripped, 1);
        assert_eq!(manager.display(bad).unwrap().breaker().trips(), 2);
    }

    #[test]
    fn test_updates_pumped_before_render() {
        let (mut manager, mut scheduler, publisher) = setup(Duration::from_micros(10), None);
        let id = manager.create("BTC", VisualConfig::default()).unwrap();
        scheduler.frame_tick(&mut manager);

        publisher.publish(snapshot("BTC", 1));
        let report = scheduler.frame_tick(&mut manager);
        assert_eq!(report.updates_applied, 1);
        assert_eq!(report.rendered, 1);
        assert_eq!(manager.display(id).unwrap().last_sequence(), 1);
    }

    #[test]
    fn test_percentile() {
        let (mut manager, mut scheduler, _publisher) = setup(Duration::from_millis(1), None);
        assert_eq!(scheduler.percentile(95.0), None);

        manager.create("BTC", VisualConfig::default()).unwrap();
        scheduler.frame_tick(&mut manager);
        for _ in 0..9 {
            scheduler.frame_tick(&mut manager);
        }

        assert_eq!(scheduler.frame_count(), 10);
        assert_eq!(scheduler.percentile(50.0), Some(Duration::ZERO));
        assert_eq!(scheduler.percentile(100.0), Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_rotation_wraps_at_cursor() {
        let mut scheduler = RenderScheduler::with_clock(ManualClock::new(), 10);
        let ids: Vec<DisplayId> = (1..=4).map(DisplayId::from).collect();
        assert_eq!(scheduler.rotation(ids.clone()), ids);

        scheduler.cursor = Some(DisplayId(3));
        assert_eq!(
            scheduler.rotation(ids),
            vec![DisplayId(3), DisplayId(4), DisplayId(1), DisplayId(2)]
        );
    }
}
