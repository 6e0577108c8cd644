use super::{
    DisplayId,
    instance::{Display, RenderState},
    subscription::SubscriptionTable,
    timer::TimerRegistry,
};
use crate::{
    aggregation::SubscriptionCommand,
    channel::{ChannelStats, SnapshotReceiver},
    config::{Density, RenderConfig, VisualConfig},
    diagnostics::{DisplayDiagnostics, ResourceCounts},
    error::{SurfaceError, TickError},
    ledger::{ReleaseReport, ResourceKind, ResourceLedger},
    render::{LayerPainter, ResourceGauges, WidgetPainter},
    snapshot::VisualSnapshot,
    tick::normalise_symbol,
};
use itertools::Itertools;
use ratatui::{buffer::Buffer, layout::Rect};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
    time::Instant,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ManagerStats {
    pub created: u64,
    pub destroyed: u64,
    pub snapshots_applied: u64,
    /// Snapshots for a symbol no live display subscribes to
    pub snapshots_unrouted: u64,
    pub release_failures: u64,
}

/// Owns every display of the workspace together with the shared subscription table,
/// timers and surface gauges. All lifecycle changes go through `create` and `destroy`.
#[derive(Debug)]
pub struct DisplayManager {
    config: RenderConfig,
    displays: BTreeMap<DisplayId, Display>,
    checked_out: BTreeSet<DisplayId>,
    /// Destroyed while checked out, torn down at check-in
    retiring: BTreeSet<DisplayId>,
    /// Latest snapshot for displays that were checked out when it arrived
    held: BTreeMap<DisplayId, VisualSnapshot>,
    subscriptions: SubscriptionTable,
    timers: TimerRegistry,
    gauges: ResourceGauges,
    updates: SnapshotReceiver,
    painter: Rc<dyn LayerPainter>,
    next_id: u64,
    stats: ManagerStats,
}

impl DisplayManager {
    pub fn new(
        config: RenderConfig,
        updates: SnapshotReceiver,
        commands: mpsc::UnboundedSender<SubscriptionCommand>,
    ) -> Self {
        Self {
            config,
            displays: BTreeMap::new(),
            checked_out: BTreeSet::new(),
            retiring: BTreeSet::new(),
            held: BTreeMap::new(),
            subscriptions: SubscriptionTable::new(commands),
            timers: TimerRegistry::new(),
            gauges: ResourceGauges::new(),
            updates,
            painter: Rc::new(WidgetPainter),
            next_id: 1,
            stats: ManagerStats::default(),
        }
    }

    /// Replace the layer painter used by every display.
    pub fn with_painter(mut self, painter: Rc<dyn LayerPainter>) -> Self {
        self.painter = painter;
        self
    }

    pub fn painter(&self) -> Rc<dyn LayerPainter> {
        Rc::clone(&self.painter)
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn stats(&self) -> ManagerStats {
        self.stats
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.updates.stats()
    }

    /// Create a display for `symbol` at the default surface size.
    pub fn create(&mut self, symbol: &str, visual: VisualConfig) -> Result<DisplayId, SurfaceError> {
        let area = Rect::new(0, 0, self.config.default_width, self.config.default_height);
        self.create_at(symbol, visual, area)
    }

    /// Create a display for `symbol` occupying `area` of the host surface.
    pub fn create_at(
        &mut self,
        symbol: &str,
        visual: VisualConfig,
        area: Rect,
    ) -> Result<DisplayId, SurfaceError> {
        let symbol = normalise_symbol(symbol);
        if symbol.is_empty() {
            return Err(TickError::EmptySymbol.into());
        }

        let id = DisplayId(self.next_id);
        self.next_id += 1;
        let mut ledger = ResourceLedger::new(format!("display {id}"));

        self.gauges.acquire_surface(id, area);
        let gauges = self.gauges.clone();
        ledger.register(
            ResourceKind::Surface,
            format!("{}x{}", area.width, area.height),
            move || gauges.release_surface(id),
        );

        let timer = self.timers.arm(id, self.config.stale_after);
        let timers = self.timers.clone();
        ledger.register(ResourceKind::Timer, format!("stale {:?}", self.config.stale_after), move || {
            timers.cancel(timer)
        });

        self.subscriptions.subscribe(&symbol, id);
        let subscriptions = self.subscriptions.clone();
        let subscribed = symbol.clone();
        ledger.register(ResourceKind::Subscription, symbol.to_string(), move || {
            subscriptions.unsubscribe(&subscribed, id).map(|_| ())
        });

        let display = Display::new(id, symbol.clone(), visual, area, &self.config, ledger, timer);
        self.displays.insert(id, display);
        self.stats.created += 1;

        info!(%id, %symbol, ?area, "display created");
        Ok(id)
    }

    /// Destroy a display, releasing its surface, timer and subscription. Unknown or
    /// already destroyed ids are a no-op returning `false`.
    pub fn destroy(&mut self, id: DisplayId) -> bool {
        if self.checked_out.contains(&id) {
            // in-flight redraw: tear down at check-in
            let first = self.retiring.insert(id);
            if first {
                self.held.remove(&id);
                debug!(%id, "destroy deferred until redraw completes");
            }
            return first;
        }

        match self.displays.remove(&id) {
            Some(display) => {
                self.teardown(display);
                true
            }
            None => false,
        }
    }

    /// Destroy every display.
    pub fn destroy_all(&mut self) -> usize {
        let ids: Vec<DisplayId> = self.displays.keys().chain(self.checked_out.iter()).copied().collect();
        ids.into_iter().filter(|id| self.destroy(*id)).count()
    }

    fn teardown(&mut self, display: Display) -> ReleaseReport {
        let id = display.id();
        self.held.remove(&id);
        let report = display.teardown();
        self.stats.destroyed += 1;
        self.stats.release_failures += report.failures.len() as u64;

        if report.is_clean() {
            info!(%id, released = report.released, "display destroyed");
        } else {
            warn!(%id, released = report.released, failures = ?report.failures, "display destroyed with release failures");
        }
        report
    }

    pub fn contains(&self, id: DisplayId) -> bool {
        (self.displays.contains_key(&id) || self.checked_out.contains(&id)) && !self.retiring.contains(&id)
    }

    /// Live display ids in ascending order.
    pub fn ids(&self) -> Vec<DisplayId> {
        self.displays
            .keys()
            .chain(self.checked_out.iter())
            .filter(|id| !self.retiring.contains(id))
            .copied()
            .sorted_unstable()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn display(&self, id: DisplayId) -> Option<&Display> {
        self.displays.get(&id)
    }

    pub fn is_dirty(&self, id: DisplayId) -> bool {
        self.displays.get(&id).is_some_and(Display::needs_render)
    }

    /// Take a display out of the table for rendering. `None` if it is not live.
    pub fn checkout(&mut self, id: DisplayId) -> Option<Display> {
        let display = self.displays.remove(&id)?;
        self.checked_out.insert(id);
        Some(display)
    }

    /// Return a checked-out display. If it was destroyed meanwhile it is torn down now,
    /// otherwise any snapshot that arrived during the redraw is applied.
    pub fn checkin(&mut self, mut display: Display) {
        let id = display.id();
        self.checked_out.remove(&id);

        if self.retiring.remove(&id) {
            self.teardown(display);
            return;
        }

        if let Some(snapshot) = self.held.remove(&id) {
            if display.apply_snapshot(snapshot) {
                self.stats.snapshots_applied += 1;
            }
        }
        self.displays.insert(id, display);
    }

    /// Drain the update channel and route each snapshot to the displays of its symbol.
    pub fn pump_updates(&mut self, now: Instant) -> usize {
        let snapshots = self.updates.drain();
        let mut applied = 0;

        for snapshot in snapshots {
            let subscribers = self.subscriptions.subscribers(&snapshot.symbol);
            if subscribers.is_empty() {
                self.stats.snapshots_unrouted += 1;
                continue;
            }

            for id in subscribers {
                if self.retiring.contains(&id) {
                    continue;
                }
                if self.checked_out.contains(&id) {
                    let newer = self.held.get(&id).is_none_or(|held| held.sequence < snapshot.sequence);
                    if newer {
                        self.held.insert(id, snapshot.clone());
                    }
                    continue;
                }
                if let Some(display) = self.displays.get_mut(&id) {
                    if display.apply_snapshot(snapshot.clone()) {
                        self.timers.touch(display.timer(), now);
                        applied += 1;
                    }
                }
            }
        }

        self.stats.snapshots_applied += applied as u64;
        applied
    }

    /// Fire due staleness timers. Returns the displays that turned stale.
    pub fn fire_timers(&mut self, now: Instant) -> Vec<DisplayId> {
        self.timers
            .due(now)
            .into_iter()
            .filter(|id| self.displays.get_mut(id).is_some_and(Display::mark_stale))
            .collect()
    }

    pub fn resize(&mut self, id: DisplayId, area: Rect) -> Result<(), SurfaceError> {
        let display = self.displays.get_mut(&id).ok_or(SurfaceError::UnknownDisplay(id))?;
        display.resize(area);
        self.gauges.resize_surface(id, area);
        Ok(())
    }

    pub fn set_density(&mut self, id: DisplayId, density: Density) -> Result<(), SurfaceError> {
        self.displays
            .get_mut(&id)
            .ok_or(SurfaceError::UnknownDisplay(id))?
            .set_density(density);
        Ok(())
    }

    pub fn set_visual(&mut self, id: DisplayId, visual: VisualConfig) -> Result<(), SurfaceError> {
        self.displays
            .get_mut(&id)
            .ok_or(SurfaceError::UnknownDisplay(id))?
            .set_visual(visual);
        Ok(())
    }

    /// Copy every live surface into `target` at its own area.
    pub fn compose(&self, target: &mut Buffer) {
        for display in self.displays.values() {
            let source = display.surface().buffer();
            let clip = source.area.intersection(target.area);
            for y in clip.top()..clip.bottom() {
                for x in clip.left()..clip.right() {
                    target[(x, y)] = source[(x, y)].clone();
                }
            }
        }
    }

    pub fn diagnostics(&self, id: DisplayId) -> Option<DisplayDiagnostics> {
        self.displays.get(&id).map(DisplayDiagnostics::from)
    }

    pub fn all_diagnostics(&self) -> Vec<DisplayDiagnostics> {
        self.displays.values().map(DisplayDiagnostics::from).collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.displays
            .values()
            .filter(|d| d.state() == RenderState::Dirty)
            .count()
    }

    pub fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts {
            displays: self.displays.len() + self.checked_out.len(),
            surfaces: self.gauges.live_surfaces(),
            surface_cells: self.gauges.live_cells(),
            timers: self.timers.len(),
            subscriptions: self.subscriptions.len(),
            subscribed_symbols: self.subscriptions.symbols().len(),
            ledger_entries: self.displays.values().map(|d| d.ledger().len()).sum(),
            cache_entries: self.displays.values().map(|d| d.renderer().cache().len()).sum(),
            held_updates: self.held.len(),
        }
    }
}

impl Drop for DisplayManager {
    fn drop(&mut self) {
        let remaining = self.destroy_all();
        if remaining > 0 {
            debug!(remaining, "display manager dropped, remaining displays destroyed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channel::update_channel, config::ChannelConfig, tick::Symbol};

    fn manager() -> (
        DisplayManager,
        crate::channel::SnapshotPublisher,
        mpsc::UnboundedReceiver<SubscriptionCommand>,
    ) {
        let (publisher, receiver) = update_channel(&ChannelConfig::default());
        let (tx, rx) = mpsc::unbounded_channel();
        (DisplayManager::new(RenderConfig::default(), receiver, tx), publisher, rx)
    }

    fn snapshot(symbol: &str, sequence: u64, price: f64) -> VisualSnapshot {
        VisualSnapshot {
            symbol: Symbol::new(symbol),
            sequence,
            timestamp: sequence as i64,
            price,
            previous_price: None,
            profile: Default::default(),
            volatility: Default::default(),
            range: Default::default(),
        }
    }

    #[test]
    fn test_create_registers_resources() {
        let (mut manager, _publisher, mut commands) = manager();
        let id = manager.create(" btc ", VisualConfig::default()).unwrap();

        let display = manager.display(id).unwrap();
        assert_eq!(display.symbol(), "BTC");
        assert_eq!(display.ledger().len(), 3);

        let counts = manager.resource_counts();
        assert_eq!(counts.surfaces, 1);
        assert_eq!(counts.timers, 1);
        assert_eq!(counts.subscriptions, 1);
        assert_eq!(commands.try_recv().unwrap(), SubscriptionCommand::Start(Symbol::new("BTC")));
    }

    #[test]
    fn test_create_rejects_empty_symbol() {
        let (mut manager, _publisher, _commands) = manager();
        assert!(matches!(
            manager.create("   ", VisualConfig::default()),
            Err(SurfaceError::Tick(TickError::EmptySymbol))
        ));
        assert_eq!(manager.resource_counts(), ResourceCounts::default());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (mut manager, _publisher, mut commands) = manager();
        let id = manager.create("ETH", VisualConfig::default()).unwrap();

        assert!(manager.destroy(id));
        assert!(!manager.destroy(id));
        assert!(!manager.destroy(DisplayId(999)));

        assert_eq!(manager.resource_counts(), ResourceCounts::default());
        assert_eq!(manager.stats().destroyed, 1);
        assert_eq!(manager.stats().release_failures, 0);
        assert_eq!(commands.try_recv().unwrap(), SubscriptionCommand::Start(Symbol::new("ETH")));
        assert_eq!(commands.try_recv().unwrap(), SubscriptionCommand::Stop(Symbol::new("ETH")));
        assert!(commands.try_recv().is_err());
    }

    #[test]
    fn test_shared_symbol_refcount() {
        let (mut manager, _publisher, mut commands) = manager();
        let a = manager.create("BTC", VisualConfig::default()).unwrap();
        let b = manager.create("BTC", VisualConfig::default()).unwrap();
        assert_eq!(manager.subscriptions().refcount("BTC"), 2);

        manager.destroy(a);
        assert_eq!(manager.subscriptions().refcount("BTC"), 1);
        manager.destroy(b);

        let received: Vec<SubscriptionCommand> = std::iter::from_fn(|| commands.try_recv().ok()).collect();
        assert_eq!(
            received,
            vec![
                SubscriptionCommand::Start(Symbol::new("BTC")),
                SubscriptionCommand::Stop(Symbol::new("BTC")),
            ]
        );
    }

    #[test]
    fn test_pump_routes_to_every_subscriber() {
        let (mut manager, publisher, _commands) = manager();
        let a = manager.create("BTC", VisualConfig::default()).unwrap();
        let b = manager.create("BTC", VisualConfig::default()).unwrap();
        let c = manager.create("ETH", VisualConfig::default()).unwrap();

        publisher.publish(snapshot("BTC", 1, 100.0));
        publisher.publish(snapshot("SOL", 1, 20.0));
        let applied = manager.pump_updates(Instant::now());

        assert_eq!(applied, 2);
        assert_eq!(manager.display(a).unwrap().last_sequence(), 1);
        assert_eq!(manager.display(b).unwrap().last_sequence(), 1);
        assert_eq!(manager.display(c).unwrap().last_sequence(), 0);
        assert_eq!(manager.stats().snapshots_unrouted, 1);
    }

    #[test]
    fn test_destroy_during_checkout_is_deferred() {
        let (mut manager, publisher, mut commands) = manager();
        let id = manager.create("BTC", VisualConfig::default()).unwrap();
        assert_eq!(commands.try_recv().unwrap(), SubscriptionCommand::Start(Symbol::new("BTC")));

        let display = manager.checkout(id).unwrap();
        assert!(manager.destroy(id));
        assert!(!manager.destroy(id));
        assert!(!manager.contains(id));
        assert!(manager.ids().is_empty());

        // routing stops at once
        publisher.publish(snapshot("BTC", 1, 100.0));
        assert_eq!(manager.pump_updates(Instant::now()), 0);
        assert_eq!(manager.resource_counts().held_updates, 0);

        // ledger not drained while the redraw is in flight
        assert_eq!(manager.resource_counts().surfaces, 1);
        assert_eq!(manager.subscriptions().refcount("BTC"), 1);
        assert!(commands.try_recv().is_err());

        manager.checkin(display);
        assert_eq!(manager.resource_counts(), ResourceCounts::default());
        assert!(manager.display(id).is_none());
        assert_eq!(commands.try_recv().unwrap(), SubscriptionCommand::Stop(Symbol::new("BTC")));
        assert_eq!(manager.stats().release_failures, 0);
    }

    #[test]
    fn test_updates_held_during_checkout() {
        let (mut manager, publisher, _commands) = manager();
        let id = manager.create("BTC", VisualConfig::default()).unwrap();
        let display = manager.checkout(id).unwrap();

        publisher.publish(snapshot("BTC", 1, 100.0));
        publisher.publish(snapshot("BTC", 2, 101.0));
        manager.pump_updates(Instant::now());
        assert_eq!(manager.resource_counts().held_updates, 1);

        manager.checkin(display);
        let display = manager.display(id).unwrap();
        assert_eq!(display.last_sequence(), 2);
        assert_eq!(display.state(), RenderState::Dirty);
    }

    #[test]
    fn test_staleness_timer() {
        let (mut manager, publisher, _commands) = manager();
        let id = manager.create("BTC", VisualConfig::default()).unwrap();
        let t0 = Instant::now();
        let stale_after = manager.config().stale_after;

        publisher.publish(snapshot("BTC", 1, 100.0));
        manager.pump_updates(t0);
        assert!(manager.fire_timers(t0).is_empty());
        assert_eq!(manager.fire_timers(t0 + stale_after), vec![id]);
        assert!(manager.display(id).unwrap().is_stale());
    }

    #[test]
    fn test_resize_and_compose() {
        let (mut manager, _publisher, _commands) = manager();
        let id = manager.create("BTC", VisualConfig::default()).unwrap();
        manager.resize(id, Rect::new(5, 2, 20, 6)).unwrap();
        assert_eq!(manager.resource_counts().surface_cells, 120);

        let mut display = manager.checkout(id).unwrap();
        let painter = manager.painter();
        display.redraw(painter.as_ref()).unwrap();
        manager.checkin(display);

        let mut host = Buffer::empty(Rect::new(0, 0, 40, 12));
        manager.compose(&mut host);
        assert_eq!(host[(5, 2)].symbol(), "┌");
        assert_eq!(host[(0, 0)].symbol(), " ");

        assert!(matches!(
            manager.resize(DisplayId(42), Rect::new(0, 0, 1, 1)),
            Err(SurfaceError::UnknownDisplay(_))
        ));
    }
}
