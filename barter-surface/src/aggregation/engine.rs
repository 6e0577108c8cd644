use super::stream::{IngestOutcome, SymbolStream};
use crate::{
    channel::SnapshotPublisher,
    config::AggregationConfig,
    snapshot::VisualSnapshot,
    tick::{RawTick, Symbol, Tick},
};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

/// Subscription lifecycle commands sent by the rendering domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionCommand {
    /// First display subscribed to a symbol
    Start(Symbol),
    /// Last display unsubscribed from a symbol
    Stop(Symbol),
}

/// Running totals for the aggregation domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct AggregatorStats {
    pub accepted: u64,
    pub malformed: u64,
    pub late: u64,
    pub expired: u64,
    /// Ticks left out of the profile because their price could not be bucketed
    pub out_of_range: u64,
    /// Well-formed ticks for a symbol nobody is subscribed to
    pub unrouted: u64,
    pub cycles: u64,
    pub emitted: u64,
}

/// Owns one [`SymbolStream`] per subscribed symbol and turns raw ticks into
/// at most one [`VisualSnapshot`] per symbol per cycle.
#[derive(Debug)]
pub struct AggregationEngine {
    config: AggregationConfig,
    streams: FnvHashMap<Symbol, SymbolStream>,
    /// Last sequence of every stopped stream, so a restarted stream continues past it
    retired: FnvHashMap<Symbol, u64>,
    stats: AggregatorStats,
}

impl AggregationEngine {
    pub fn new(config: AggregationConfig) -> Self {
        Self {
            config,
            streams: FnvHashMap::default(),
            retired: FnvHashMap::default(),
            stats: AggregatorStats::default(),
        }
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.streams.contains_key(symbol)
    }

    pub fn subscribed(&self) -> impl Iterator<Item = &Symbol> {
        self.streams.keys()
    }

    pub fn stream(&self, symbol: &str) -> Option<&SymbolStream> {
        self.streams.get(symbol)
    }

    pub fn apply(&mut self, command: SubscriptionCommand) {
        match command {
            SubscriptionCommand::Start(symbol) => {
                if !self.streams.contains_key(&symbol) {
                    let sequence = self.retired.remove(&symbol).unwrap_or(0);
                    info!(%symbol, sequence, "aggregation started");
                    let stream =
                        SymbolStream::new(symbol.clone(), &self.config).with_sequence(sequence);
                    self.streams.insert(symbol, stream);
                }
            }
            SubscriptionCommand::Stop(symbol) => {
                if let Some(stream) = self.streams.remove(&symbol) {
                    info!(%symbol, stats = ?stream.stats(), "aggregation stopped");
                    self.retired.insert(symbol, stream.sequence());
                }
            }
        }
    }

    /// Validate and route one raw tick. Malformed ticks are counted and dropped.
    pub fn ingest_raw(&mut self, raw: RawTick) {
        match Tick::try_from(raw) {
            Ok(tick) => self.ingest(&tick),
            Err(error) => {
                self.stats.malformed += 1;
                debug!(%error, "dropped malformed tick");
            }
        }
    }

    pub fn ingest(&mut self, tick: &Tick) {
        let Some(stream) = self.streams.get_mut(&tick.symbol) else {
            self.stats.unrouted += 1;
            return;
        };

        let before = stream.stats();
        match stream.ingest(tick) {
            IngestOutcome::Accepted => self.stats.accepted += 1,
            IngestOutcome::Late => self.stats.late += 1,
        }
        let after = stream.stats();
        self.stats.expired += after.expired - before.expired;
        self.stats.out_of_range += after.out_of_range - before.out_of_range;
    }

    /// Close one aggregation cycle, returning a snapshot for every symbol that changed.
    pub fn cycle(&mut self) -> Vec<VisualSnapshot> {
        self.stats.cycles += 1;
        let snapshots: Vec<VisualSnapshot> =
            self.streams.values_mut().filter_map(SymbolStream::cycle).collect();
        self.stats.emitted += snapshots.len() as u64;
        snapshots
    }

    /// Drive the engine until both inputs close or the rendering side goes away.
    pub async fn run(
        mut self,
        mut ticks: mpsc::Receiver<RawTick>,
        mut commands: mpsc::UnboundedReceiver<SubscriptionCommand>,
        publisher: SnapshotPublisher,
    ) -> AggregatorStats {
        let mut cycle_timer = interval(self.config.cycle_interval);
        cycle_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks_open = true;
        let mut commands_open = true;

        info!(cycle = ?self.config.cycle_interval, "aggregation engine running");

        loop {
            tokio::select! {
                raw = ticks.recv(), if ticks_open => match raw {
                    Some(raw) => self.ingest_raw(raw),
                    None => {
                        debug!("tick feed closed");
                        ticks_open = false;
                    }
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        if let SubscriptionCommand::Stop(symbol) = &command {
                            publisher.forget(symbol);
                        }
                        self.apply(command);
                    }
                    None => {
                        debug!("subscription commands closed");
                        commands_open = false;
                    }
                },
                _ = cycle_timer.tick() => {
                    self.publish_cycle(&publisher);
                }
            }

            if publisher.is_closed() {
                warn!("snapshot receiver dropped, stopping aggregation");
                break;
            }
            if !ticks_open && !commands_open {
                self.publish_cycle(&publisher);
                break;
            }
        }

        info!(stats = ?self.stats, "aggregation engine stopped");
        self.stats
    }

    fn publish_cycle(&mut self, publisher: &SnapshotPublisher) {
        for snapshot in self.cycle() {
            publisher.publish(snapshot);
        }
    }
}
