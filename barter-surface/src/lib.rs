/// Barter Surface - Real-time market visualisation engine
///
/// Turns a stream of raw trade ticks into compact per-instrument displays that
/// stay responsive with many instruments on screen:
/// - Aggregation domain: normalises ticks and keeps per-symbol rolling state
///   (market profile, volatility, day range), emitting at most one snapshot per
///   symbol per cycle
/// - Update channel: bounded, coalescing hand-off of snapshots between domains
/// - Rendering domain: display lifecycle, a frame-budgeted render scheduler and a
///   dirty-region renderer that only repaints what changed
/// - Resource ledger: every surface, timer and subscription a display acquires is
///   released exactly once on destroy
pub mod aggregation;
pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod display;
pub mod error;
pub mod ledger;
pub mod render;
pub mod scheduler;
pub mod snapshot;
pub mod tick;

// Re-export commonly used types for convenience
pub use aggregation::{AggregationEngine, AggregatorStats, SubscriptionCommand};
pub use channel::{ChannelStats, SnapshotPublisher, SnapshotReceiver, update_channel};
pub use config::{
    AggregationConfig, ChannelConfig, ColorMode, Density, RenderConfig, Settings, VisualConfig,
};
pub use diagnostics::{DisplayDiagnostics, ResourceCounts};
pub use display::{DisplayId, DisplayManager, RenderState};
pub use error::{ConfigError, ReleaseError, RenderError, SurfaceError, TickError};
pub use ledger::{ReleaseReport, ResourceKind, ResourceLedger};
pub use render::{LayerId, LayerPainter, WidgetPainter};
pub use scheduler::{Clock, FrameReport, ManualClock, RenderScheduler, SystemClock};
pub use snapshot::VisualSnapshot;
pub use tick::{RawTick, Symbol, Tick};
