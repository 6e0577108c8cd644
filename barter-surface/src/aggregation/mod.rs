//! Aggregation domain: normalised ticks in, at most one [`VisualSnapshot`](crate::snapshot::VisualSnapshot)
//! per symbol per cycle out.

pub mod engine;
pub mod profile;
pub mod range;
pub mod ring;
pub mod stream;
pub mod volatility;

pub use engine::{AggregationEngine, AggregatorStats, SubscriptionCommand};
pub use stream::{IngestOutcome, StreamStats, SymbolStream};
