//! Display lifecycle: instances, the manager that owns them, symbol subscriptions and timers.

use serde::{Deserialize, Serialize};

pub mod instance;
pub mod manager;
pub mod subscription;
pub mod timer;

pub use instance::{Display, RenderOutcome, RenderState};
pub use manager::{DisplayManager, ManagerStats};
pub use subscription::SubscriptionTable;
pub use timer::{TimerId, TimerRegistry};

/// Unique identifier of a display within one [`DisplayManager`]. Never reused.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Deserialize,
    Serialize,
    derive_more::Display,
    derive_more::From,
)]
pub struct DisplayId(pub u64);
