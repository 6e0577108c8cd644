use crate::display::DisplayId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `barter-surface`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SurfaceError {
    #[error("tick rejected: {0}")]
    Tick(#[from] TickError),

    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("resource release failed: {0}")]
    Release(#[from] ReleaseError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("unknown display: {0}")]
    UnknownDisplay(DisplayId),
}

/// Reasons a raw tick is dropped by the normaliser.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, Error)]
pub enum TickError {
    #[error("empty symbol")]
    EmptySymbol,

    #[error("non-numeric price: {0}")]
    NonNumericPrice(String),

    #[error("price must be finite and positive: {0}")]
    InvalidPrice(String),

    #[error("non-numeric volume: {0}")]
    NonNumericVolume(String),

    #[error("volume must be finite and positive: {0}")]
    InvalidVolume(String),

    #[error("timestamp must be positive: {0}")]
    InvalidTimestamp(i64),
}

/// Failure raised while redrawing one display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, Error)]
pub enum RenderError {
    #[error("layer {layer} failed to paint: {reason}")]
    Paint { layer: String, reason: String },

    #[error("redraw panicked: {0}")]
    Panicked(String),

    #[error("surface has zero area")]
    EmptySurface,
}

impl RenderError {
    /// Convert a caught panic payload into a [`RenderError::Panicked`].
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::Panicked(panic_message(payload))
    }
}

/// Failure raised by one resource release callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, Error)]
pub enum ReleaseError {
    #[error("{kind} already released: {record}")]
    AlreadyReleased { kind: String, record: String },

    #[error("{kind} release failed: {reason}")]
    Failed { kind: String, reason: String },

    #[error("release callback panicked: {0}")]
    Panicked(String),
}

/// Invalid settings value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum ConfigError {
    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },

    #[error("{key} out of range: {value}")]
    OutOfRange { key: &'static str, value: String },

    #[error("{key} could not be parsed: {value}")]
    Parse { key: String, value: String },
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
