//! Per-display dirty-region rendering onto ratatui buffers.

pub mod cache;
pub mod layer;
pub mod region;
pub mod renderer;
pub mod surface;

pub use cache::{CacheKey, ContentCache};
pub use layer::{DisplayLayout, DisplayView, LayerId, LayerPainter, WidgetPainter};
pub use region::DirtySet;
pub use renderer::{DirtyRegionRenderer, RedrawStats};
pub use surface::{ResourceGauges, Surface};
