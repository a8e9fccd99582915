//! Frame composition
//!
//! Raw frame conversion, layouts and the engine that draws the two camera
//! streams into a single canvas.

pub mod bitmap;
pub mod convert;
pub mod engine;
pub mod layout;

pub use bitmap::{Bitmap, Rect, Rotation, BACKGROUND};
pub use convert::{to_bitmap, ConvertError};
pub use engine::{
    compose_into, CompositionEngine, CompositionStats, Orientation, StoredFrame, SubmitOutcome,
};
pub use layout::{Corner, Layout};
