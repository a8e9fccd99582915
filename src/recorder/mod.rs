//! Recording state and the dual-camera coordinator
//!
//! - `state`: recording state machine, session description, stop summary
//! - `coordinator`: the command facade and event bus over the whole engine

pub mod coordinator;
pub mod state;

pub use coordinator::{
    DeviceInfo, DualCameraCoordinator, EngineEvent, LayoutInfo, QualityInfo, QualityOption,
    RecordingStatus,
};
pub use state::{RecordingOutput, RecordingSession, RecordingState, RecordingTimer};
