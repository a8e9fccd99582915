//! Camera sessions and preview surfaces

pub mod preview;
pub mod session;

pub use preview::{PreviewHandle, PreviewInfo, PreviewSurface};
pub use session::{
    CameraSessionManager, CameraStatus, CaptureSession, DeviceDiscovery, DeviceStatus,
    OpenReport, SessionConfig, SessionStats, StillResult,
};
