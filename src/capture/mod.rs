//! Camera and microphone capture
//!
//! Hardware seams plus the native backends behind Cargo features.

pub mod traits;

#[cfg(feature = "native-camera")]
pub mod native;

#[cfg(feature = "native-audio")]
pub mod microphone;

pub use traits::{
    AudioSource, CameraBackend, CameraDevice, CameraInfo, CaptureError, CaptureResult, DeviceRole,
    Facing, MicrophoneProvider, PixelFormat, RawFrame, Resolution, StreamConfig,
};

use std::sync::Arc;

/// Backend used when no native camera support is compiled in
pub struct NoCameraBackend;

impl CameraBackend for NoCameraBackend {
    fn name(&self) -> &str {
        "none"
    }

    fn has_permission(&self) -> bool {
        true
    }

    fn enumerate(&self) -> CaptureResult<Vec<CameraInfo>> {
        Ok(Vec::new())
    }

    fn concurrent_pairs(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn open(&self, device_id: &str, _config: &StreamConfig) -> CaptureResult<Box<dyn CameraDevice>> {
        Err(CaptureError::DeviceNotFound(device_id.to_string()))
    }
}

/// The camera backend for this build
pub fn default_camera_backend() -> Arc<dyn CameraBackend> {
    #[cfg(feature = "native-camera")]
    {
        Arc::new(native::NokhwaCameraBackend::new())
    }

    #[cfg(not(feature = "native-camera"))]
    {
        tracing::warn!("Built without native camera support; no cameras will be discovered");
        Arc::new(NoCameraBackend)
    }
}

/// Microphone provider used when no native audio support is compiled in
pub struct NoMicrophone;

impl MicrophoneProvider for NoMicrophone {
    fn open(&self, _sample_rate: u32) -> CaptureResult<Box<dyn AudioSource>> {
        Err(CaptureError::Unsupported(
            "Built without microphone support".to_string(),
        ))
    }
}

/// The microphone provider for this build
pub fn default_microphone() -> Arc<dyn MicrophoneProvider> {
    #[cfg(feature = "native-audio")]
    {
        Arc::new(microphone::CpalMicrophoneProvider::default())
    }

    #[cfg(not(feature = "native-audio"))]
    {
        Arc::new(NoMicrophone)
    }
}
