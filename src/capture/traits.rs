//! Capture trait definitions
//!
//! Platform-agnostic seams for camera and microphone hardware. Backends
//! implement these; everything above them (sessions, composition,
//! recording) is hardware independent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by capture backends
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Not supported: {0}")]
    Unsupported(String),
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Direction a camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
    /// No facing characteristic (USB webcams, capture cards)
    External,
}

impl Facing {
    /// Best-effort facing guess from a human readable device name.
    pub fn from_device_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if ["front", "user", "facetime", "selfie"]
            .iter()
            .any(|hint| name.contains(hint))
        {
            Facing::Front
        } else if ["back", "rear", "environment", "world"]
            .iter()
            .any(|hint| name.contains(hint))
        {
            Facing::Back
        } else {
            Facing::External
        }
    }
}

/// Which composition slot a device occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Back,
    Front,
}

impl DeviceRole {
    /// Both roles, in open order
    pub const ALL: [DeviceRole; 2] = [DeviceRole::Back, DeviceRole::Front];

    pub fn other(self) -> Self {
        match self {
            DeviceRole::Back => DeviceRole::Front,
            DeviceRole::Front => DeviceRole::Back,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceRole::Back => "back",
            DeviceRole::Front => "front",
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Information about a camera
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Stable device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Facing direction
    pub facing: Facing,

    /// Supported resolutions
    pub supported_resolutions: Vec<Resolution>,
}

/// Pixel layout of a raw sensor frame. All layouts are tightly packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Planar Y, then U, then V at quarter resolution
    I420,
    /// Y plane followed by interleaved UV
    Nv12,
    /// Y plane followed by interleaved VU
    Nv21,
    /// Packed Y0 U Y1 V
    Yuyv,
    Rgb24,
    Rgba,
}

impl PixelFormat {
    /// Number of bytes a `width` x `height` frame occupies
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        let chroma = (width as usize).div_ceil(2) * (height as usize).div_ceil(2);
        match self {
            PixelFormat::I420 | PixelFormat::Nv12 | PixelFormat::Nv21 => pixels + chroma * 2,
            PixelFormat::Yuyv => (width as usize).div_ceil(2) * 4 * height as usize,
            PixelFormat::Rgb24 => pixels * 3,
            PixelFormat::Rgba => pixels * 4,
        }
    }
}

/// One frame as delivered by a camera backend
#[derive(Clone)]
pub struct RawFrame {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Sensor timestamp relative to stream start
    pub timestamp: Duration,
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Stream parameters requested when opening a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Frame-sampling output size
    pub resolution: Resolution,
    /// Requested sensor frame rate
    pub frame_rate: u32,
}

/// A camera hardware provider.
///
/// Shared across device worker threads; `open` is always called on the
/// thread that will own the returned device.
pub trait CameraBackend: Send + Sync {
    /// Backend name for diagnostics
    fn name(&self) -> &str;

    /// Whether camera access has been granted to this process
    fn has_permission(&self) -> bool;

    /// Enumerate the cameras currently attached
    fn enumerate(&self) -> CaptureResult<Vec<CameraInfo>>;

    /// Device ID pairs the platform certifies for concurrent streaming
    fn concurrent_pairs(&self) -> Vec<(String, String)>;

    /// Open a device and start streaming
    fn open(&self, device_id: &str, config: &StreamConfig) -> CaptureResult<Box<dyn CameraDevice>>;
}

/// An open camera. Owned by exactly one worker thread.
pub trait CameraDevice {
    /// Device ID this handle was opened with
    fn id(&self) -> &str;

    /// Request continuous autofocus / auto-exposure
    fn enable_auto_controls(&mut self) -> CaptureResult<()>;

    /// Wait for the next streamed frame; `Ok(None)` when none arrived in time
    fn next_frame(&mut self, timeout: Duration) -> CaptureResult<Option<RawFrame>>;

    /// Capture one full still frame
    fn capture_still(&mut self) -> CaptureResult<RawFrame>;

    /// Stop streaming and release the device
    fn close(&mut self);
}

/// A live microphone
pub trait AudioSource: Send {
    /// Actual capture sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Start capturing
    fn start(&mut self) -> CaptureResult<()>;

    /// Read mono samples into `buf`; returns the count read, 0 on timeout
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> CaptureResult<usize>;

    /// Stop capturing and release the device
    fn stop(&mut self);
}

/// Opens microphones for recordings
pub trait MicrophoneProvider: Send + Sync {
    /// Open the microphone, preferring `sample_rate`. The source reports
    /// the rate it actually delivers.
    fn open(&self, sample_rate: u32) -> CaptureResult<Box<dyn AudioSource>>;
}
