//! Native camera backend using nokhwa
//!
//! Desktop platforms expose no facing characteristic and no concurrency
//! certification, so facing is guessed from the device name and
//! `concurrent_pairs` is always empty.
//!
//! nokhwa's `frame()` has no deadline: a device that stops delivering
//! blocks its worker until the device errors. Closing the cameras still
//! returns, because worker joins are bounded.

use super::traits::{
    CameraBackend, CameraDevice, CameraInfo, CaptureError, CaptureResult, Facing, PixelFormat,
    RawFrame, Resolution, StreamConfig,
};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, ControlValueSetter, FrameFormat, KnownCameraControl,
    KnownCameraControlFlag, RequestedFormat, RequestedFormatType, Resolution as NokhwaResolution,
};
use nokhwa::Camera;
use std::time::{Duration, Instant};

/// Camera backend over the platform's native capture API
#[derive(Debug, Default)]
pub struct NokhwaCameraBackend;

impl NokhwaCameraBackend {
    pub fn new() -> Self {
        Self
    }

    fn camera_index(device_id: &str) -> CameraIndex {
        match device_id.parse::<u32>() {
            Ok(idx) => CameraIndex::Index(idx),
            Err(_) => CameraIndex::String(device_id.to_string()),
        }
    }
}

impl CameraBackend for NokhwaCameraBackend {
    fn name(&self) -> &str {
        "nokhwa"
    }

    fn has_permission(&self) -> bool {
        // nokhwa surfaces a denied permission as an open failure
        true
    }

    fn enumerate(&self) -> CaptureResult<Vec<CameraInfo>> {
        let cameras = nokhwa::query(ApiBackend::Auto)
            .map_err(|e| CaptureError::Configuration(format!("Failed to enumerate cameras: {e}")))?;

        Ok(cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                let name = info.human_name();
                let facing = Facing::from_device_name(&format!("{} {}", name, info.description()));

                CameraInfo {
                    id,
                    name,
                    facing,
                    supported_resolutions: vec![
                        Resolution::new(1920, 1080),
                        Resolution::new(1280, 720),
                        Resolution::new(640, 480),
                    ],
                }
            })
            .collect())
    }

    fn concurrent_pairs(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn open(&self, device_id: &str, config: &StreamConfig) -> CaptureResult<Box<dyn CameraDevice>> {
        let index = Self::camera_index(device_id);
        let target = CameraFormat::new(
            NokhwaResolution::new(config.resolution.width, config.resolution.height),
            FrameFormat::MJPEG,
            config.frame_rate,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(target));

        let mut camera = Camera::new(index, requested).map_err(|e| {
            CaptureError::DeviceNotFound(format!("Failed to open camera {device_id}: {e}"))
        })?;
        camera
            .open_stream()
            .map_err(|e| CaptureError::Stream(format!("Failed to open camera stream: {e}")))?;

        let format = camera.camera_format();
        tracing::info!(
            "Camera {} opened: {}x{} @ {}fps, format={:?}",
            device_id,
            format.resolution().width(),
            format.resolution().height(),
            format.frame_rate(),
            format.format()
        );

        Ok(Box::new(NokhwaCameraDevice {
            id: device_id.to_string(),
            camera,
            started: Instant::now(),
        }))
    }
}

struct NokhwaCameraDevice {
    id: String,
    camera: Camera,
    started: Instant,
}

impl NokhwaCameraDevice {
    fn grab(&mut self) -> CaptureResult<RawFrame> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| CaptureError::Stream(format!("Failed to capture frame: {e}")))?;
        let image = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CaptureError::Stream(format!("Failed to decode frame: {e}")))?;

        Ok(RawFrame {
            format: PixelFormat::Rgb24,
            width: image.width(),
            height: image.height(),
            data: image.into_raw(),
            timestamp: self.started.elapsed(),
        })
    }

    /// Put `control` in automatic mode, or say why it cannot be
    fn set_automatic(&mut self, control: KnownCameraControl) -> Result<(), String> {
        let current = self
            .camera
            .camera_control(control)
            .map_err(|e| format!("{control:?} control unavailable: {e}"))?;
        if runs_automatically(current.flag()) {
            return Ok(());
        }

        let (switch, value) = auto_switch(control)
            .ok_or_else(|| format!("{control:?} cannot be switched to automatic"))?;
        self.camera
            .set_camera_control(switch, value)
            .map_err(|e| format!("Failed to enable automatic {control:?}: {e}"))?;
        tracing::debug!("Camera {}: {:?} switched to automatic", self.id, control);
        Ok(())
    }

    /// Restart the stream in `format`
    fn switch_format(&mut self, format: CameraFormat) -> CaptureResult<()> {
        self.camera
            .stop_stream()
            .map_err(|e| CaptureError::Stream(format!("Failed to stop stream: {e}")))?;
        self.camera
            .set_camera_format(format)
            .map_err(|e| CaptureError::Configuration(format!("Failed to set format {format}: {e}")))?;
        self.camera
            .open_stream()
            .map_err(|e| CaptureError::Stream(format!("Failed to restart stream: {e}")))
    }
}

impl CameraDevice for NokhwaCameraDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn enable_auto_controls(&mut self) -> CaptureResult<()> {
        let failures: Vec<String> = [KnownCameraControl::Focus, KnownCameraControl::Exposure]
            .into_iter()
            .filter_map(|control| self.set_automatic(control).err())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CaptureError::Unsupported(failures.join("; ")))
        }
    }

    fn next_frame(&mut self, _timeout: Duration) -> CaptureResult<Option<RawFrame>> {
        self.grab().map(Some)
    }

    /// A frame at the device's highest resolution in the stream's encoding.
    ///
    /// The stream restarts in that format for one frame and then returns to
    /// the sampling format. When the device refuses the switch, the still
    /// is the next sampling frame instead.
    fn capture_still(&mut self) -> CaptureResult<RawFrame> {
        let stream_format = self.camera.camera_format();
        let still_format = match self.camera.compatible_camera_formats() {
            Ok(formats) => highest_resolution(&formats, stream_format),
            Err(e) => {
                tracing::debug!("Camera {}: cannot list formats: {}", self.id, e);
                None
            }
        };
        let Some(still_format) = still_format else {
            return self.grab();
        };

        if let Err(e) = self.switch_format(still_format) {
            tracing::warn!(
                "Camera {}: still at {} refused ({}); using a stream frame",
                self.id,
                still_format,
                e
            );
            self.switch_format(stream_format)?;
            return self.grab();
        }

        let still = self.grab();
        if let Err(e) = self.switch_format(stream_format) {
            tracing::error!("Camera {}: failed to restore stream format: {}", self.id, e);
        }
        still
    }

    fn close(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Error stopping camera {} stream: {:?}", self.id, e);
        }
    }
}

fn runs_automatically(flags: &[KnownCameraControlFlag]) -> bool {
    flags.iter().any(|flag| {
        matches!(
            flag,
            KnownCameraControlFlag::Automatic | KnownCameraControlFlag::Continuous
        )
    })
}

/// V4L2 exposes automatic focus and exposure as separate switch controls
#[cfg(target_os = "linux")]
fn auto_switch(control: KnownCameraControl) -> Option<(KnownCameraControl, ControlValueSetter)> {
    const V4L2_CID_EXPOSURE_AUTO: u128 = 0x009a_0901;
    const V4L2_CID_FOCUS_AUTO: u128 = 0x009a_090c;
    const V4L2_EXPOSURE_APERTURE_PRIORITY: i64 = 3;

    match control {
        KnownCameraControl::Focus => Some((
            KnownCameraControl::Other(V4L2_CID_FOCUS_AUTO),
            ControlValueSetter::Boolean(true),
        )),
        KnownCameraControl::Exposure => Some((
            KnownCameraControl::Other(V4L2_CID_EXPOSURE_AUTO),
            ControlValueSetter::Integer(V4L2_EXPOSURE_APERTURE_PRIORITY),
        )),
        _ => None,
    }
}

#[cfg(not(target_os = "linux"))]
fn auto_switch(_control: KnownCameraControl) -> Option<(KnownCameraControl, ControlValueSetter)> {
    None
}

/// The largest format in `current`'s encoding, if it beats `current`
fn highest_resolution(formats: &[CameraFormat], current: CameraFormat) -> Option<CameraFormat> {
    let area = |f: &CameraFormat| f.resolution().width() as u64 * f.resolution().height() as u64;
    formats
        .iter()
        .copied()
        .filter(|f| f.format() == current.format() && area(f) > area(&current))
        .max_by_key(|f| (area(f), f.frame_rate()))
}
