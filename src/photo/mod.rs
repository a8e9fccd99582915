//! Still-photo capture and composition
//!
//! Stills are requested from every open device at once. One usable still
//! is written as-is; two are composed with the live layout at the active
//! quality profile's resolution. Output is PNG.

use crate::camera::{CameraSessionManager, StillResult};
use crate::capture::DeviceRole;
use crate::compose::{compose_into, to_bitmap, Bitmap, Layout, Orientation};
use crate::encode::QualityProfile;
use crate::utils::{artifact_path, AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// A photo written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoOutput {
    pub path: String,
    pub width: u32,
    pub height: u32,
    /// Devices whose stills made it into the photo
    pub sources: Vec<DeviceRole>,
    /// Whether two stills were composed
    pub composed: bool,
}

/// An in-memory photo before it is written
pub struct ComposedPhoto {
    pub bitmap: Bitmap,
    pub sources: Vec<DeviceRole>,
    pub composed: bool,
}

/// Turn still results into one photo.
///
/// Failed or unreadable stills contribute nothing.
pub fn compose_stills(
    stills: Vec<StillResult>,
    layout: Layout,
    swapped: bool,
    orientation: Orientation,
    profile: QualityProfile,
) -> AppResult<ComposedPhoto> {
    let mut back = None;
    let mut front = None;
    let mut failures = Vec::new();

    for (role, result) in stills {
        let bitmap = match result {
            Ok(raw) => match to_bitmap(&raw) {
                Ok(bitmap) => bitmap,
                Err(e) => {
                    tracing::warn!("{} still unreadable: {}", role, e);
                    failures.push(format!("{role}: {e}"));
                    continue;
                }
            },
            Err(e) => {
                tracing::warn!("{} still failed: {}", role, e);
                failures.push(format!("{role}: {e}"));
                continue;
            }
        };
        let oriented = orientation.apply(role, bitmap);
        match role {
            DeviceRole::Back => back = Some(oriented),
            DeviceRole::Front => front = Some(oriented),
        }
    }

    match (back, front) {
        (Some(back), Some(front)) => {
            let mut canvas = Bitmap::new(profile.width, profile.height);
            compose_into(&mut canvas, layout, swapped, Some(&back), Some(&front));
            Ok(ComposedPhoto {
                bitmap: canvas,
                sources: vec![DeviceRole::Back, DeviceRole::Front],
                composed: true,
            })
        }
        (Some(only), None) => Ok(ComposedPhoto {
            bitmap: only,
            sources: vec![DeviceRole::Back],
            composed: false,
        }),
        (None, Some(only)) => Ok(ComposedPhoto {
            bitmap: only,
            sources: vec![DeviceRole::Front],
            composed: false,
        }),
        (None, None) => Err(AppError::CaptureFailed(if failures.is_empty() {
            "No still was captured".to_string()
        } else {
            failures.join("; ")
        })),
    }
}

/// Write an RGBA bitmap as an 8-bit PNG
pub fn write_png(path: &Path, bitmap: &Bitmap) -> AppResult<()> {
    let file = File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), bitmap.width(), bitmap.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder
        .write_header()
        .map_err(|e| AppError::CaptureFailed(format!("Failed to write PNG header: {e}")))?;
    writer
        .write_image_data(bitmap.pixels())
        .map_err(|e| AppError::CaptureFailed(format!("Failed to write PNG data: {e}")))?;
    writer
        .finish()
        .map_err(|e| AppError::CaptureFailed(format!("Failed to finish PNG: {e}")))?;
    Ok(())
}

/// Capture, compose and save a photo from the open cameras
pub fn take_picture(
    cameras: &CameraSessionManager,
    profile: QualityProfile,
    output_dir: &Path,
) -> AppResult<PhotoOutput> {
    let stills = cameras.request_stills()?;
    let compositor = cameras.compositor();
    let photo = compose_stills(
        stills,
        compositor.layout(),
        compositor.is_swapped(),
        compositor.orientation(),
        profile,
    )?;

    let path = artifact_path(output_dir, "png")?;
    write_png(&path, &photo.bitmap)?;

    tracing::info!(
        "Photo saved to {:?} ({}x{}, sources {:?})",
        path,
        photo.bitmap.width(),
        photo.bitmap.height(),
        photo.sources
    );

    Ok(PhotoOutput {
        path: path.to_string_lossy().to_string(),
        width: photo.bitmap.width(),
        height: photo.bitmap.height(),
        sources: photo.sources,
        composed: photo.composed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SessionConfig;
    use crate::capture::{CaptureError, Resolution, StreamConfig};
    use crate::compose::CompositionEngine;
    use crate::testing::{solid_frame, FakeCameraBackend, BLUE, RED};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    const PROFILE: QualityProfile = QualityProfile::new(80, 60, 1_000_000, 30);

    fn read_png(path: &Path) -> (u32, u32, Vec<u8>) {
        let decoder = png::Decoder::new(File::open(path).unwrap());
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).unwrap();
        buf.truncate(info.buffer_size());
        (info.width, info.height, buf)
    }

    fn open_manager(backend: &FakeCameraBackend) -> CameraSessionManager {
        let compositor = Arc::new(CompositionEngine::new(
            Layout::SideBySideHorizontal,
            Duration::from_millis(10),
            Orientation::default(),
        ));
        let config = SessionConfig {
            preview_resolution: Resolution::new(32, 18),
            stream: StreamConfig {
                resolution: Resolution::new(16, 12),
                frame_rate: 30,
            },
            sample_interval: Duration::from_millis(10),
            open_timeout: Duration::from_millis(300),
            still_timeout: Duration::from_millis(1000),
            join_timeout: Duration::from_millis(1000),
        };
        let manager = CameraSessionManager::new(Arc::new(backend.clone()), compositor, config);
        manager.initialize().unwrap();
        manager.open_cameras().unwrap();
        manager
    }

    #[test]
    fn test_single_still_passes_through() {
        let stills = vec![(DeviceRole::Back, Ok(solid_frame(RED, 20, 10)))];
        let photo =
            compose_stills(stills, Layout::PipTopLeft, false, Orientation::default(), PROFILE)
                .unwrap();
        assert!(!photo.composed);
        assert_eq!((photo.bitmap.width(), photo.bitmap.height()), (20, 10));
        assert_eq!(photo.sources, vec![DeviceRole::Back]);
    }

    #[test]
    fn test_two_stills_use_layout_and_profile() {
        let stills = vec![
            (DeviceRole::Back, Ok(solid_frame(RED, 20, 10))),
            (DeviceRole::Front, Ok(solid_frame(BLUE, 20, 10))),
        ];
        let photo = compose_stills(
            stills,
            Layout::SideBySideHorizontal,
            true,
            Orientation::default(),
            PROFILE,
        )
        .unwrap();
        assert!(photo.composed);
        assert_eq!((photo.bitmap.width(), photo.bitmap.height()), (80, 60));
        // Swapped: front on the left
        assert_eq!(photo.bitmap.pixel(5, 30), BLUE);
        assert_eq!(photo.bitmap.pixel(75, 30), RED);
    }

    #[test]
    fn test_failed_still_contributes_nothing() {
        let stills = vec![
            (DeviceRole::Back, Err(CaptureError::Stream("shutter".into()))),
            (DeviceRole::Front, Ok(solid_frame(BLUE, 8, 8))),
        ];
        let photo =
            compose_stills(stills, Layout::PipTopLeft, false, Orientation::default(), PROFILE)
                .unwrap();
        assert!(!photo.composed);
        assert_eq!(photo.sources, vec![DeviceRole::Front]);
    }

    #[test]
    fn test_all_failed_is_capture_failed() {
        let stills = vec![
            (DeviceRole::Back, Err(CaptureError::Stream("a".into()))),
            (DeviceRole::Front, Err(CaptureError::Timeout("b".into()))),
        ];
        let err =
            compose_stills(stills, Layout::PipTopLeft, false, Orientation::default(), PROFILE)
                .err()
                .unwrap();
        assert!(matches!(err, AppError::CaptureFailed(_)));
    }

    #[test]
    fn test_take_picture_back_only() {
        let backend = FakeCameraBackend::back_only();
        let manager = open_manager(&backend);
        let dir = tempdir().unwrap();

        let photo = take_picture(&manager, PROFILE, dir.path()).unwrap();
        assert!(!photo.composed);
        assert_eq!(photo.sources, vec![DeviceRole::Back]);

        let (width, height, pixels) = read_png(Path::new(&photo.path));
        assert_eq!((width, height), (64, 48));
        assert_eq!(&pixels[..4], &RED);
        assert!(photo.path.ends_with(".png"));
    }

    #[test]
    fn test_take_picture_dual_composes() {
        let backend = FakeCameraBackend::dual();
        let manager = open_manager(&backend);
        let dir = tempdir().unwrap();

        let photo = take_picture(&manager, PROFILE, dir.path()).unwrap();
        assert!(photo.composed);
        let (width, height, _) = read_png(Path::new(&photo.path));
        assert_eq!((width, height), (80, 60));
    }

    #[test]
    fn test_take_picture_without_cameras() {
        let backend = FakeCameraBackend::dual();
        let compositor = Arc::new(CompositionEngine::new(
            Layout::default(),
            Duration::from_millis(10),
            Orientation::default(),
        ));
        let config = SessionConfig::from(&crate::config::EngineConfig::default());
        let manager = CameraSessionManager::new(Arc::new(backend), compositor, config);
        let dir = tempdir().unwrap();
        assert!(matches!(
            take_picture(&manager, PROFILE, dir.path()),
            Err(AppError::CameraUnavailable(_))
        ));
    }
}
