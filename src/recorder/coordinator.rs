//! Dual-camera coordinator
//!
//! The command facade over the camera sessions, the compositor, the
//! recording pipeline and the photo path. Every command returns an
//! `AppResult`; state changes are also announced on a broadcast event bus.

use super::state::{RecordingOutput, RecordingSession, RecordingState};
use crate::camera::{
    CameraSessionManager, CameraStatus, OpenReport, PreviewHandle, PreviewInfo, SessionConfig,
};
use crate::capture::{default_camera_backend, default_microphone, CameraBackend, MicrophoneProvider};
use crate::compose::{Bitmap, CompositionEngine, Layout};
use crate::config::EngineConfig;
use crate::encode::{
    ffmpeg, AudioOptions, FfmpegBackend, MediaBackend, QualityPreset, QualityProfile,
    RecordingPipeline,
};
use crate::photo::{self, PhotoOutput};
use crate::utils::system::os_version;
use crate::utils::{artifact_path, AppError, AppResult, ErrorResponse};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

/// Events pushed to the application layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    RecordingStarted {
        session_id: String,
        output_path: String,
        quality: QualityPreset,
        layout: Layout,
        audio_enabled: bool,
    },
    RecordingStopped {
        paths: Vec<String>,
        output: RecordingOutput,
    },
    RecordingPaused,
    RecordingResumed,
    PhotoTaken {
        paths: Vec<String>,
        photo: PhotoOutput,
    },
    LayoutChanged {
        layout: Layout,
    },
    QualityChanged {
        quality: QualityPreset,
    },
    AudioEnabledChanged {
        enabled: bool,
    },
    CamerasSwapped {
        swapped: bool,
    },
    Error {
        code: String,
        message: String,
    },
}

impl EngineEvent {
    /// Event name as seen by the application layer
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::RecordingStarted { .. } => "recordingStarted",
            EngineEvent::RecordingStopped { .. } => "recordingStopped",
            EngineEvent::RecordingPaused => "recordingPaused",
            EngineEvent::RecordingResumed => "recordingResumed",
            EngineEvent::PhotoTaken { .. } => "photoTaken",
            EngineEvent::LayoutChanged { .. } => "layoutChanged",
            EngineEvent::QualityChanged { .. } => "qualityChanged",
            EngineEvent::AudioEnabledChanged { .. } => "audioEnabledChanged",
            EngineEvent::CamerasSwapped { .. } => "camerasSwapped",
            EngineEvent::Error { .. } => "error",
        }
    }

    fn error(error: AppError) -> Self {
        let response = ErrorResponse::from(error);
        EngineEvent::Error {
            code: response.code,
            message: response.message,
        }
    }
}

/// Recording status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub state: RecordingState,
    pub session: Option<RecordingSession>,
    pub duration_ms: f64,
    pub frames_composed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutInfo {
    pub layout: Layout,
    pub swapped: bool,
    pub is_pip: bool,
    pub available: Vec<Layout>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityOption {
    pub quality: QualityPreset,
    pub profile: QualityProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityInfo {
    pub quality: QualityPreset,
    pub profile: QualityProfile,
    pub audio_enabled: bool,
    pub available: Vec<QualityOption>,
}

/// Host and backend description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub os: String,
    pub os_version: String,
    pub arch: String,
    pub camera_backend: String,
    pub camera_count: usize,
    pub official_dual_camera_support: bool,
    pub ffmpeg_available: bool,
    pub output_dir: String,
}

/// User-selectable capture settings
#[derive(Debug, Clone, Copy)]
struct CaptureSettings {
    quality: QualityPreset,
    audio_enabled: bool,
}

struct Inner {
    config: EngineConfig,
    cameras: CameraSessionManager,
    compositor: Arc<CompositionEngine>,
    pipeline: RecordingPipeline,
    settings: RwLock<CaptureSettings>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Inner {
    fn emit(&self, event: EngineEvent) {
        tracing::debug!("Event: {}", event.name());
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn stop_recording(&self) -> AppResult<Option<RecordingOutput>> {
        let output = self.pipeline.stop()?;
        if let Some(output) = &output {
            self.emit(EngineEvent::RecordingStopped {
                paths: vec![output.output_path.clone()],
                output: output.clone(),
            });
        }
        Ok(output)
    }

    /// Tear down a recording whose video path failed
    fn on_fatal(&self, reason: String) {
        tracing::error!("Recording failed: {}", reason);
        self.emit(EngineEvent::error(AppError::Encoding(reason)));
        if let Err(e) = self.stop_recording() {
            tracing::error!("Cleanup after failed recording: {}", e);
            self.emit(EngineEvent::error(e));
        }
    }
}

/// Cheap to clone; all clones drive the same engine
#[derive(Clone)]
pub struct DualCameraCoordinator {
    inner: Arc<Inner>,
}

impl DualCameraCoordinator {
    pub fn new(
        config: EngineConfig,
        camera_backend: Arc<dyn CameraBackend>,
        media: Arc<dyn MediaBackend>,
        microphone: Arc<dyn MicrophoneProvider>,
    ) -> Self {
        let compositor = Arc::new(CompositionEngine::new(
            config.default_layout,
            config.compose_throttle(),
            config.orientation(),
        ));
        let cameras = CameraSessionManager::new(
            camera_backend,
            compositor.clone(),
            SessionConfig::from(&config),
        );
        let pipeline = RecordingPipeline::new(
            media,
            microphone,
            compositor.clone(),
            config.pipeline_timeouts(),
        );
        let (event_tx, _) = broadcast::channel(100);
        let settings = CaptureSettings {
            quality: config.default_quality,
            audio_enabled: config.default_audio_enabled,
        };

        let inner = Arc::new(Inner {
            config,
            cameras,
            compositor,
            pipeline,
            settings: RwLock::new(settings),
            event_tx,
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inner.pipeline.set_fatal_handler(Arc::new(move |reason: String| {
            let weak = weak.clone();
            // Stopping joins the worker that reported; do it elsewhere
            let spawned = std::thread::Builder::new()
                .name("recording-supervisor".into())
                .spawn(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_fatal(reason);
                    }
                });
            if let Err(e) = spawned {
                tracing::error!("Failed to spawn recording supervisor: {}", e);
            }
        }));

        Self { inner }
    }

    /// Native cameras and microphone (per build features) with FFmpeg encoding
    pub fn with_defaults(config: EngineConfig) -> Self {
        let media = Arc::new(FfmpegBackend::new(config.ffmpeg_path.clone()));
        Self::new(config, default_camera_backend(), media, default_microphone())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn initialize(&self) -> AppResult<Vec<PreviewInfo>> {
        self.inner.cameras.initialize()
    }

    pub fn open_cameras(&self) -> AppResult<OpenReport> {
        self.inner.cameras.open_cameras()
    }

    /// Change the layout. Rejected while a recording is active.
    pub fn set_layout(&self, name: &str) -> AppResult<Layout> {
        let layout: Layout = name.parse().map_err(AppError::InvalidArgument)?;
        let state = self.inner.pipeline.state();
        if state.is_active() {
            return Err(AppError::InvalidState(format!(
                "Cannot change layout while {:?}",
                state
            )));
        }

        self.inner.compositor.set_layout(layout);
        tracing::info!("Layout set to {}", layout);
        self.inner.emit(EngineEvent::LayoutChanged { layout });
        Ok(layout)
    }

    /// Change the quality used by the next recording
    pub fn set_quality(&self, name: &str) -> AppResult<QualityPreset> {
        let quality: QualityPreset = name.parse().map_err(AppError::InvalidArgument)?;
        self.inner.settings.write().quality = quality;
        tracing::info!("Quality set to {}", quality);
        self.inner.emit(EngineEvent::QualityChanged { quality });
        Ok(quality)
    }

    /// Change whether the next recording captures audio
    pub fn set_audio_enabled(&self, enabled: bool) -> AppResult<bool> {
        self.inner.settings.write().audio_enabled = enabled;
        tracing::info!("Audio {}", if enabled { "enabled" } else { "disabled" });
        self.inner.emit(EngineEvent::AudioEnabledChanged { enabled });
        Ok(enabled)
    }

    pub fn start_recording(&self) -> AppResult<RecordingSession> {
        if self.inner.cameras.open_roles().is_empty() {
            return Err(AppError::CameraUnavailable(
                "Open a camera before recording".to_string(),
            ));
        }

        let settings = *self.inner.settings.read();
        let config = &self.inner.config;
        let path = artifact_path(&config.output_dir, "mp4")?;
        let session = RecordingSession::new(
            path,
            settings.quality,
            self.inner.compositor.layout(),
            self.inner.compositor.is_swapped(),
            settings.audio_enabled,
        );
        let audio = settings.audio_enabled.then_some(AudioOptions {
            sample_rate: config.audio_sample_rate,
            bitrate: config.audio_bitrate,
        });

        self.inner.pipeline.start(session.clone(), audio)?;
        self.inner.emit(EngineEvent::RecordingStarted {
            session_id: session.id.clone(),
            output_path: session.output_path.to_string_lossy().to_string(),
            quality: session.quality,
            layout: session.layout,
            audio_enabled: session.audio_enabled,
        });
        Ok(session)
    }

    /// Stop the active recording; `Ok(None)` when nothing is recording
    pub fn stop_recording(&self) -> AppResult<Option<RecordingOutput>> {
        self.inner.stop_recording()
    }

    pub fn pause_recording(&self) -> AppResult<()> {
        self.inner.pipeline.pause()?;
        self.inner.emit(EngineEvent::RecordingPaused);
        Ok(())
    }

    pub fn resume_recording(&self) -> AppResult<()> {
        self.inner.pipeline.resume()?;
        self.inner.emit(EngineEvent::RecordingResumed);
        Ok(())
    }

    pub fn take_picture(&self) -> AppResult<PhotoOutput> {
        let profile = self.inner.settings.read().quality.profile();
        let photo = photo::take_picture(&self.inner.cameras, profile, &self.inner.config.output_dir)?;
        self.inner.emit(EngineEvent::PhotoTaken {
            paths: vec![photo.path.clone()],
            photo: photo.clone(),
        });
        Ok(photo)
    }

    /// Flip main/inset; returns the new swap state
    pub fn swap_cameras(&self) -> AppResult<bool> {
        let swapped = self.inner.cameras.swap_cameras();
        self.inner.emit(EngineEvent::CamerasSwapped { swapped });
        Ok(swapped)
    }

    /// Close the cameras, stopping any recording first
    pub fn close_cameras(&self) -> AppResult<()> {
        self.stop_if_recording();
        self.inner.cameras.close_cameras();
        Ok(())
    }

    /// Release everything; the coordinator can be initialized again
    pub fn dispose(&self) -> AppResult<()> {
        self.stop_if_recording();
        self.inner.cameras.dispose();
        tracing::info!("Coordinator disposed");
        Ok(())
    }

    fn stop_if_recording(&self) {
        if !self.inner.pipeline.state().is_active() {
            return;
        }
        tracing::info!("Stopping the active recording before releasing cameras");
        if let Err(e) = self.inner.stop_recording() {
            tracing::error!("Failed to stop recording: {}", e);
            self.inner.emit(EngineEvent::error(e));
        }
    }

    pub fn camera_info(&self) -> CameraStatus {
        self.inner.cameras.camera_info()
    }

    pub fn recording_state(&self) -> RecordingStatus {
        let pipeline = &self.inner.pipeline;
        RecordingStatus {
            state: pipeline.state(),
            session: pipeline.session(),
            duration_ms: pipeline.duration().as_secs_f64() * 1000.0,
            frames_composed: pipeline.frames_composed(),
        }
    }

    /// Recorded time of the active recording in milliseconds
    pub fn recording_duration(&self) -> f64 {
        self.inner.pipeline.duration().as_secs_f64() * 1000.0
    }

    pub fn layout_info(&self) -> LayoutInfo {
        let layout = self.inner.compositor.layout();
        LayoutInfo {
            layout,
            swapped: self.inner.compositor.is_swapped(),
            is_pip: layout.is_pip(),
            available: Layout::ALL.to_vec(),
        }
    }

    pub fn quality_info(&self) -> QualityInfo {
        let settings = *self.inner.settings.read();
        QualityInfo {
            quality: settings.quality,
            profile: settings.quality.profile(),
            audio_enabled: settings.audio_enabled,
            available: QualityPreset::ALL
                .iter()
                .map(|&quality| QualityOption {
                    quality,
                    profile: quality.profile(),
                })
                .collect(),
        }
    }

    pub fn device_info(&self) -> DeviceInfo {
        let cameras = self.inner.cameras.camera_info();
        DeviceInfo {
            os: std::env::consts::OS.to_string(),
            os_version: os_version(),
            arch: std::env::consts::ARCH.to_string(),
            camera_backend: self.inner.cameras.backend_name().to_string(),
            camera_count: cameras.cameras.len(),
            official_dual_camera_support: cameras.official_dual_camera_support,
            ffmpeg_available: ffmpeg::is_available(&self.inner.config.ffmpeg_path),
            output_dir: self.inner.config.output_dir.to_string_lossy().to_string(),
        }
    }

    pub fn preview_frame(&self, handle: PreviewHandle) -> AppResult<Option<Bitmap>> {
        self.inner.cameras.preview_frame(handle)
    }
}
