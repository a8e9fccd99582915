//! Engine configuration
//!
//! Every tunable the capture core uses, with defaults. Stored as camelCase
//! JSON; missing fields take their default.

use crate::capture::Resolution;
use crate::compose::{Layout, Orientation, Rotation};
use crate::encode::{PipelineTimeouts, QualityPreset};
use crate::utils::AppResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunable engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Where recordings and photos are written
    pub output_dir: PathBuf,

    /// Preview surface size
    pub preview_resolution: Resolution,

    /// Size each camera streams at for composition
    pub sample_resolution: Resolution,
    pub sample_frame_rate: u32,

    /// Minimum gap between frames a device hands to the compositor
    pub sample_interval_ms: u64,

    /// Minimum gap between frames the compositor accepts per device
    pub compose_throttle_ms: u64,

    /// Bound on acquiring the camera hardware lock
    pub open_timeout_ms: u64,

    /// Bound on waiting for still captures
    pub still_timeout_ms: u64,

    /// Bound on encoders draining after end-of-stream
    pub stop_drain_timeout_ms: u64,

    /// Bound on a worker thread exiting once asked
    pub join_timeout_ms: u64,

    /// Bound on the audio track registering before recording goes video-only
    pub audio_start_timeout_ms: u64,

    pub audio_sample_rate: u32,
    pub audio_bitrate: u32,

    pub back_rotation: Rotation,
    pub front_rotation: Rotation,
    pub mirror_front: bool,

    pub default_layout: Layout,
    pub default_quality: QualityPreset,
    pub default_audio_enabled: bool,

    /// FFmpeg executable used by the media backend
    pub ffmpeg_path: String,
}

/// `$HOME/Videos/DualCam`, or `./DualCam` without a home directory
pub fn default_output_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join("Videos").join("DualCam"))
        .unwrap_or_else(|| PathBuf::from("DualCam"))
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            preview_resolution: Resolution::new(1280, 720),
            sample_resolution: Resolution::new(640, 480),
            sample_frame_rate: 30,
            sample_interval_ms: 33,
            compose_throttle_ms: 33,
            open_timeout_ms: 2500,
            still_timeout_ms: 3000,
            stop_drain_timeout_ms: 1500,
            join_timeout_ms: 1000,
            audio_start_timeout_ms: 3000,
            audio_sample_rate: 44_100,
            audio_bitrate: 128_000,
            back_rotation: Rotation::None,
            front_rotation: Rotation::None,
            mirror_front: true,
            default_layout: Layout::PipBottomRight,
            default_quality: QualityPreset::Medium,
            default_audio_enabled: true,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; a missing file yields the defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            tracing::info!("No engine config at {:?}; using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        tracing::info!("Loaded engine config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn compose_throttle(&self) -> Duration {
        Duration::from_millis(self.compose_throttle_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn still_timeout(&self) -> Duration {
        Duration::from_millis(self.still_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn orientation(&self) -> Orientation {
        Orientation {
            back_rotation: self.back_rotation,
            front_rotation: self.front_rotation,
            mirror_front: self.mirror_front,
        }
    }

    pub fn pipeline_timeouts(&self) -> PipelineTimeouts {
        PipelineTimeouts {
            drain: Duration::from_millis(self.stop_drain_timeout_ms),
            join: self.join_timeout(),
            audio_start: Duration::from_millis(self.audio_start_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("engine.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.open_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(
            &path,
            r#"{ "composeThrottleMs": 50, "defaultLayout": "sideBySideVertical", "frontRotation": "270" }"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.compose_throttle(), Duration::from_millis(50));
        assert_eq!(config.default_layout, Layout::SideBySideVertical);
        assert_eq!(config.front_rotation, Rotation::Cw270);
        assert_eq!(config.sample_resolution, Resolution::new(640, 480));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.json");
        let config = EngineConfig {
            default_quality: QualityPreset::Ultra,
            mirror_front: false,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }
}
