//! Recording state management
//!
//! Defines the recording state machine, the active session description
//! and the summary produced when a recording stops.

use crate::compose::Layout;
use crate::encode::{QualityPreset, QualityProfile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Current state of the recording pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Encoders and container are being set up
    Starting,
    /// Currently recording
    Recording,
    /// Recording is paused
    Paused,
    /// Flushing and releasing resources
    Stopping,
    /// The video path failed; the next stop cleans up
    Failed,
}

impl RecordingState {
    /// Whether a recording session exists in this state
    pub fn is_active(self) -> bool {
        !matches!(self, RecordingState::Idle)
    }
}

/// The one active recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: String,
    pub output_path: PathBuf,
    pub quality: QualityPreset,
    /// Profile fixed at start; later quality changes do not touch it
    pub profile: QualityProfile,
    pub layout: Layout,
    pub swapped: bool,
    pub audio_enabled: bool,
    pub started_at: DateTime<Utc>,
}

impl RecordingSession {
    pub fn new(
        output_path: PathBuf,
        quality: QualityPreset,
        layout: Layout,
        swapped: bool,
        audio_enabled: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            output_path,
            quality,
            profile: quality.profile(),
            layout,
            swapped,
            audio_enabled,
            started_at: Utc::now(),
        }
    }
}

/// Wall time spent recording, excluding pauses
#[derive(Debug, Clone, Copy)]
pub struct RecordingTimer {
    started: Instant,
    paused_total: Duration,
    paused_since: Option<Instant>,
}

impl RecordingTimer {
    pub fn start() -> Self {
        Self::start_at(Instant::now())
    }

    pub fn start_at(now: Instant) -> Self {
        Self {
            started: now,
            paused_total: Duration::ZERO,
            paused_since: None,
        }
    }

    pub fn pause_at(&mut self, now: Instant) {
        if self.paused_since.is_none() {
            self.paused_since = Some(now);
        }
    }

    pub fn resume_at(&mut self, now: Instant) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total += now.saturating_duration_since(since);
        }
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        let paused_now = self
            .paused_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        now.saturating_duration_since(self.started)
            .saturating_sub(self.paused_total + paused_now)
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }
}

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOutput {
    pub session_id: String,

    /// Path to the finished video file
    pub output_path: String,

    pub quality: QualityPreset,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,

    /// Whether an audio track made it into the file
    pub has_audio: bool,

    /// Recorded duration in milliseconds, pauses excluded
    pub duration_ms: f64,

    pub file_size: u64,
    pub frames_composed: u64,
    pub packets_written: u64,
    pub packets_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_excludes_pauses() {
        let t0 = Instant::now();
        let mut timer = RecordingTimer::start_at(t0);
        timer.pause_at(t0 + Duration::from_secs(2));
        assert_eq!(timer.elapsed_at(t0 + Duration::from_secs(5)), Duration::from_secs(2));

        timer.resume_at(t0 + Duration::from_secs(5));
        assert_eq!(timer.elapsed_at(t0 + Duration::from_secs(6)), Duration::from_secs(3));
    }

    #[test]
    fn test_session_pins_profile() {
        let session = RecordingSession::new(
            PathBuf::from("a.mp4"),
            QualityPreset::High,
            Layout::default(),
            false,
            true,
        );
        assert_eq!(session.profile, QualityPreset::High.profile());
        assert!(uuid::Uuid::parse_str(&session.id).is_ok());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RecordingState::Stopping).unwrap(), "\"stopping\"");
        assert!(!RecordingState::Idle.is_active());
        assert!(RecordingState::Failed.is_active());
    }
}
