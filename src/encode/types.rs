//! Encode types and media backend seams
//!
//! Quality profiles, track formats, encoded packets and the traits the
//! recording pipeline drives. A backend hands out encoders as two halves:
//! an input the composition or audio loop feeds, and an output the drain
//! loop polls.

use crate::compose::Bitmap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Encoder and container errors
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Encoder configuration failed: {0}")]
    Configuration(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EncodeResult<T> = Result<T, EncodeError>;

/// Named recording quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QualityPreset {
    #[serde(rename = "480p")]
    Low,
    #[default]
    #[serde(rename = "720p")]
    Medium,
    #[serde(rename = "1080p")]
    High,
    #[serde(rename = "1080p60")]
    Ultra,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 4] = [
        QualityPreset::Low,
        QualityPreset::Medium,
        QualityPreset::High,
        QualityPreset::Ultra,
    ];

    pub fn name(self) -> &'static str {
        match self {
            QualityPreset::Low => "480p",
            QualityPreset::Medium => "720p",
            QualityPreset::High => "1080p",
            QualityPreset::Ultra => "1080p60",
        }
    }

    pub fn profile(self) -> QualityProfile {
        match self {
            QualityPreset::Low => QualityProfile::new(854, 480, 2_500_000, 24),
            QualityPreset::Medium => QualityProfile::new(1280, 720, 5_000_000, 30),
            QualityPreset::High => QualityProfile::new(1920, 1080, 10_000_000, 30),
            QualityPreset::Ultra => QualityProfile::new(1920, 1080, 16_000_000, 60),
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QualityPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        QualityPreset::ALL
            .into_iter()
            .find(|q| q.name() == wanted)
            .or(match wanted.as_str() {
                "low" => Some(QualityPreset::Low),
                "medium" => Some(QualityPreset::Medium),
                "high" => Some(QualityPreset::High),
                "ultra" => Some(QualityPreset::Ultra),
                _ => None,
            })
            .ok_or_else(|| format!("Unknown quality: {s}"))
    }
}

/// Output parameters for one recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityProfile {
    pub width: u32,
    pub height: u32,
    /// Bits per second
    pub bitrate: u32,
    pub frame_rate: u32,
}

impl QualityProfile {
    pub const fn new(width: u32, height: u32, bitrate: u32, frame_rate: u32) -> Self {
        Self {
            width,
            height,
            bitrate,
            frame_rate,
        }
    }

    /// Time between composed frames
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1) as f64)
    }
}

/// Video encoder parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate: u32,
    /// Frames between keyframes
    pub keyframe_interval: u32,
}

impl From<QualityProfile> for VideoSettings {
    /// One keyframe per second
    fn from(profile: QualityProfile) -> Self {
        Self {
            width: profile.width,
            height: profile.height,
            frame_rate: profile.frame_rate,
            bitrate: profile.bitrate,
            keyframe_interval: profile.frame_rate.max(1),
        }
    }
}

/// Audio encoder parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => f.write_str("video"),
            TrackKind::Audio => f.write_str("audio"),
        }
    }
}

/// Format an encoder reports once its output is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackFormat {
    Video {
        codec: String,
        width: u32,
        height: u32,
        frame_rate: u32,
    },
    Audio {
        codec: String,
        sample_rate: u32,
        channels: u16,
    },
}

impl TrackFormat {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackFormat::Video { .. } => TrackKind::Video,
            TrackFormat::Audio { .. } => TrackKind::Audio,
        }
    }
}

/// One chunk of encoded output
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    /// Presentation time from the start of the recording
    pub pts: Duration,
    pub keyframe: bool,
}

impl fmt::Debug for EncodedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedPacket")
            .field("bytes", &self.data.len())
            .field("pts", &self.pts)
            .field("keyframe", &self.keyframe)
            .finish()
    }
}

/// What an encoder output yields when polled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    FormatChanged(TrackFormat),
    Packet(EncodedPacket),
    EndOfStream,
}

/// Frame input of a video encoder
pub trait VideoInput: Send {
    /// Queue one composed frame
    fn submit(&mut self, frame: &Bitmap, pts: Duration) -> EncodeResult<()>;

    /// No more frames will follow; buffered frames get flushed
    fn signal_end_of_stream(&mut self) -> EncodeResult<()>;

    fn release(&mut self) -> EncodeResult<()>;
}

/// PCM input of an audio encoder
pub trait AudioInput: Send {
    /// Queue mono 16-bit samples
    fn submit(&mut self, samples: &[i16], pts: Duration) -> EncodeResult<()>;

    fn signal_end_of_stream(&mut self) -> EncodeResult<()>;

    fn release(&mut self) -> EncodeResult<()>;
}

/// Output side of an encoder, polled by a drain loop
pub trait EncodedOutput: Send {
    /// Wait up to `timeout` for the next event; `Ok(None)` if nothing arrived
    fn dequeue(&mut self, timeout: Duration) -> EncodeResult<Option<EncoderEvent>>;

    fn release(&mut self) -> EncodeResult<()>;
}

pub struct VideoEncoder {
    pub input: Box<dyn VideoInput>,
    pub output: Box<dyn EncodedOutput>,
}

pub struct AudioEncoder {
    pub input: Box<dyn AudioInput>,
    pub output: Box<dyn EncodedOutput>,
}

/// Container writer. Every track must be added before `start`, and
/// samples may only be written after it.
pub trait ContainerWriter: Send {
    /// Register a track; returns its index
    fn add_track(&mut self, format: &TrackFormat) -> EncodeResult<usize>;

    fn start(&mut self) -> EncodeResult<()>;

    fn write_sample(&mut self, track: usize, packet: &EncodedPacket) -> EncodeResult<()>;

    /// Finalize and close the file
    fn finish(&mut self) -> EncodeResult<()>;
}

/// Factory for encoders and container writers
pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &str;

    fn create_video_encoder(&self, settings: &VideoSettings) -> EncodeResult<VideoEncoder>;

    fn create_audio_encoder(&self, settings: &AudioSettings) -> EncodeResult<AudioEncoder>;

    fn create_container(&self, output: &Path) -> EncodeResult<Box<dyn ContainerWriter>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_presets() {
        let p = QualityPreset::Low.profile();
        assert_eq!((p.width, p.height, p.frame_rate, p.bitrate), (854, 480, 24, 2_500_000));
        let p = QualityPreset::Ultra.profile();
        assert_eq!((p.width, p.height, p.frame_rate, p.bitrate), (1920, 1080, 60, 16_000_000));
        assert_eq!(QualityPreset::default(), QualityPreset::Medium);
    }

    #[test]
    fn test_quality_parse() {
        for q in QualityPreset::ALL {
            assert_eq!(q.name().parse::<QualityPreset>().unwrap(), q);
        }
        assert_eq!("HIGH".parse::<QualityPreset>().unwrap(), QualityPreset::High);
        assert!("4k".parse::<QualityPreset>().is_err());
    }

    #[test]
    fn test_quality_serializes_as_name() {
        let json = serde_json::to_string(&QualityPreset::Ultra).unwrap();
        assert_eq!(json, "\"1080p60\"");
    }

    #[test]
    fn test_keyframe_every_second() {
        let settings = VideoSettings::from(QualityPreset::Ultra.profile());
        assert_eq!(settings.keyframe_interval, 60);
    }
}
