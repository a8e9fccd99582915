//! Video/audio encoding and muxing
//!
//! - Quality profiles and media backend traits
//! - Track-registration gate over the container writer
//! - FFmpeg process backend
//! - The recording pipeline that ties them to the compositor

pub mod ffmpeg;
pub mod muxer;
pub mod pipeline;
pub mod types;

pub use ffmpeg::FfmpegBackend;
pub use muxer::{MuxStats, MuxerGate};
pub use pipeline::{AudioOptions, FatalHandler, PipelineTimeouts, RecordingPipeline};
pub use types::{
    AudioEncoder, AudioInput, AudioSettings, ContainerWriter, EncodeError, EncodeResult,
    EncodedOutput, EncodedPacket, EncoderEvent, MediaBackend, QualityPreset, QualityProfile,
    TrackFormat, TrackKind, VideoEncoder, VideoInput, VideoSettings,
};
