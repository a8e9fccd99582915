//! Recording pipeline
//!
//! Owns the encoders, the microphone and the muxer gate for the one active
//! recording and runs the worker loops:
//! - composition: renders the composite at the profile frame rate and feeds
//!   the video encoder
//! - video drain: polls the video encoder and writes through the gate
//! - audio capture: reads the microphone and feeds the audio encoder
//! - audio drain: polls the audio encoder and writes through the gate
//!
//! Audio problems degrade the recording to video-only. Video problems are
//! fatal: the pipeline moves to `Failed` and reports through the fatal
//! handler, whose owner is expected to call `stop`.

use super::muxer::{MuxStats, MuxerGate};
use super::types::{
    AudioEncoder, AudioInput, AudioSettings, EncodedOutput, EncoderEvent, MediaBackend,
    TrackKind, VideoInput, VideoSettings,
};
use crate::capture::{AudioSource, MicrophoneProvider};
use crate::compose::{Bitmap, CompositionEngine};
use crate::recorder::state::{RecordingOutput, RecordingSession, RecordingState, RecordingTimer};
use crate::utils::{join_within, AppError, AppResult};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Poll timeout for encoder output
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(10);

/// Microphone read timeout
const AUDIO_READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Samples read from the microphone per chunk
const AUDIO_CHUNK: usize = 1024;

/// How long status reads wait on the active recording before answering
/// without it; a start holds it while the encoders launch
const STATUS_LOCK_WAIT: Duration = Duration::from_millis(20);

/// Called once with a description when the video path fails
pub type FatalHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Bounded waits used while stopping
#[derive(Debug, Clone, Copy)]
pub struct PipelineTimeouts {
    /// How long the drain loops get to flush after end-of-stream
    pub drain: Duration,
    /// How long any worker gets to exit once asked
    pub join: Duration,
    /// How long the audio encoder gets to produce its track format before
    /// the recording continues video-only
    pub audio_start: Duration,
}

impl Default for PipelineTimeouts {
    fn default() -> Self {
        Self {
            drain: Duration::from_millis(1500),
            join: Duration::from_millis(1000),
            audio_start: Duration::from_millis(3000),
        }
    }
}

/// What `start` needs besides the session itself
#[derive(Debug, Clone, Copy)]
pub struct AudioOptions {
    pub sample_rate: u32,
    pub bitrate: u32,
}

/// Flags and counters shared with the worker threads
struct Shared {
    /// Composition and audio capture keep running while set
    running: AtomicBool,
    /// Drain loops keep running while set
    draining: AtomicBool,
    paused: AtomicBool,
    audio_failed: AtomicBool,
    video_failed: AtomicBool,
    frames_composed: AtomicU64,
    /// Non-fatal problems collected for the stop report
    errors: Mutex<Vec<String>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            draining: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            audio_failed: AtomicBool::new(false),
            video_failed: AtomicBool::new(false),
            frames_composed: AtomicU64::new(0),
            errors: Mutex::new(Vec::new()),
        }
    }

    fn record_error(&self, message: String) {
        self.errors.lock().push(message);
    }
}

struct ActiveRecording {
    session: RecordingSession,
    shared: Arc<Shared>,
    gate: Arc<MuxerGate>,
    timer: RecordingTimer,
    has_audio: bool,
    compose: Option<JoinHandle<Box<dyn VideoInput>>>,
    video_drain: Option<JoinHandle<Box<dyn EncodedOutput>>>,
    audio_capture: Option<JoinHandle<()>>,
    audio_drain: Option<JoinHandle<Box<dyn EncodedOutput>>>,
}

pub struct RecordingPipeline {
    media: Arc<dyn MediaBackend>,
    microphone: Arc<dyn MicrophoneProvider>,
    compositor: Arc<CompositionEngine>,
    timeouts: PipelineTimeouts,
    state: Arc<RwLock<RecordingState>>,
    active: Mutex<Option<ActiveRecording>>,
    on_fatal: RwLock<Option<FatalHandler>>,
}

impl RecordingPipeline {
    pub fn new(
        media: Arc<dyn MediaBackend>,
        microphone: Arc<dyn MicrophoneProvider>,
        compositor: Arc<CompositionEngine>,
        timeouts: PipelineTimeouts,
    ) -> Self {
        Self {
            media,
            microphone,
            compositor,
            timeouts,
            state: Arc::new(RwLock::new(RecordingState::Idle)),
            active: Mutex::new(None),
            on_fatal: RwLock::new(None),
        }
    }

    pub fn set_fatal_handler(&self, handler: FatalHandler) {
        *self.on_fatal.write() = Some(handler);
    }

    pub fn state(&self) -> RecordingState {
        *self.state.read()
    }

    /// Read the active recording, or `None` when there is none or a start
    /// is still launching it
    fn with_active<T>(&self, read: impl FnOnce(&ActiveRecording) -> T) -> Option<T> {
        let slot = self.active.try_lock_for(STATUS_LOCK_WAIT)?;
        slot.as_ref().map(read)
    }

    /// The active session, if any
    pub fn session(&self) -> Option<RecordingSession> {
        self.with_active(|a| a.session.clone())
    }

    /// Recorded time so far, pauses excluded
    pub fn duration(&self) -> Duration {
        self.with_active(|a| a.timer.elapsed()).unwrap_or_default()
    }

    pub fn frames_composed(&self) -> u64 {
        self.with_active(|a| a.shared.frames_composed.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Start recording `session`. On error the pipeline is back in `Idle`
    /// with everything it created released.
    pub fn start(&self, session: RecordingSession, audio: Option<AudioOptions>) -> AppResult<()> {
        {
            let mut state = self.state.write();
            if *state != RecordingState::Idle {
                return Err(AppError::InvalidState(format!(
                    "Cannot start recording while {:?}",
                    *state
                )));
            }
            *state = RecordingState::Starting;
        }

        tracing::info!(
            "Starting recording {} to {:?} at {} ({}x{} @ {}fps, {} bps, audio={})",
            session.id,
            session.output_path,
            session.quality,
            session.profile.width,
            session.profile.height,
            session.profile.frame_rate,
            session.profile.bitrate,
            audio.is_some()
        );

        // Held across the launch so a fatal-error stop waits for it
        let mut slot = self.active.lock();
        match self.launch(session, audio) {
            Ok(active) => {
                *slot = Some(active);
                let mut state = self.state.write();
                if *state == RecordingState::Starting {
                    *state = RecordingState::Recording;
                }
                tracing::info!("Recording started");
                Ok(())
            }
            Err(e) => {
                *self.state.write() = RecordingState::Idle;
                tracing::error!("Failed to start recording: {}", e);
                Err(e)
            }
        }
    }

    fn launch(&self, session: RecordingSession, audio: Option<AudioOptions>) -> AppResult<ActiveRecording> {
        let settings = VideoSettings::from(session.profile);
        let mut video = self
            .media
            .create_video_encoder(&settings)
            .map_err(|e| AppError::Encoding(format!("Failed to create video encoder: {e}")))?;

        let container = match self.media.create_container(&session.output_path) {
            Ok(container) => container,
            Err(e) => {
                release_logged("video input", video.input.release());
                release_logged("video output", video.output.release());
                return Err(AppError::Encoding(format!("Failed to create container: {e}")));
            }
        };

        let audio_parts = audio.and_then(|options| self.open_audio(options));
        let has_audio = audio_parts.is_some();
        let gate = Arc::new(MuxerGate::new(container, if has_audio { 2 } else { 1 }));
        let shared = Arc::new(Shared::new());

        let mut active = ActiveRecording {
            session,
            shared: shared.clone(),
            gate: gate.clone(),
            timer: RecordingTimer::start(),
            has_audio,
            compose: None,
            video_drain: None,
            audio_capture: None,
            audio_drain: None,
        };

        if let Err(e) = self.spawn_workers(&mut active, video, audio_parts) {
            tracing::error!("Failed to spawn recording workers: {}", e);
            if let Err(cleanup) = self.teardown(active) {
                tracing::warn!("Cleanup after failed start reported: {}", cleanup);
            }
            return Err(AppError::Initialization(format!("Failed to spawn recording workers: {e}")));
        }
        Ok(active)
    }

    /// Open the microphone and the audio encoder. Any failure is logged and
    /// the recording continues without audio.
    fn open_audio(&self, options: AudioOptions) -> Option<(Box<dyn AudioSource>, AudioEncoder)> {
        let mut source = match self.microphone.open(options.sample_rate) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!("Microphone unavailable, recording video only: {}", e);
                return None;
            }
        };

        let settings = AudioSettings {
            sample_rate: source.sample_rate(),
            channels: 1,
            bitrate: options.bitrate,
        };
        let mut encoder = match self.media.create_audio_encoder(&settings) {
            Ok(encoder) => encoder,
            Err(e) => {
                tracing::warn!("Audio encoder unavailable, recording video only: {}", e);
                source.stop();
                return None;
            }
        };

        if let Err(e) = source.start() {
            tracing::warn!("Microphone failed to start, recording video only: {}", e);
            release_logged("audio input", encoder.input.release());
            release_logged("audio output", encoder.output.release());
            source.stop();
            return None;
        }
        Some((source, encoder))
    }

    fn spawn_workers(
        &self,
        active: &mut ActiveRecording,
        video: super::types::VideoEncoder,
        audio: Option<(Box<dyn AudioSource>, AudioEncoder)>,
    ) -> std::io::Result<()> {
        let fatal = FatalReporter {
            state: self.state.clone(),
            handler: self.on_fatal.read().clone(),
            shared: active.shared.clone(),
        };

        let shared = active.shared.clone();
        let gate = active.gate.clone();
        let reporter = fatal.clone();
        let output = video.output;
        active.video_drain = Some(
            std::thread::Builder::new()
                .name("video-drain".into())
                .spawn(move || video_drain_loop(output, gate, shared, reporter))?,
        );

        let shared = active.shared.clone();
        let compositor = self.compositor.clone();
        let profile = active.session.profile;
        let input = video.input;
        active.compose = Some(
            std::thread::Builder::new()
                .name("composition".into())
                .spawn(move || composition_loop(input, compositor, profile, shared, fatal))?,
        );

        if let Some((source, encoder)) = audio {
            let shared = active.shared.clone();
            let gate = active.gate.clone();
            let output = encoder.output;
            let audio_start = self.timeouts.audio_start;
            active.audio_drain = Some(
                std::thread::Builder::new()
                    .name("audio-drain".into())
                    .spawn(move || audio_drain_loop(output, gate, shared, audio_start))?,
            );

            let shared = active.shared.clone();
            let gate = active.gate.clone();
            let input = encoder.input;
            active.audio_capture = Some(
                std::thread::Builder::new()
                    .name("audio-capture".into())
                    .spawn(move || audio_capture_loop(source, input, gate, shared))?,
            );
        }
        Ok(())
    }

    pub fn pause(&self) -> AppResult<()> {
        let mut slot = self.active.lock();
        let mut state = self.state.write();
        if *state != RecordingState::Recording {
            return Err(AppError::InvalidState("Not recording".to_string()));
        }
        if let Some(active) = slot.as_mut() {
            active.shared.paused.store(true, Ordering::SeqCst);
            active.timer.pause_at(Instant::now());
        }
        *state = RecordingState::Paused;
        tracing::info!("Recording paused");
        Ok(())
    }

    pub fn resume(&self) -> AppResult<()> {
        let mut slot = self.active.lock();
        let mut state = self.state.write();
        if *state != RecordingState::Paused {
            return Err(AppError::InvalidState("Recording is not paused".to_string()));
        }
        if let Some(active) = slot.as_mut() {
            active.timer.resume_at(Instant::now());
            active.shared.paused.store(false, Ordering::SeqCst);
        }
        *state = RecordingState::Recording;
        tracing::info!("Recording resumed");
        Ok(())
    }

    /// Stop the active recording. `Ok(None)` when nothing is recording.
    pub fn stop(&self) -> AppResult<Option<RecordingOutput>> {
        let Some(active) = self.active.lock().take() else {
            return Ok(None);
        };
        *self.state.write() = RecordingState::Stopping;
        tracing::info!("Stopping recording {}", active.session.id);

        let result = self.teardown(active);
        *self.state.write() = RecordingState::Idle;
        result.map(Some)
    }

    /// Stop every worker and release every resource, whatever fails along
    /// the way, then check the output file.
    fn teardown(&self, mut active: ActiveRecording) -> AppResult<RecordingOutput> {
        let shared = active.shared.clone();
        let duration = active.timer.elapsed();
        shared.running.store(false, Ordering::SeqCst);

        // The composition loop signals end-of-stream to the video encoder as it exits
        let video_input = active
            .compose
            .take()
            .and_then(|h| join_within(h, self.timeouts.join, "composition"));

        // The audio loop sends its own end-of-stream and stops the microphone
        if let Some(handle) = active.audio_capture.take() {
            join_within(handle, self.timeouts.join, "audio capture");
        }

        let (video_output, audio_output) = self.wait_for_drains(&mut active);

        let mut failures: Vec<String> = Vec::new();
        let mut release = |what: &str, result: super::types::EncodeResult<()>| {
            if let Err(e) = result {
                tracing::warn!("Failed to release {}: {}", what, e);
                failures.push(format!("{what}: {e}"));
            }
        };
        if let Some(mut input) = video_input {
            release("video input", input.release());
        }
        if let Some(mut output) = video_output {
            release("video output", output.release());
        }
        if let Some(mut output) = audio_output {
            release("audio output", output.release());
        }
        let stats = match active.gate.finish() {
            Ok(stats) => stats,
            Err(e) => {
                release("container", Err(e));
                MuxStats::default()
            }
        };

        let mut collected = shared.errors.lock().clone();
        collected.extend(failures);

        let path = &active.session.output_path;
        let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if file_size == 0 {
            let detail = if collected.is_empty() {
                String::new()
            } else {
                format!(" ({})", collected.join("; "))
            };
            return Err(AppError::Encoding(format!(
                "Recording file {:?} is missing or empty{}",
                path, detail
            )));
        }
        if !collected.is_empty() {
            tracing::warn!("Recording finished with errors: {}", collected.join("; "));
        }

        let frames_composed = shared.frames_composed.load(Ordering::Relaxed);
        let throttled = self.compositor.stats().frames_throttled;
        tracing::info!(
            "Recording stopped: {:?}, {} bytes, {:.1}s, {} frames composed, {} packets written, {} dropped, {} camera frames throttled",
            path,
            file_size,
            duration.as_secs_f64(),
            frames_composed,
            stats.packets_written,
            stats.packets_dropped,
            throttled
        );

        let profile = active.session.profile;
        Ok(RecordingOutput {
            session_id: active.session.id.clone(),
            output_path: path.to_string_lossy().to_string(),
            quality: active.session.quality,
            width: profile.width,
            height: profile.height,
            frame_rate: profile.frame_rate,
            has_audio: active.has_audio && stats.tracks > 1,
            duration_ms: duration.as_secs_f64() * 1000.0,
            file_size,
            frames_composed,
            packets_written: stats.packets_written,
            packets_dropped: stats.packets_dropped,
        })
    }

    /// Give the drain loops the drain timeout to reach end-of-stream, then
    /// tell them to quit and collect their outputs.
    fn wait_for_drains(
        &self,
        active: &mut ActiveRecording,
    ) -> (Option<Box<dyn EncodedOutput>>, Option<Box<dyn EncodedOutput>>) {
        let deadline = Instant::now() + self.timeouts.drain;
        loop {
            let video_done = active.video_drain.as_ref().map_or(true, |h| h.is_finished());
            let audio_done = active.audio_drain.as_ref().map_or(true, |h| h.is_finished());
            if video_done && audio_done {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!("Encoders did not drain in {:?}; forcing stop", self.timeouts.drain);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        active.shared.draining.store(false, Ordering::SeqCst);

        let video = active
            .video_drain
            .take()
            .and_then(|h| join_within(h, self.timeouts.join, "video drain"));
        let audio = active
            .audio_drain
            .take()
            .and_then(|h| join_within(h, self.timeouts.join, "audio drain"));
        (video, audio)
    }
}

impl Drop for RecordingPipeline {
    fn drop(&mut self) {
        if self.active.get_mut().is_some() {
            if let Err(e) = self.stop() {
                tracing::error!("Failed to stop recording on drop: {}", e);
            }
        }
    }
}

/// Moves the pipeline to `Failed` and notifies the owner, once
#[derive(Clone)]
struct FatalReporter {
    state: Arc<RwLock<RecordingState>>,
    handler: Option<FatalHandler>,
    shared: Arc<Shared>,
}

impl FatalReporter {
    fn report(&self, message: String) {
        if self.shared.video_failed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::error!("Recording failed: {}", message);
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.record_error(message.clone());
        {
            let mut state = self.state.write();
            if matches!(
                *state,
                RecordingState::Starting | RecordingState::Recording | RecordingState::Paused
            ) {
                *state = RecordingState::Failed;
            }
        }
        if let Some(handler) = &self.handler {
            handler(message);
        }
    }
}

fn release_logged(what: &str, result: super::types::EncodeResult<()>) {
    if let Err(e) = result {
        tracing::warn!("Failed to release {}: {}", what, e);
    }
}

fn composition_loop(
    mut input: Box<dyn VideoInput>,
    compositor: Arc<CompositionEngine>,
    profile: crate::encode::QualityProfile,
    shared: Arc<Shared>,
    fatal: FatalReporter,
) -> Box<dyn VideoInput> {
    let interval = profile.frame_interval();
    let fps = profile.frame_rate.max(1) as u64;
    let mut canvas = Bitmap::new(profile.width, profile.height);
    let mut frame_index: u64 = 0;
    let mut next_tick = Instant::now();

    tracing::debug!("Composition loop running at {}fps", fps);
    while shared.running.load(Ordering::SeqCst) {
        if !shared.paused.load(Ordering::SeqCst) {
            compositor.render_composite(&mut canvas);
            // Timestamps follow the frame count, so pauses leave no gap
            let pts = Duration::from_micros(frame_index * 1_000_000 / fps);
            if let Err(e) = input.submit(&canvas, pts) {
                fatal.report(format!("Video encoder rejected frame {frame_index}: {e}"));
                break;
            }
            frame_index += 1;
            shared.frames_composed.fetch_add(1, Ordering::Relaxed);
        }

        next_tick += interval;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            // Running late; do not try to catch up with a burst
            next_tick = now;
        }
    }

    if let Err(e) = input.signal_end_of_stream() {
        tracing::warn!("Failed to signal video end-of-stream: {}", e);
        shared.record_error(format!("video end-of-stream: {e}"));
    }
    tracing::debug!("Composition loop exited after {} frames", frame_index);
    input
}

fn video_drain_loop(
    mut output: Box<dyn EncodedOutput>,
    gate: Arc<MuxerGate>,
    shared: Arc<Shared>,
    fatal: FatalReporter,
) -> Box<dyn EncodedOutput> {
    while shared.draining.load(Ordering::SeqCst) {
        let result = match output.dequeue(DEQUEUE_TIMEOUT) {
            Ok(Some(EncoderEvent::FormatChanged(format))) => gate.register_track(&format).map(|_| ()),
            Ok(Some(EncoderEvent::Packet(packet))) => gate.write_sample(TrackKind::Video, packet),
            Ok(Some(EncoderEvent::EndOfStream)) => {
                tracing::debug!("Video encoder reached end-of-stream");
                break;
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            fatal.report(format!("Video encoding failed: {e}"));
            break;
        }
    }
    output
}

fn audio_drain_loop(
    mut output: Box<dyn EncodedOutput>,
    gate: Arc<MuxerGate>,
    shared: Arc<Shared>,
    audio_start: Duration,
) -> Box<dyn EncodedOutput> {
    let started = Instant::now();
    let mut registered = false;

    while shared.draining.load(Ordering::SeqCst) {
        // Video packets pile up in the gate until audio registers
        if !registered {
            registered = gate.has_track(TrackKind::Audio);
            if !registered && started.elapsed() >= audio_start {
                degrade_audio(
                    &gate,
                    &shared,
                    format!("Audio encoder produced no output within {audio_start:?}"),
                );
                break;
            }
        }
        let result = match output.dequeue(DEQUEUE_TIMEOUT) {
            Ok(Some(EncoderEvent::FormatChanged(format))) => gate.register_track(&format).map(|_| ()),
            Ok(Some(EncoderEvent::Packet(packet))) => gate.write_sample(TrackKind::Audio, packet),
            Ok(Some(EncoderEvent::EndOfStream)) => {
                tracing::debug!("Audio encoder reached end-of-stream");
                break;
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            degrade_audio(&gate, &shared, format!("Audio encoding failed: {e}"));
            break;
        }
    }
    output
}

fn audio_capture_loop(
    mut source: Box<dyn AudioSource>,
    mut input: Box<dyn AudioInput>,
    gate: Arc<MuxerGate>,
    shared: Arc<Shared>,
) {
    let sample_rate = source.sample_rate().max(1) as u64;
    let mut buf = vec![0i16; AUDIO_CHUNK];
    let mut samples_fed: u64 = 0;

    while shared.running.load(Ordering::SeqCst) && !shared.audio_failed.load(Ordering::SeqCst) {
        match source.read(&mut buf, AUDIO_READ_TIMEOUT) {
            Ok(0) => continue,
            Ok(n) => {
                if shared.paused.load(Ordering::SeqCst) {
                    continue;
                }
                let pts = Duration::from_micros(samples_fed * 1_000_000 / sample_rate);
                if let Err(e) = input.submit(&buf[..n], pts) {
                    degrade_audio(&gate, &shared, format!("Audio encoder rejected samples: {e}"));
                    break;
                }
                samples_fed += n as u64;
            }
            Err(e) => {
                degrade_audio(&gate, &shared, format!("Microphone read failed: {e}"));
                break;
            }
        }
    }

    if let Err(e) = input.signal_end_of_stream() {
        tracing::warn!("Failed to signal audio end-of-stream: {}", e);
    }
    source.stop();
    if let Err(e) = input.release() {
        shared.record_error(format!("audio input: {e}"));
    }
    tracing::debug!("Audio capture exited after {} samples", samples_fed);
}

/// Continue video-only after an audio failure
fn degrade_audio(gate: &MuxerGate, shared: &Shared, message: String) {
    if shared.audio_failed.swap(true, Ordering::SeqCst) {
        return;
    }
    tracing::warn!("{}; continuing video-only", message);
    shared.record_error(message);
    if let Err(e) = gate.abandon_track(TrackKind::Audio) {
        tracing::warn!("Failed to drop audio track: {}", e);
    }
}
