//! Scripted camera, microphone and media backends for tests.
//!
//! Everything runs in-process: cameras produce solid-colour frames, encoders
//! turn each submitted frame or chunk into a tiny packet, and the container
//! writes a real file so size checks behave as in production.

use crate::capture::{
    AudioSource, CameraBackend, CameraDevice, CameraInfo, CaptureError, CaptureResult, Facing,
    MicrophoneProvider, PixelFormat, RawFrame, Resolution, StreamConfig,
};
use crate::compose::Bitmap;
use crate::encode::{
    AudioEncoder, AudioInput, AudioSettings, ContainerWriter, EncodeError, EncodeResult,
    EncodedOutput, EncodedPacket, EncoderEvent, MediaBackend, TrackFormat, TrackKind,
    VideoEncoder, VideoInput, VideoSettings,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const RED: [u8; 4] = [255, 0, 0, 255];
pub const BLUE: [u8; 4] = [0, 0, 255, 255];

pub fn video_format(width: u32, height: u32) -> TrackFormat {
    TrackFormat::Video {
        codec: "h264".to_string(),
        width,
        height,
        frame_rate: 30,
    }
}

pub fn audio_format() -> TrackFormat {
    TrackFormat::Audio {
        codec: "aac".to_string(),
        sample_rate: 44_100,
        channels: 1,
    }
}

pub fn solid_frame(color: [u8; 4], width: u32, height: u32) -> RawFrame {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..width * height {
        data.extend_from_slice(&color);
    }
    RawFrame {
        format: PixelFormat::Rgba,
        width,
        height,
        data,
        timestamp: Duration::ZERO,
    }
}

// ---------------------------------------------------------------------------
// Cameras

#[derive(Default)]
struct CameraScript {
    permission: bool,
    cameras: Vec<CameraInfo>,
    pairs: Vec<(String, String)>,
    fail_open: HashSet<String>,
    fail_still: HashSet<String>,
    fail_auto_controls: bool,
    /// Frame errors each device reports before streaming normally
    frame_errors: HashMap<String, u32>,
    open_delay: Duration,
    opened: Vec<String>,
    closed: Vec<String>,
}

/// Camera backend with scripted devices. Device "back" streams red frames
/// and everything else streams blue.
#[derive(Clone)]
pub struct FakeCameraBackend {
    script: Arc<Mutex<CameraScript>>,
}

fn camera(id: &str, facing: Facing) -> CameraInfo {
    CameraInfo {
        id: id.to_string(),
        name: format!("Fake {id} camera"),
        facing,
        supported_resolutions: vec![Resolution::new(640, 480)],
    }
}

impl FakeCameraBackend {
    fn with_cameras(cameras: Vec<CameraInfo>) -> Self {
        Self {
            script: Arc::new(Mutex::new(CameraScript {
                permission: true,
                cameras,
                ..Default::default()
            })),
        }
    }

    /// A back and a front camera, no certified pairing
    pub fn dual() -> Self {
        Self::with_cameras(vec![camera("back", Facing::Back), camera("front", Facing::Front)])
    }

    pub fn back_only() -> Self {
        Self::with_cameras(vec![camera("back", Facing::Back)])
    }

    pub fn none() -> Self {
        Self::with_cameras(Vec::new())
    }

    /// Two webcams without a facing characteristic
    pub fn externals() -> Self {
        Self::with_cameras(vec![camera("usb0", Facing::External), camera("usb1", Facing::External)])
    }

    pub fn without_permission(self) -> Self {
        self.script.lock().permission = false;
        self
    }

    pub fn with_concurrent_pair(self, a: &str, b: &str) -> Self {
        self.script.lock().pairs.push((a.to_string(), b.to_string()));
        self
    }

    pub fn failing_open(self, id: &str) -> Self {
        self.script.lock().fail_open.insert(id.to_string());
        self
    }

    pub fn failing_still(self, id: &str) -> Self {
        self.script.lock().fail_still.insert(id.to_string());
        self
    }

    /// `id` fails its first `count` frames
    pub fn failing_frames(self, id: &str, count: u32) -> Self {
        self.script.lock().frame_errors.insert(id.to_string(), count);
        self
    }

    /// Every open takes `delay` before it returns
    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.script.lock().open_delay = delay;
        self
    }

    pub fn failing_auto_controls(self) -> Self {
        self.script.lock().fail_auto_controls = true;
        self
    }

    pub fn opened(&self) -> Vec<String> {
        self.script.lock().opened.clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.script.lock().closed.clone()
    }
}

impl CameraBackend for FakeCameraBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn has_permission(&self) -> bool {
        self.script.lock().permission
    }

    fn enumerate(&self) -> CaptureResult<Vec<CameraInfo>> {
        Ok(self.script.lock().cameras.clone())
    }

    fn concurrent_pairs(&self) -> Vec<(String, String)> {
        self.script.lock().pairs.clone()
    }

    fn open(&self, device_id: &str, config: &StreamConfig) -> CaptureResult<Box<dyn CameraDevice>> {
        let delay = self.script.lock().open_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut script = self.script.lock();
        if script.fail_open.contains(device_id) {
            return Err(CaptureError::Stream(format!("{device_id} is busy")));
        }
        if !script.cameras.iter().any(|c| c.id == device_id) {
            return Err(CaptureError::DeviceNotFound(device_id.to_string()));
        }
        script.opened.push(device_id.to_string());

        let color = if device_id == "back" || device_id == "usb0" { RED } else { BLUE };
        Ok(Box::new(FakeCameraDevice {
            id: device_id.to_string(),
            color,
            resolution: config.resolution,
            fail_still: script.fail_still.contains(device_id),
            fail_auto_controls: script.fail_auto_controls,
            frame_errors: script.frame_errors.get(device_id).copied().unwrap_or(0),
            started: Instant::now(),
            script: self.script.clone(),
        }))
    }
}

struct FakeCameraDevice {
    id: String,
    color: [u8; 4],
    resolution: Resolution,
    fail_still: bool,
    fail_auto_controls: bool,
    frame_errors: u32,
    started: Instant,
    script: Arc<Mutex<CameraScript>>,
}

impl CameraDevice for FakeCameraDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn enable_auto_controls(&mut self) -> CaptureResult<()> {
        if self.fail_auto_controls {
            return Err(CaptureError::Unsupported("no autofocus".to_string()));
        }
        Ok(())
    }

    fn next_frame(&mut self, timeout: Duration) -> CaptureResult<Option<RawFrame>> {
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        if self.frame_errors > 0 {
            self.frame_errors -= 1;
            return Err(CaptureError::Stream(format!("{} frame lost", self.id)));
        }
        let mut frame = solid_frame(self.color, self.resolution.width, self.resolution.height);
        frame.timestamp = self.started.elapsed();
        Ok(Some(frame))
    }

    fn capture_still(&mut self) -> CaptureResult<RawFrame> {
        if self.fail_still {
            return Err(CaptureError::Stream(format!("{} still failed", self.id)));
        }
        Ok(solid_frame(self.color, 64, 48))
    }

    fn close(&mut self) {
        self.script.lock().closed.push(self.id.clone());
    }
}

// ---------------------------------------------------------------------------
// Microphone

#[derive(Clone, Copy)]
enum MicMode {
    Silent,
    Tone,
    Unavailable,
}

/// Microphone provider producing samples in real time
#[derive(Clone)]
pub struct FakeMicrophone {
    mode: MicMode,
    sample_rate: u32,
}

impl FakeMicrophone {
    pub fn silent() -> Self {
        Self {
            mode: MicMode::Silent,
            sample_rate: 44_100,
        }
    }

    pub fn tone(sample_rate: u32) -> Self {
        Self {
            mode: MicMode::Tone,
            sample_rate,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            mode: MicMode::Unavailable,
            sample_rate: 44_100,
        }
    }
}

impl MicrophoneProvider for FakeMicrophone {
    fn open(&self, _sample_rate: u32) -> CaptureResult<Box<dyn AudioSource>> {
        match self.mode {
            MicMode::Unavailable => Err(CaptureError::DeviceNotFound("no microphone".to_string())),
            mode => Ok(Box::new(FakeAudioSource {
                tone: matches!(mode, MicMode::Tone),
                sample_rate: self.sample_rate,
                started: false,
                phase: 0,
            })),
        }
    }
}

struct FakeAudioSource {
    tone: bool,
    sample_rate: u32,
    started: bool,
    phase: u64,
}

impl AudioSource for FakeAudioSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self) -> CaptureResult<()> {
        self.started = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> CaptureResult<usize> {
        if !self.started {
            return Err(CaptureError::Stream("not started".to_string()));
        }
        // 10 ms worth of samples per read
        let wait = timeout.min(Duration::from_millis(10));
        std::thread::sleep(wait);
        let n = buf.len().min((self.sample_rate / 100) as usize);
        for slot in buf.iter_mut().take(n) {
            *slot = if self.tone {
                ((self.phase as f32 * 0.0627).sin() * 8000.0) as i16
            } else {
                0
            };
            self.phase += 1;
        }
        Ok(n)
    }

    fn stop(&mut self) {
        self.started = false;
    }
}

// ---------------------------------------------------------------------------
// Container

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterCall {
    AddTrack(TrackKind),
    Start,
    Write { track: usize, bytes: usize },
    Finish,
}

/// Container writer that records its calls and, given a path, writes a
/// real file: a header on start, then every sample's bytes.
#[derive(Clone)]
pub struct RecordingWriter {
    calls: Arc<Mutex<Vec<WriterCall>>>,
    path: Option<PathBuf>,
    file: Arc<Mutex<Option<File>>>,
    tracks: usize,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            path: None,
            file: Arc::new(Mutex::new(None)),
            tracks: 0,
        }
    }

    pub fn with_file(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<WriterCall> {
        self.calls.lock().clone()
    }
}

impl ContainerWriter for RecordingWriter {
    fn add_track(&mut self, format: &TrackFormat) -> EncodeResult<usize> {
        self.calls.lock().push(WriterCall::AddTrack(format.kind()));
        self.tracks += 1;
        Ok(self.tracks - 1)
    }

    fn start(&mut self) -> EncodeResult<()> {
        self.calls.lock().push(WriterCall::Start);
        if let Some(path) = &self.path {
            let mut file = File::create(path)?;
            file.write_all(b"DUALCAM\0")?;
            file.write_all(&[self.tracks as u8])?;
            *self.file.lock() = Some(file);
        }
        Ok(())
    }

    fn write_sample(&mut self, track: usize, packet: &EncodedPacket) -> EncodeResult<()> {
        self.calls.lock().push(WriterCall::Write {
            track,
            bytes: packet.data.len(),
        });
        if let Some(file) = self.file.lock().as_mut() {
            file.write_all(&packet.data)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> EncodeResult<()> {
        self.calls.lock().push(WriterCall::Finish);
        if let Some(mut file) = self.file.lock().take() {
            file.flush()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Encoders

/// Failure injected into `FakeMedia`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFault {
    VideoEncoderCreate,
    AudioEncoderCreate,
    ContainerCreate,
    /// The video encoder rejects the first frame
    VideoSubmit,
    /// The audio encoder accepts samples but never produces output
    AudioNoOutput,
}

#[derive(Default)]
struct MediaLog {
    writers: Vec<RecordingWriter>,
    video_sizes: Vec<(u32, u32)>,
    video_frames: u64,
    /// Top-left pixel of every frame the video encoder received
    video_first_pixels: Vec<[u8; 4]>,
    released_video_halves: usize,
}

#[derive(Clone)]
pub struct FakeMedia {
    fault: Option<MediaFault>,
    create_delay: Duration,
    log: Arc<Mutex<MediaLog>>,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self {
            fault: None,
            create_delay: Duration::ZERO,
            log: Arc::new(Mutex::new(MediaLog::default())),
        }
    }

    /// Creating the video encoder takes `delay`
    pub fn with_create_delay(delay: Duration) -> Self {
        Self {
            create_delay: delay,
            ..Self::new()
        }
    }

    /// Whether some container has started writing
    pub fn container_started(&self) -> bool {
        self.log
            .lock()
            .writers
            .iter()
            .any(|w| w.calls().contains(&WriterCall::Start))
    }

    pub fn video_first_pixels(&self) -> Vec<[u8; 4]> {
        self.log.lock().video_first_pixels.clone()
    }

    pub fn with_fault(fault: MediaFault) -> Self {
        Self {
            fault: Some(fault),
            ..Self::new()
        }
    }

    /// Track kinds registered with every container so far, in order
    pub fn registered_tracks(&self) -> Vec<TrackKind> {
        self.log
            .lock()
            .writers
            .iter()
            .flat_map(|w| w.calls())
            .filter_map(|c| match c {
                WriterCall::AddTrack(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }

    /// Whether some container started with exactly `tracks` tracks added
    pub fn container_started_after(&self, tracks: usize) -> bool {
        self.log.lock().writers.iter().any(|w| {
            let calls = w.calls();
            calls.iter().position(|c| *c == WriterCall::Start).is_some_and(|start| {
                calls[..start]
                    .iter()
                    .filter(|c| matches!(c, WriterCall::AddTrack(_)))
                    .count()
                    == tracks
            })
        })
    }

    pub fn video_encoder_sizes(&self) -> Vec<(u32, u32)> {
        self.log.lock().video_sizes.clone()
    }

    pub fn video_frames_submitted(&self) -> u64 {
        self.log.lock().video_frames
    }

    pub fn released_video_halves(&self) -> usize {
        self.log.lock().released_video_halves
    }
}

impl MediaBackend for FakeMedia {
    fn name(&self) -> &str {
        "fake"
    }

    fn create_video_encoder(&self, settings: &VideoSettings) -> EncodeResult<VideoEncoder> {
        if !self.create_delay.is_zero() {
            std::thread::sleep(self.create_delay);
        }
        if self.fault == Some(MediaFault::VideoEncoderCreate) {
            return Err(EncodeError::Configuration("no video encoder".to_string()));
        }
        self.log.lock().video_sizes.push((settings.width, settings.height));

        let (tx, rx) = mpsc::channel();
        let _ = tx.send(EncoderEvent::FormatChanged(TrackFormat::Video {
            codec: "fake".to_string(),
            width: settings.width,
            height: settings.height,
            frame_rate: settings.frame_rate,
        }));
        Ok(VideoEncoder {
            input: Box::new(FakeVideoInput {
                tx: Some(tx),
                width: settings.width,
                height: settings.height,
                keyframe_interval: settings.keyframe_interval.max(1) as u64,
                frames: 0,
                fail_submit: self.fault == Some(MediaFault::VideoSubmit),
                log: self.log.clone(),
            }),
            output: Box::new(FakeOutput {
                rx,
                ended: false,
                video_log: Some(self.log.clone()),
            }),
        })
    }

    fn create_audio_encoder(&self, settings: &AudioSettings) -> EncodeResult<AudioEncoder> {
        if self.fault == Some(MediaFault::AudioEncoderCreate) {
            return Err(EncodeError::Configuration("no audio encoder".to_string()));
        }
        let mute = self.fault == Some(MediaFault::AudioNoOutput);
        let (tx, rx) = mpsc::channel();
        if !mute {
            let _ = tx.send(EncoderEvent::FormatChanged(TrackFormat::Audio {
                codec: "fake".to_string(),
                sample_rate: settings.sample_rate,
                channels: settings.channels,
            }));
        }
        Ok(AudioEncoder {
            input: Box::new(FakeAudioInput { tx: Some(tx), mute }),
            output: Box::new(FakeOutput {
                rx,
                ended: false,
                video_log: None,
            }),
        })
    }

    fn create_container(&self, output: &Path) -> EncodeResult<Box<dyn ContainerWriter>> {
        if self.fault == Some(MediaFault::ContainerCreate) {
            return Err(EncodeError::Container("disk full".to_string()));
        }
        let writer = RecordingWriter::with_file(output);
        self.log.lock().writers.push(writer.clone());
        Ok(Box::new(writer))
    }
}

struct FakeVideoInput {
    tx: Option<Sender<EncoderEvent>>,
    width: u32,
    height: u32,
    keyframe_interval: u64,
    frames: u64,
    fail_submit: bool,
    log: Arc<Mutex<MediaLog>>,
}

impl VideoInput for FakeVideoInput {
    fn submit(&mut self, frame: &Bitmap, pts: Duration) -> EncodeResult<()> {
        if self.fail_submit {
            return Err(EncodeError::Encoder("surface lost".to_string()));
        }
        if frame.width() != self.width || frame.height() != self.height {
            return Err(EncodeError::Encoder("frame size mismatch".to_string()));
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| EncodeError::Encoder("input closed".to_string()))?;
        let packet = EncodedPacket {
            // First pixel stands in for the encoded frame
            data: frame.pixels()[..4].to_vec(),
            pts,
            keyframe: self.frames % self.keyframe_interval == 0,
        };
        let _ = tx.send(EncoderEvent::Packet(packet));
        self.frames += 1;
        let mut log = self.log.lock();
        log.video_frames += 1;
        log.video_first_pixels.push(frame.pixel(0, 0));
        Ok(())
    }

    fn signal_end_of_stream(&mut self) -> EncodeResult<()> {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(EncoderEvent::EndOfStream);
        }
        Ok(())
    }

    fn release(&mut self) -> EncodeResult<()> {
        self.tx = None;
        self.log.lock().released_video_halves += 1;
        Ok(())
    }
}

struct FakeAudioInput {
    tx: Option<Sender<EncoderEvent>>,
    mute: bool,
}

impl AudioInput for FakeAudioInput {
    fn submit(&mut self, samples: &[i16], pts: Duration) -> EncodeResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| EncodeError::Encoder("input closed".to_string()))?;
        if self.mute {
            return Ok(());
        }
        let _ = tx.send(EncoderEvent::Packet(EncodedPacket {
            data: vec![(samples.len() & 0xff) as u8],
            pts,
            keyframe: true,
        }));
        Ok(())
    }

    fn signal_end_of_stream(&mut self) -> EncodeResult<()> {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(EncoderEvent::EndOfStream);
        }
        Ok(())
    }

    fn release(&mut self) -> EncodeResult<()> {
        self.tx = None;
        Ok(())
    }
}

struct FakeOutput {
    rx: Receiver<EncoderEvent>,
    ended: bool,
    /// Set for video outputs so releases are counted
    video_log: Option<Arc<Mutex<MediaLog>>>,
}

impl EncodedOutput for FakeOutput {
    fn dequeue(&mut self, timeout: Duration) -> EncodeResult<Option<EncoderEvent>> {
        if self.ended {
            return Ok(None);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(EncoderEvent::EndOfStream) | Err(RecvTimeoutError::Disconnected) => {
                self.ended = true;
                Ok(Some(EncoderEvent::EndOfStream))
            }
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
        }
    }

    fn release(&mut self) -> EncodeResult<()> {
        if let Some(log) = &self.video_log {
            log.lock().released_video_halves += 1;
        }
        Ok(())
    }
}
