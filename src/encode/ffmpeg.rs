//! FFmpeg-backed encoders and container writer
//!
//! Each encoder is an FFmpeg child process: composed RGBA frames (or s16le
//! PCM) go in on stdin, an elementary stream (H.264 Annex-B or AAC/ADTS)
//! comes out on stdout and is read by a dedicated thread. The container
//! stages each track's elementary stream next to the output file and remuxes
//! them into an MP4 on finish.

use super::types::{
    AudioEncoder, AudioInput, AudioSettings, ContainerWriter, EncodeError, EncodeResult,
    EncodedOutput, EncodedPacket, EncoderEvent, MediaBackend, TrackFormat, VideoEncoder,
    VideoInput, VideoSettings,
};
use crate::compose::Bitmap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Bytes read from an encoder's stdout per packet
const READ_CHUNK: usize = 64 * 1024;

/// How long a released encoder gets to exit before it is killed
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Keep only the tail of FFmpeg's stderr for error messages
const STDERR_TAIL: usize = 4096;

/// Check whether an `ffmpeg` binary is callable
pub fn is_available(program: &str) -> bool {
    Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

enum ReaderMsg {
    Data(Vec<u8>),
    Eof,
    Failed(String),
}

fn spawn_reader(mut stdout: impl Read + Send + 'static, label: &'static str) -> EncodeResult<(Receiver<ReaderMsg>, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel();
    let handle = std::thread::Builder::new()
        .name(format!("ffmpeg-{label}-out"))
        .spawn(move || {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => {
                        let _ = tx.send(ReaderMsg::Eof);
                        break;
                    }
                    Ok(n) => {
                        if tx.send(ReaderMsg::Data(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let _ = tx.send(ReaderMsg::Failed(e.to_string()));
                        break;
                    }
                }
            }
        })?;
    Ok((rx, handle))
}

fn spawn_stderr_tail(mut stderr: impl Read + Send + 'static) -> EncodeResult<JoinHandle<String>> {
    Ok(std::thread::Builder::new()
        .name("ffmpeg-stderr".into())
        .spawn(move || {
            let mut collected = Vec::new();
            let _ = stderr.read_to_end(&mut collected);
            let start = collected.len().saturating_sub(STDERR_TAIL);
            String::from_utf8_lossy(&collected[start..]).trim().to_string()
        })?)
}

/// Spawn an encoder process and split it into stdin and an output half
fn spawn_encoder(
    program: &str,
    args: &[String],
    format: TrackFormat,
    label: &'static str,
    pts: Arc<AtomicU64>,
) -> EncodeResult<(ChildStdin, FfmpegOutput)> {
    tracing::info!("Starting FFmpeg {} encoder: {:?}", label, args);

    let mut process = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| EncodeError::Configuration(format!("Failed to start FFmpeg {label} encoder: {e}")))?;

    let stdin = process
        .stdin
        .take()
        .ok_or_else(|| EncodeError::Ffmpeg("Failed to capture FFmpeg stdin".to_string()))?;
    let stdout = process
        .stdout
        .take()
        .ok_or_else(|| EncodeError::Ffmpeg("Failed to capture FFmpeg stdout".to_string()))?;
    let stderr = process
        .stderr
        .take()
        .ok_or_else(|| EncodeError::Ffmpeg("Failed to capture FFmpeg stderr".to_string()))?;

    let (rx, reader) = spawn_reader(stdout, label)?;
    let stderr = spawn_stderr_tail(stderr)?;

    Ok((
        stdin,
        FfmpegOutput {
            label,
            process: Some(process),
            rx,
            reader: Some(reader),
            stderr: Some(stderr),
            pending_format: Some(format),
            pts,
            sent_first: false,
            finished: false,
        },
    ))
}

/// Output half shared by both encoder kinds
pub struct FfmpegOutput {
    label: &'static str,
    process: Option<Child>,
    rx: Receiver<ReaderMsg>,
    reader: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<String>>,
    /// Reported on the first dequeue
    pending_format: Option<TrackFormat>,
    /// Latest submitted presentation time, in microseconds
    pts: Arc<AtomicU64>,
    sent_first: bool,
    finished: bool,
}

impl EncodedOutput for FfmpegOutput {
    fn dequeue(&mut self, timeout: Duration) -> EncodeResult<Option<EncoderEvent>> {
        if let Some(format) = self.pending_format.take() {
            return Ok(Some(EncoderEvent::FormatChanged(format)));
        }
        if self.finished {
            return Ok(None);
        }

        match self.rx.recv_timeout(timeout) {
            Ok(ReaderMsg::Data(data)) => {
                let keyframe = !self.sent_first;
                self.sent_first = true;
                Ok(Some(EncoderEvent::Packet(EncodedPacket {
                    data,
                    pts: Duration::from_micros(self.pts.load(Ordering::Relaxed)),
                    keyframe,
                })))
            }
            Ok(ReaderMsg::Eof) | Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                Ok(Some(EncoderEvent::EndOfStream))
            }
            Ok(ReaderMsg::Failed(e)) => {
                self.finished = true;
                Err(EncodeError::Encoder(format!("FFmpeg {} output failed: {}", self.label, e)))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
        }
    }

    fn release(&mut self) -> EncodeResult<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };

        let deadline = Instant::now() + EXIT_GRACE;
        let status = loop {
            match process.try_wait()? {
                Some(status) => break Some(status),
                None if Instant::now() >= deadline => break None,
                None => std::thread::sleep(Duration::from_millis(10)),
            }
        };

        let status = match status {
            Some(status) => status,
            None => {
                tracing::warn!("FFmpeg {} encoder did not exit; killing it", self.label);
                let _ = process.kill();
                process.wait()?
            }
        };

        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        let stderr = self
            .stderr
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(EncodeError::Ffmpeg(format!(
                "FFmpeg {} encoder exited with {}: {}",
                self.label, status, stderr
            )));
        }
        tracing::debug!("FFmpeg {} encoder exited cleanly", self.label);
        Ok(())
    }
}

impl Drop for FfmpegOutput {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

/// Raw RGBA frame input
pub struct FfmpegVideoInput {
    stdin: Option<ChildStdin>,
    width: u32,
    height: u32,
    pts: Arc<AtomicU64>,
    frames: u64,
}

impl VideoInput for FfmpegVideoInput {
    fn submit(&mut self, frame: &Bitmap, pts: Duration) -> EncodeResult<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(EncodeError::Encoder(format!(
                "Frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EncodeError::Encoder("Video input already closed".to_string()))?;
        stdin
            .write_all(frame.pixels())
            .map_err(|e| EncodeError::Encoder(format!("Failed to write frame: {e}")))?;
        self.pts.store(pts.as_micros() as u64, Ordering::Relaxed);
        self.frames += 1;
        Ok(())
    }

    fn signal_end_of_stream(&mut self) -> EncodeResult<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush()?;
            tracing::debug!("Video input closed after {} frames", self.frames);
        }
        Ok(())
    }

    fn release(&mut self) -> EncodeResult<()> {
        self.stdin = None;
        Ok(())
    }
}

/// s16le PCM input
pub struct FfmpegAudioInput {
    stdin: Option<ChildStdin>,
    pts: Arc<AtomicU64>,
}

impl AudioInput for FfmpegAudioInput {
    fn submit(&mut self, samples: &[i16], pts: Duration) -> EncodeResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EncodeError::Encoder("Audio input already closed".to_string()))?;
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        stdin
            .write_all(&bytes)
            .map_err(|e| EncodeError::Encoder(format!("Failed to write audio: {e}")))?;
        self.pts.store(pts.as_micros() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn signal_end_of_stream(&mut self) -> EncodeResult<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush()?;
        }
        Ok(())
    }

    fn release(&mut self) -> EncodeResult<()> {
        self.stdin = None;
        Ok(())
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

pub fn video_encoder_args(settings: &VideoSettings) -> Vec<String> {
    let mut args = strings(&["-hide_banner", "-loglevel", "error", "-nostats"]);
    args.extend(strings(&["-f", "rawvideo", "-pix_fmt", "rgba"]));
    args.extend([
        "-s".to_string(),
        format!("{}x{}", settings.width, settings.height),
        "-r".to_string(),
        settings.frame_rate.to_string(),
    ]);
    args.extend(strings(&["-i", "-"]));
    args.extend(strings(&["-c:v", "libx264", "-preset", "veryfast", "-tune", "zerolatency"]));
    args.extend([
        "-b:v".to_string(),
        settings.bitrate.to_string(),
        "-maxrate".to_string(),
        settings.bitrate.to_string(),
        "-bufsize".to_string(),
        (settings.bitrate * 2).to_string(),
        "-g".to_string(),
        settings.keyframe_interval.to_string(),
        "-keyint_min".to_string(),
        settings.keyframe_interval.to_string(),
    ]);
    args.extend(strings(&["-pix_fmt", "yuv420p", "-f", "h264", "-"]));
    args
}

pub fn audio_encoder_args(settings: &AudioSettings) -> Vec<String> {
    let mut args = strings(&["-hide_banner", "-loglevel", "error", "-nostats"]);
    args.extend(strings(&["-f", "s16le"]));
    args.extend([
        "-ar".to_string(),
        settings.sample_rate.to_string(),
        "-ac".to_string(),
        settings.channels.to_string(),
    ]);
    args.extend(strings(&["-i", "-", "-c:a", "aac"]));
    args.extend(["-b:a".to_string(), settings.bitrate.to_string()]);
    args.extend(strings(&["-f", "adts", "-"]));
    args
}

/// A track staged as an elementary stream file
struct StagedTrack {
    format: TrackFormat,
    path: PathBuf,
    file: Option<BufWriter<File>>,
    bytes: u64,
}

/// MP4 writer that remuxes staged elementary streams on finish
pub struct FfmpegContainer {
    program: String,
    output: PathBuf,
    staging: tempfile::TempDir,
    tracks: Vec<StagedTrack>,
    started: bool,
}

impl FfmpegContainer {
    pub fn create(program: &str, output: &Path) -> EncodeResult<Self> {
        let parent = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new()
            .prefix(".dualcam-staging-")
            .tempdir_in(parent)?;

        Ok(Self {
            program: program.to_string(),
            output: output.to_path_buf(),
            staging,
            tracks: Vec::new(),
            started: false,
        })
    }

    /// Arguments for the final `-c copy` remux
    fn remux_args(&self) -> Vec<String> {
        let mut args = strings(&["-hide_banner", "-loglevel", "error", "-y"]);
        let mut inputs = 0usize;
        for track in self.tracks.iter().filter(|t| t.bytes > 0) {
            match &track.format {
                TrackFormat::Video { frame_rate, .. } => {
                    args.extend(strings(&["-fflags", "+genpts", "-f", "h264"]));
                    args.extend(["-framerate".to_string(), frame_rate.to_string()]);
                }
                TrackFormat::Audio { .. } => args.extend(strings(&["-f", "aac"])),
            }
            args.extend(["-i".to_string(), track.path.to_string_lossy().to_string()]);
            inputs += 1;
        }
        for i in 0..inputs {
            args.extend(["-map".to_string(), i.to_string()]);
        }
        args.extend(strings(&["-c", "copy", "-movflags", "+faststart"]));
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

impl ContainerWriter for FfmpegContainer {
    fn add_track(&mut self, format: &TrackFormat) -> EncodeResult<usize> {
        if self.started {
            return Err(EncodeError::Container("Container already started".to_string()));
        }
        let index = self.tracks.len();
        let name = match format {
            TrackFormat::Video { .. } => format!("track{index}.h264"),
            TrackFormat::Audio { .. } => format!("track{index}.aac"),
        };
        let path = self.staging.path().join(name);
        let file = BufWriter::new(File::create(&path)?);
        self.tracks.push(StagedTrack {
            format: format.clone(),
            path,
            file: Some(file),
            bytes: 0,
        });
        Ok(index)
    }

    fn start(&mut self) -> EncodeResult<()> {
        if self.tracks.is_empty() {
            return Err(EncodeError::Container("Cannot start without tracks".to_string()));
        }
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, packet: &EncodedPacket) -> EncodeResult<()> {
        if !self.started {
            return Err(EncodeError::Container("Container not started".to_string()));
        }
        let staged = self
            .tracks
            .get_mut(track)
            .ok_or_else(|| EncodeError::Container(format!("No track #{track}")))?;
        let file = staged
            .file
            .as_mut()
            .ok_or_else(|| EncodeError::Container(format!("Track #{track} already closed")))?;
        file.write_all(&packet.data)?;
        staged.bytes += packet.data.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> EncodeResult<()> {
        for track in &mut self.tracks {
            if let Some(mut file) = track.file.take() {
                file.flush()?;
            }
        }
        if !self.tracks.iter().any(|t| t.bytes > 0) {
            return Err(EncodeError::Container("No samples were written".to_string()));
        }

        let args = self.remux_args();
        tracing::info!("Remuxing into {:?}: {:?}", self.output, args);
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| EncodeError::Ffmpeg(format!("Failed to run FFmpeg remux: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EncodeError::Ffmpeg(format!("FFmpeg remux failed: {stderr}")));
        }
        Ok(())
    }
}

/// Media backend that drives an `ffmpeg` executable
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    program: String,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn create_video_encoder(&self, settings: &VideoSettings) -> EncodeResult<VideoEncoder> {
        let format = TrackFormat::Video {
            codec: "h264".to_string(),
            width: settings.width,
            height: settings.height,
            frame_rate: settings.frame_rate,
        };
        let pts = Arc::new(AtomicU64::new(0));
        let (stdin, output) = spawn_encoder(
            &self.program,
            &video_encoder_args(settings),
            format,
            "video",
            pts.clone(),
        )?;

        Ok(VideoEncoder {
            input: Box::new(FfmpegVideoInput {
                stdin: Some(stdin),
                width: settings.width,
                height: settings.height,
                pts,
                frames: 0,
            }),
            output: Box::new(output),
        })
    }

    fn create_audio_encoder(&self, settings: &AudioSettings) -> EncodeResult<AudioEncoder> {
        let format = TrackFormat::Audio {
            codec: "aac".to_string(),
            sample_rate: settings.sample_rate,
            channels: settings.channels,
        };
        let pts = Arc::new(AtomicU64::new(0));
        let (stdin, output) = spawn_encoder(
            &self.program,
            &audio_encoder_args(settings),
            format,
            "audio",
            pts.clone(),
        )?;

        Ok(AudioEncoder {
            input: Box::new(FfmpegAudioInput {
                stdin: Some(stdin),
                pts,
            }),
            output: Box::new(output),
        })
    }

    fn create_container(&self, output: &Path) -> EncodeResult<Box<dyn ContainerWriter>> {
        Ok(Box::new(FfmpegContainer::create(&self.program, output)?))
    }
}
