//! Microphone capture using cpal
//!
//! The cpal stream is not `Send`, so it is built and kept alive on its own
//! thread; samples are downmixed to mono i16 and handed over a bounded
//! channel.

use super::traits::{AudioSource, CaptureError, CaptureResult, MicrophoneProvider};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Chunks buffered between the audio callback and the reader
const CHANNEL_DEPTH: usize = 64;

fn find_input_device(name: Option<&str>) -> CaptureResult<Device> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| CaptureError::Configuration(format!("Failed to enumerate input devices: {e}")))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceNotFound(wanted.to_string())),
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceNotFound("No default input device".to_string())),
    }
}

/// Live microphone backed by the default cpal host
pub struct CpalMicrophone {
    device_name: Option<String>,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    rx: Option<Receiver<Vec<i16>>>,
    pending: VecDeque<i16>,
}

impl CpalMicrophone {
    /// Query the input device; capture begins on `start`.
    pub fn open(device_name: Option<String>) -> CaptureResult<Self> {
        let device = find_input_device(device_name.as_deref())?;
        let config = device
            .default_input_config()
            .map_err(|e| CaptureError::Configuration(format!("Failed to get input config: {e}")))?;

        tracing::info!(
            "Microphone {}: {}Hz, {}ch, {:?}",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            config.sample_rate().0,
            config.channels(),
            config.sample_format()
        );

        Ok(Self {
            device_name,
            sample_rate: config.sample_rate().0,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            rx: None,
            pending: VecDeque::new(),
        })
    }

    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        tx: SyncSender<Vec<i16>>,
        running: Arc<AtomicBool>,
    ) -> Result<Stream, cpal::BuildStreamError>
    where
        T: cpal::Sample + cpal::SizedSample + Send + 'static,
        f32: cpal::FromSample<T>,
    {
        let channels = config.channels.max(1) as usize;
        device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                let mono: Vec<i16> = data
                    .chunks(channels)
                    .map(|frame| {
                        let sum: f32 = frame
                            .iter()
                            .map(|s| {
                                let f: f32 = cpal::Sample::from_sample(*s);
                                f
                            })
                            .sum();
                        let avg = (sum / frame.len() as f32).clamp(-1.0, 1.0);
                        (avg * i16::MAX as f32) as i16
                    })
                    .collect();
                // A full channel means the reader stalled; drop rather than block the callback
                let _ = tx.try_send(mono);
            },
            |err| tracing::error!("Microphone stream error: {}", err),
            None,
        )
    }
}

impl AudioSource for CpalMicrophone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self) -> CaptureResult<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = mpsc::channel::<CaptureResult<()>>();
        let running = self.running.clone();
        let device_name = self.device_name.clone();
        running.store(true, Ordering::SeqCst);

        let handle = std::thread::Builder::new()
            .name("microphone".into())
            .spawn(move || {
                let stream = find_input_device(device_name.as_deref()).and_then(|device| {
                    let supported = device.default_input_config().map_err(|e| {
                        CaptureError::Configuration(format!("Failed to get input config: {e}"))
                    })?;
                    let format = supported.sample_format();
                    let config: StreamConfig = supported.into();
                    let built = match format {
                        SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, tx, running.clone()),
                        SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, tx, running.clone()),
                        SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, tx, running.clone()),
                        other => {
                            return Err(CaptureError::Configuration(format!(
                                "Unsupported sample format: {other:?}"
                            )))
                        }
                    };
                    let stream = built
                        .map_err(|e| CaptureError::Stream(format!("Failed to build input stream: {e}")))?;
                    stream
                        .play()
                        .map_err(|e| CaptureError::Stream(format!("Failed to start input stream: {e}")))?;
                    Ok(stream)
                });

                let stream = match stream {
                    Ok(s) => {
                        let _ = ready_tx.send(Ok(()));
                        s
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Keep the stream alive while capturing
                while running.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(20));
                }
                drop(stream);
                tracing::info!("Microphone stream stopped");
            })
            .map_err(|e| CaptureError::Stream(format!("Failed to spawn microphone thread: {e}")))?;

        match ready_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Ok(())) => {
                self.thread = Some(handle);
                self.rx = Some(rx);
                tracing::info!("Microphone capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                Err(CaptureError::Timeout("Microphone did not start".to_string()))
            }
        }
    }

    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> CaptureResult<usize> {
        if self.pending.is_empty() {
            let rx = self
                .rx
                .as_ref()
                .ok_or_else(|| CaptureError::Stream("Microphone not started".to_string()))?;
            match rx.recv_timeout(timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::Stream("Microphone stream ended".to_string()))
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        for (slot, sample) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = sample;
        }
        Ok(n)
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.rx = None;
        self.pending.clear();
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens the default (or a named) cpal input device
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophoneProvider {
    pub device_name: Option<String>,
}

impl MicrophoneProvider for CpalMicrophoneProvider {
    fn open(&self, sample_rate: u32) -> CaptureResult<Box<dyn AudioSource>> {
        let mic = CpalMicrophone::open(self.device_name.clone())?;
        if mic.sample_rate() != sample_rate {
            tracing::info!(
                "Microphone runs at {}Hz instead of the requested {}Hz",
                mic.sample_rate(),
                sample_rate
            );
        }
        Ok(Box::new(mic))
    }
}
