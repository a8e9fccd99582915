//! Track-registration gate in front of a container writer
//!
//! The writer is started exactly once, when the number of registered
//! tracks reaches the expected count. Samples that arrive earlier are held
//! in a bounded buffer and flushed in order on start. Registration, the
//! start decision and sample writes all happen under one lock, so the two
//! drain threads can never race a start.

use super::types::{ContainerWriter, EncodeError, EncodeResult, EncodedPacket, TrackFormat, TrackKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Packets held while waiting for the writer to start
pub const DEFAULT_PENDING_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuxStats {
    pub packets_written: u64,
    pub packets_dropped: u64,
    pub tracks: usize,
}

struct GateInner {
    writer: Box<dyn ContainerWriter>,
    tracks: HashMap<TrackKind, usize>,
    expected: usize,
    started: bool,
    finished: bool,
    pending: VecDeque<(TrackKind, EncodedPacket)>,
    /// The pending buffer filled up at least once
    overflowed: bool,
    written: u64,
    dropped: u64,
}

impl GateInner {
    fn start_if_ready(&mut self) -> EncodeResult<bool> {
        if self.started || self.tracks.len() < self.expected || self.tracks.is_empty() {
            return Ok(false);
        }
        self.start_now()?;
        Ok(true)
    }

    fn start_now(&mut self) -> EncodeResult<()> {
        self.writer.start()?;
        self.started = true;
        tracing::info!(
            "Container started with {} track(s), flushing {} buffered packet(s)",
            self.tracks.len(),
            self.pending.len()
        );

        while let Some((kind, packet)) = self.pending.pop_front() {
            match self.tracks.get(&kind) {
                Some(&index) => {
                    self.writer.write_sample(index, &packet)?;
                    self.written += 1;
                }
                None => self.dropped += 1,
            }
        }
        Ok(())
    }

    fn stats(&self) -> MuxStats {
        MuxStats {
            packets_written: self.written,
            packets_dropped: self.dropped,
            tracks: self.tracks.len(),
        }
    }
}

pub struct MuxerGate {
    inner: Mutex<GateInner>,
    capacity: usize,
}

impl MuxerGate {
    pub fn new(writer: Box<dyn ContainerWriter>, expected_tracks: usize) -> Self {
        Self::with_capacity(writer, expected_tracks, DEFAULT_PENDING_CAPACITY)
    }

    pub fn with_capacity(writer: Box<dyn ContainerWriter>, expected_tracks: usize, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(GateInner {
                writer,
                tracks: HashMap::new(),
                expected: expected_tracks,
                started: false,
                finished: false,
                pending: VecDeque::new(),
                overflowed: false,
                written: 0,
                dropped: 0,
            }),
            capacity,
        }
    }

    /// Register a track. Returns true when this registration started the writer.
    pub fn register_track(&self, format: &TrackFormat) -> EncodeResult<bool> {
        let kind = format.kind();
        let mut inner = self.inner.lock();
        if inner.finished {
            return Err(EncodeError::Container("Container already finished".to_string()));
        }
        if inner.tracks.contains_key(&kind) {
            return Err(EncodeError::Container(format!("{kind} track registered twice")));
        }
        if inner.started {
            return Err(EncodeError::Container(format!(
                "{kind} track registered after the container started"
            )));
        }

        let index = inner.writer.add_track(format)?;
        inner.tracks.insert(kind, index);
        tracing::debug!(
            "Registered {} track #{} ({}/{})",
            kind,
            index,
            inner.tracks.len(),
            inner.expected
        );
        inner.start_if_ready()
    }

    /// Give up on a track that will never register, e.g. when the
    /// microphone fails. Returns true when this started the writer.
    pub fn abandon_track(&self, kind: TrackKind) -> EncodeResult<bool> {
        let mut inner = self.inner.lock();
        if inner.tracks.contains_key(&kind) || inner.started || inner.expected == 0 {
            return Ok(false);
        }
        inner.expected -= 1;
        let before = inner.pending.len();
        inner.pending.retain(|(k, _)| *k != kind);
        let discarded = (before - inner.pending.len()) as u64;
        inner.dropped += discarded;
        tracing::warn!("Abandoned {} track; expecting {} track(s)", kind, inner.expected);
        inner.start_if_ready()
    }

    /// Write a sample, or buffer it if the writer has not started yet.
    pub fn write_sample(&self, kind: TrackKind, packet: EncodedPacket) -> EncodeResult<()> {
        let mut inner = self.inner.lock();
        if inner.finished {
            inner.dropped += 1;
            return Ok(());
        }
        if !inner.started {
            if inner.pending.len() >= self.capacity {
                inner.dropped += 1;
                if !inner.overflowed {
                    inner.overflowed = true;
                    tracing::warn!(
                        "Mux buffer full ({} packets) with {}/{} track(s) registered; dropping {} packets until the container starts",
                        self.capacity,
                        inner.tracks.len(),
                        inner.expected,
                        kind
                    );
                }
            } else {
                inner.pending.push_back((kind, packet));
            }
            return Ok(());
        }

        match inner.tracks.get(&kind).copied() {
            Some(index) => {
                inner.writer.write_sample(index, &packet)?;
                inner.written += 1;
            }
            None => inner.dropped += 1,
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().started
    }

    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.inner.lock().tracks.contains_key(&kind)
    }

    pub fn expected_tracks(&self) -> usize {
        self.inner.lock().expected
    }

    pub fn stats(&self) -> MuxStats {
        self.inner.lock().stats()
    }

    /// Finalize the container. A gate still waiting on a track is started
    /// with what it has, as long as the video track registered. Idempotent.
    pub fn finish(&self) -> EncodeResult<MuxStats> {
        let mut inner = self.inner.lock();
        if inner.finished {
            return Ok(inner.stats());
        }
        inner.finished = true;

        if !inner.started {
            if !inner.tracks.contains_key(&TrackKind::Video) {
                return Err(EncodeError::Container(
                    "No video track was registered".to_string(),
                ));
            }
            tracing::warn!(
                "Finishing with {}/{} track(s) registered",
                inner.tracks.len(),
                inner.expected
            );
            inner.start_now()?;
        }

        inner.writer.finish()?;
        let stats = inner.stats();
        tracing::info!(
            "Container finished: {} packets written, {} dropped",
            stats.packets_written,
            stats.packets_dropped
        );
        Ok(stats)
    }
}
