//! Camera session manager
//!
//! Discovers the back/front pair, opens each device on its own worker
//! thread and fans the open results back in. Open workers take the shared
//! hardware lock with a bounded wait; the back device always attempts its
//! open before the front one.
//!
//! An open device streams into the composition engine and its preview
//! surface, throttled per device, and serves still-capture requests
//! queued by the photo path.

use super::preview::{PreviewHandle, PreviewInfo, PreviewSurface};
use crate::capture::{
    CameraBackend, CameraDevice, CameraInfo, CaptureError, CaptureResult, DeviceRole, Facing,
    RawFrame, Resolution, StreamConfig,
};
use crate::compose::{Bitmap, CompositionEngine, SubmitOutcome};
use crate::config::EngineConfig;
use crate::utils::{join_within, AppError, AppResult, ErrorResponse};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How long a worker waits for a streamed frame per iteration
const FRAME_WAIT: Duration = Duration::from_millis(50);

/// First retry delay after a frame error; doubles per consecutive error
const FRAME_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Cap on the frame error retry delay
const MAX_FRAME_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Consecutive frame errors between repeated warnings
const FRAME_ERROR_WARN_EVERY: u32 = 50;

/// A still result tagged with the device it came from
pub type StillResult = (DeviceRole, CaptureResult<RawFrame>);

/// Timing and sizing for camera sessions
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub preview_resolution: Resolution,
    pub stream: StreamConfig,
    /// Minimum gap between frames a device hands off
    pub sample_interval: Duration,
    /// Bound on acquiring the hardware lock
    pub open_timeout: Duration,
    /// Bound on waiting for still captures
    pub still_timeout: Duration,
    /// Bound on a worker exiting once stopped
    pub join_timeout: Duration,
}

impl From<&EngineConfig> for SessionConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            preview_resolution: config.preview_resolution,
            stream: StreamConfig {
                resolution: config.sample_resolution,
                frame_rate: config.sample_frame_rate,
            },
            sample_interval: config.sample_interval(),
            open_timeout: config.open_timeout(),
            still_timeout: config.still_timeout(),
            join_timeout: config.join_timeout(),
        }
    }
}

/// Result of device discovery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDiscovery {
    pub cameras: Vec<CameraInfo>,
    pub back_id: Option<String>,
    pub front_id: Option<String>,
    /// The platform certifies the (back, front) pair for concurrent streaming
    pub official_dual_camera_support: bool,
}

impl DeviceDiscovery {
    fn classify(cameras: Vec<CameraInfo>, pairs: &[(String, String)]) -> Self {
        let first = |facing: Facing| {
            cameras
                .iter()
                .find(|c| c.facing == facing)
                .map(|c| c.id.clone())
        };
        let mut back_id = first(Facing::Back);
        let mut front_id = first(Facing::Front);

        for external in cameras.iter().filter(|c| c.facing == Facing::External) {
            if back_id.is_none() {
                back_id = Some(external.id.clone());
            } else if front_id.is_none() {
                front_id = Some(external.id.clone());
            }
        }

        let official_dual_camera_support = match (&back_id, &front_id) {
            (Some(back), Some(front)) => pairs
                .iter()
                .any(|(a, b)| (a == back && b == front) || (a == front && b == back)),
            _ => false,
        };

        Self {
            cameras,
            back_id,
            front_id,
            official_dual_camera_support,
        }
    }

    pub fn device_id(&self, role: DeviceRole) -> Option<&str> {
        match role {
            DeviceRole::Back => self.back_id.as_deref(),
            DeviceRole::Front => self.front_id.as_deref(),
        }
    }

    /// Both devices are present, so dual opening is attempted
    pub fn dual_attempted(&self) -> bool {
        self.back_id.is_some() && self.front_id.is_some()
    }
}

/// Per-device open result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub role: DeviceRole,
    pub device_id: String,
    pub opened: bool,
    pub error: Option<ErrorResponse>,
}

/// What `open_cameras` reports back
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenReport {
    pub previews: Vec<PreviewInfo>,
    pub devices: Vec<DeviceStatus>,
    pub official_dual_camera_support: bool,
    /// Both devices actually opened
    pub is_dual_camera_supported: bool,
}

impl OpenReport {
    pub fn opened_roles(&self) -> Vec<DeviceRole> {
        self.devices
            .iter()
            .filter(|d| d.opened)
            .map(|d| d.role)
            .collect()
    }
}

/// Frame counters for one open device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub role: DeviceRole,
    pub device_id: String,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub frame_errors: u64,
}

/// Snapshot of the manager's view of the cameras
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraStatus {
    pub initialized: bool,
    pub cameras: Vec<CameraInfo>,
    pub back_id: Option<String>,
    pub front_id: Option<String>,
    pub open_roles: Vec<DeviceRole>,
    pub swapped: bool,
    pub official_dual_camera_support: bool,
    pub is_dual_camera_supported: bool,
    pub previews: Vec<PreviewInfo>,
    pub sessions: Vec<SessionStats>,
}

enum OpenOutcome {
    Opened(DeviceRole),
    Failed(DeviceRole, String),
}

struct StillRequest {
    reply: Sender<StillResult>,
}

#[derive(Default)]
struct SessionCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

/// One device's worker thread and its request queue
pub struct CaptureSession {
    role: DeviceRole,
    device_id: String,
    running: Arc<AtomicBool>,
    requests: Sender<StillRequest>,
    counters: Arc<SessionCounters>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureSession {
    pub fn role(&self) -> DeviceRole {
        self.role
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn request_still(&self, reply: Sender<StillResult>) -> bool {
        self.requests.send(StillRequest { reply }).is_ok()
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            role: self.role,
            device_id: self.device_id.clone(),
            frames_delivered: self.counters.delivered.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
            frame_errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    fn signal_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn join(mut self, timeout: Duration) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            join_within(handle, timeout, &format!("camera-{}", self.role));
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

/// Everything a device worker owns
struct Worker {
    role: DeviceRole,
    device_id: String,
    backend: Arc<dyn CameraBackend>,
    hardware: Arc<Mutex<()>>,
    compositor: Arc<CompositionEngine>,
    preview: Arc<PreviewSurface>,
    config: SessionConfig,
    running: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
    requests: Receiver<StillRequest>,
    /// Closed by the device that opens before this one
    wait_for: Option<Receiver<()>>,
    /// Closed once this device's open attempt is over
    attempted: Option<Sender<()>>,
}

impl Worker {
    fn run(mut self, outcome: Sender<OpenOutcome>) {
        let device = self.open();
        // Let the next device try its open regardless of how ours went
        self.attempted.take();

        let mut device = match device {
            Ok(device) => device,
            Err(reason) => {
                tracing::warn!("{} camera {} failed to open: {}", self.role, self.device_id, reason);
                let _ = outcome.send(OpenOutcome::Failed(self.role, reason));
                return;
            }
        };

        if !self.running.load(Ordering::SeqCst) {
            // The manager gave up on us while the open was in flight
            device.close();
            return;
        }

        if let Err(e) = device.enable_auto_controls() {
            tracing::warn!("{} camera: auto focus/exposure unavailable: {}", self.role, e);
        }

        tracing::info!("{} camera {} streaming", self.role, self.device_id);
        let _ = outcome.send(OpenOutcome::Opened(self.role));
        drop(outcome);

        self.stream(device.as_mut());

        device.close();
        tracing::info!(
            "{} camera stopped ({} frames delivered, {} dropped)",
            self.role,
            self.counters.delivered.load(Ordering::Relaxed),
            self.counters.dropped.load(Ordering::Relaxed)
        );
    }

    fn open(&mut self) -> Result<Box<dyn CameraDevice>, String> {
        if let Some(previous) = self.wait_for.take() {
            let _ = previous.recv_timeout(self.config.open_timeout);
        }

        let Some(_guard) = self.hardware.try_lock_for(self.config.open_timeout) else {
            return Err(format!(
                "Timed out after {:?} waiting for the camera hardware",
                self.config.open_timeout
            ));
        };

        self.backend
            .open(&self.device_id, &self.config.stream)
            .map_err(|e| e.to_string())
    }

    fn stream(&self, device: &mut dyn CameraDevice) {
        let mut last_handoff: Option<Instant> = None;
        let mut consecutive_errors: u32 = 0;

        while self.running.load(Ordering::SeqCst) {
            loop {
                match self.requests.try_recv() {
                    Ok(request) => {
                        let result = device.capture_still();
                        let _ = request.reply.send((self.role, result));
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }

            let frame = match device.next_frame(FRAME_WAIT) {
                Ok(Some(frame)) => {
                    if consecutive_errors > 0 {
                        tracing::info!(
                            "{} camera recovered after {} frame error(s)",
                            self.role,
                            consecutive_errors
                        );
                        consecutive_errors = 0;
                    }
                    frame
                }
                Ok(None) => continue,
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    if consecutive_errors == 1 || consecutive_errors % FRAME_ERROR_WARN_EVERY == 0 {
                        tracing::warn!(
                            "{} camera frame error ({} in a row): {}",
                            self.role,
                            consecutive_errors,
                            e
                        );
                    } else {
                        tracing::debug!("{} camera frame error: {}", self.role, e);
                    }
                    self.sleep_while_running(frame_error_backoff(consecutive_errors));
                    continue;
                }
            };

            let now = Instant::now();
            if let Some(last) = last_handoff {
                if now.saturating_duration_since(last) < self.config.sample_interval {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }
            last_handoff = Some(now);

            match self.compositor.submit_frame_at(self.role, &frame, now) {
                Ok(SubmitOutcome::Stored) => {
                    if let Some(stored) = self.compositor.latest_frame(self.role) {
                        self.preview.update(stored.bitmap);
                    }
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(SubmitOutcome::Throttled) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::debug!("{} camera frame rejected: {}", self.role, e);
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Sleep in short steps so a stop request is not held up by a backoff
    fn sleep_while_running(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while self.running.load(Ordering::SeqCst) {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            std::thread::sleep(left.min(FRAME_WAIT));
        }
    }
}

/// Retry delay after `consecutive` frame errors in a row
fn frame_error_backoff(consecutive: u32) -> Duration {
    let doublings = consecutive.saturating_sub(1).min(16);
    FRAME_ERROR_BACKOFF
        .saturating_mul(1u32 << doublings)
        .min(MAX_FRAME_ERROR_BACKOFF)
}

#[derive(Default)]
struct ManagerState {
    initialized: bool,
    /// An open is in flight
    opening: bool,
    /// Bumped by every close; an open started under an older value is discarded
    generation: u64,
    discovery: Option<DeviceDiscovery>,
    previews: HashMap<DeviceRole, Arc<PreviewSurface>>,
    sessions: HashMap<DeviceRole, CaptureSession>,
    last_report: Option<OpenReport>,
}

/// What the open workers produced, before it is committed
struct OpenAttempt {
    discovery: DeviceDiscovery,
    sessions: HashMap<DeviceRole, CaptureSession>,
    devices: Vec<DeviceStatus>,
}

impl ManagerState {
    fn preview_infos(&self) -> Vec<PreviewInfo> {
        DeviceRole::ALL
            .iter()
            .filter_map(|role| self.previews.get(role))
            .map(|p| p.info())
            .collect()
    }

    fn open_roles(&self) -> Vec<DeviceRole> {
        DeviceRole::ALL
            .into_iter()
            .filter(|role| self.sessions.contains_key(role))
            .collect()
    }
}

/// Owns the camera hardware for the engine
pub struct CameraSessionManager {
    backend: Arc<dyn CameraBackend>,
    compositor: Arc<CompositionEngine>,
    config: SessionConfig,
    hardware: Arc<Mutex<()>>,
    state: Mutex<ManagerState>,
    next_handle: AtomicU64,
}

impl CameraSessionManager {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        compositor: Arc<CompositionEngine>,
        config: SessionConfig,
    ) -> Self {
        Self {
            backend,
            compositor,
            config,
            hardware: Arc::new(Mutex::new(())),
            state: Mutex::new(ManagerState::default()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn compositor(&self) -> &Arc<CompositionEngine> {
        &self.compositor
    }

    /// Enumerate and classify the attached cameras
    pub fn discover_devices(&self) -> AppResult<DeviceDiscovery> {
        let discovery = self.discover()?;
        self.state.lock().discovery = Some(discovery.clone());
        Ok(discovery)
    }

    fn discover(&self) -> AppResult<DeviceDiscovery> {
        let cameras = self
            .backend
            .enumerate()
            .map_err(|e| AppError::CameraUnavailable(format!("Camera enumeration failed: {e}")))?;
        let discovery = DeviceDiscovery::classify(cameras, &self.backend.concurrent_pairs());
        tracing::info!(
            "Discovered {} camera(s): back={:?} front={:?} official_pair={}",
            discovery.cameras.len(),
            discovery.back_id,
            discovery.front_id,
            discovery.official_dual_camera_support
        );
        Ok(discovery)
    }

    /// Check camera access and allocate the preview surfaces.
    ///
    /// Calling it again returns the existing surfaces.
    pub fn initialize(&self) -> AppResult<Vec<PreviewInfo>> {
        let mut state = self.state.lock();
        if state.initialized {
            return Ok(state.preview_infos());
        }

        if !self.backend.has_permission() {
            return Err(AppError::Initialization(
                "Camera access has not been granted".to_string(),
            ));
        }

        for role in DeviceRole::ALL {
            let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
            let surface = PreviewSurface::new(handle, role, self.config.preview_resolution);
            state.previews.insert(role, Arc::new(surface));
        }
        state.initialized = true;

        tracing::info!(
            "Camera manager initialized with {} backend, previews at {}x{}",
            self.backend.name(),
            self.config.preview_resolution.width,
            self.config.preview_resolution.height
        );
        Ok(state.preview_infos())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Open the back device, then the front one when both are present.
    ///
    /// Each open runs on its own worker; results are collected until every
    /// worker has reported or the deadline passes. Partial success is
    /// reported per device. With cameras already open the last report is
    /// returned unchanged.
    ///
    /// The manager state is not held while devices open, so status and
    /// preview reads answer immediately. Closing the cameras meanwhile
    /// discards whatever the open produced.
    pub fn open_cameras(&self) -> AppResult<OpenReport> {
        let (previews, generation) = {
            let mut state = self.state.lock();
            if !state.initialized {
                return Err(AppError::InvalidState(
                    "Camera manager is not initialized".to_string(),
                ));
            }
            if !state.sessions.is_empty() {
                if let Some(report) = &state.last_report {
                    return Ok(report.clone());
                }
            }
            if state.opening {
                return Err(AppError::InvalidState("Cameras are already opening".to_string()));
            }
            state.opening = true;
            (state.previews.clone(), state.generation)
        };

        let attempt = self.open_devices(&previews);

        let mut state = self.state.lock();
        state.opening = false;
        let attempt = attempt?;
        state.discovery = Some(attempt.discovery.clone());

        if state.generation != generation {
            drop(state);
            tracing::info!("Cameras closed while opening; releasing the opened devices");
            for session in attempt.sessions.into_values() {
                session.join(self.config.join_timeout);
            }
            return Err(AppError::InvalidState(
                "Cameras were closed while opening".to_string(),
            ));
        }

        if attempt.sessions.is_empty() {
            let reasons: Vec<String> = attempt
                .devices
                .iter()
                .filter_map(|d| d.error.as_ref().map(|e| e.message.clone()))
                .collect();
            return Err(AppError::CameraUnavailable(reasons.join("; ")));
        }

        state.sessions.extend(attempt.sessions);
        let report = OpenReport {
            previews: state.preview_infos(),
            devices: attempt.devices,
            official_dual_camera_support: attempt.discovery.official_dual_camera_support,
            is_dual_camera_supported: state.sessions.len() == 2,
        };
        tracing::info!(
            "Cameras open: {:?} (dual={}, official={})",
            report.opened_roles(),
            report.is_dual_camera_supported,
            report.official_dual_camera_support
        );
        state.last_report = Some(report.clone());
        Ok(report)
    }

    /// Spawn a worker per discovered device and collect the open outcomes.
    /// Workers that did not open are joined before returning.
    fn open_devices(
        &self,
        previews: &HashMap<DeviceRole, Arc<PreviewSurface>>,
    ) -> AppResult<OpenAttempt> {
        let discovery = self.discover()?;

        let roles: Vec<(DeviceRole, String)> = DeviceRole::ALL
            .into_iter()
            .filter_map(|role| discovery.device_id(role).map(|id| (role, id.to_string())))
            .collect();
        if roles.is_empty() {
            return Err(AppError::CameraUnavailable("No cameras found".to_string()));
        }

        tracing::info!(
            "Opening {} camera(s) ({} mode)",
            roles.len(),
            if discovery.dual_attempted() { "dual" } else { "single" }
        );

        let (outcome_tx, outcome_rx) = mpsc::channel();
        let mut pending: HashMap<DeviceRole, CaptureSession> = HashMap::new();
        let mut previous: Option<Receiver<()>> = None;

        for (role, device_id) in &roles {
            let Some(preview) = previews.get(role).cloned() else {
                continue;
            };
            let (attempted_tx, attempted_rx) = mpsc::channel();
            let (request_tx, request_rx) = mpsc::channel();
            let running = Arc::new(AtomicBool::new(true));
            let counters = Arc::new(SessionCounters::default());

            let worker = Worker {
                role: *role,
                device_id: device_id.clone(),
                backend: self.backend.clone(),
                hardware: self.hardware.clone(),
                compositor: self.compositor.clone(),
                preview,
                config: self.config,
                running: running.clone(),
                counters: counters.clone(),
                requests: request_rx,
                wait_for: previous.take(),
                attempted: Some(attempted_tx),
            };
            previous = Some(attempted_rx);

            let tx = outcome_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("camera-{role}"))
                .spawn(move || worker.run(tx))?;

            pending.insert(
                *role,
                CaptureSession {
                    role: *role,
                    device_id: device_id.clone(),
                    running,
                    requests: request_tx,
                    counters,
                    handle: Some(handle),
                },
            );
        }
        drop(outcome_tx);

        // Fan-in: one outcome per spawned worker
        let mut remaining = pending.len();
        let mut failures: HashMap<DeviceRole, String> = HashMap::new();
        let mut opened: Vec<DeviceRole> = Vec::new();
        let deadline = Instant::now() + self.config.open_timeout * (remaining as u32 + 1);

        while remaining > 0 {
            let wait = deadline.saturating_duration_since(Instant::now());
            match outcome_rx.recv_timeout(wait) {
                Ok(OpenOutcome::Opened(role)) => {
                    opened.push(role);
                    remaining -= 1;
                }
                Ok(OpenOutcome::Failed(role, reason)) => {
                    failures.insert(role, reason);
                    remaining -= 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let mut sessions = HashMap::new();
        let mut devices = Vec::with_capacity(roles.len());
        for (role, device_id) in &roles {
            let Some(session) = pending.remove(role) else {
                continue;
            };
            if opened.contains(role) {
                sessions.insert(*role, session);
                devices.push(DeviceStatus {
                    role: *role,
                    device_id: device_id.clone(),
                    opened: true,
                    error: None,
                });
            } else {
                let reason = failures
                    .remove(role)
                    .unwrap_or_else(|| "Open did not complete in time".to_string());
                session.join(self.config.join_timeout);
                devices.push(DeviceStatus {
                    role: *role,
                    device_id: device_id.clone(),
                    opened: false,
                    error: Some(AppError::DeviceOpen { role: *role, reason }.into()),
                });
            }
        }

        Ok(OpenAttempt {
            discovery,
            sessions,
            devices,
        })
    }

    pub fn open_roles(&self) -> Vec<DeviceRole> {
        self.state.lock().open_roles()
    }

    /// Ask every open device for a still and collect the results.
    ///
    /// Devices that do not answer before the still timeout are reported
    /// with a timeout error. Results are ordered back first.
    pub fn request_stills(&self) -> AppResult<Vec<StillResult>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let mut requested = Vec::new();
        {
            let state = self.state.lock();
            for role in state.open_roles() {
                if let Some(session) = state.sessions.get(&role) {
                    if session.request_still(reply_tx.clone()) {
                        requested.push(role);
                    }
                }
            }
        }
        drop(reply_tx);

        if requested.is_empty() {
            return Err(AppError::CameraUnavailable("No camera is open".to_string()));
        }

        let deadline = Instant::now() + self.config.still_timeout;
        let mut results: Vec<StillResult> = Vec::with_capacity(requested.len());
        while results.len() < requested.len() {
            let wait = deadline.saturating_duration_since(Instant::now());
            match reply_rx.recv_timeout(wait) {
                Ok(result) => results.push(result),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for role in requested {
            if !results.iter().any(|(r, _)| *r == role) {
                tracing::warn!("{} camera did not deliver a still in time", role);
                results.push((
                    role,
                    Err(CaptureError::Timeout(format!(
                        "{role} still not delivered within {:?}",
                        self.config.still_timeout
                    ))),
                ));
            }
        }
        results.sort_by_key(|(role, _)| *role == DeviceRole::Front);
        Ok(results)
    }

    /// Flip main/inset; returns the new swap state
    pub fn swap_cameras(&self) -> bool {
        let swapped = self.compositor.toggle_swapped();
        tracing::info!("Cameras swapped (swapped={})", swapped);
        swapped
    }

    /// Stop every device worker and release the hardware. Preview surfaces
    /// stay allocated but empty.
    pub fn close_cameras(&self) {
        let mut state = self.state.lock();
        let sessions: Vec<CaptureSession> = state.sessions.drain().map(|(_, s)| s).collect();
        state.last_report = None;
        state.generation += 1;
        if sessions.is_empty() {
            return;
        }

        let guard = self.hardware.try_lock_for(self.config.open_timeout);
        if guard.is_none() {
            tracing::warn!("Camera hardware lock busy; closing without it");
        }

        for session in &sessions {
            session.signal_stop();
        }
        for session in sessions {
            session.join(self.config.join_timeout);
        }

        self.compositor.clear_all();
        for preview in state.previews.values() {
            preview.clear();
        }
        tracing::info!("Cameras closed");
    }

    /// Close everything and drop the preview surfaces
    pub fn dispose(&self) {
        self.close_cameras();
        let mut state = self.state.lock();
        state.previews.clear();
        state.discovery = None;
        state.initialized = false;
    }

    pub fn camera_info(&self) -> CameraStatus {
        let state = self.state.lock();
        let discovery = state.discovery.clone().unwrap_or_default();
        let sessions = state
            .open_roles()
            .into_iter()
            .filter_map(|role| state.sessions.get(&role).map(CaptureSession::stats))
            .collect();
        CameraStatus {
            initialized: state.initialized,
            cameras: discovery.cameras,
            back_id: discovery.back_id,
            front_id: discovery.front_id,
            open_roles: state.open_roles(),
            swapped: self.compositor.is_swapped(),
            official_dual_camera_support: discovery.official_dual_camera_support,
            is_dual_camera_supported: state.sessions.len() == 2,
            previews: state.preview_infos(),
            sessions,
        }
    }

    /// Latest frame of the preview surface with `handle`
    pub fn preview_frame(&self, handle: PreviewHandle) -> AppResult<Option<Bitmap>> {
        let surface = self
            .state
            .lock()
            .previews
            .values()
            .find(|p| p.handle() == handle)
            .cloned()
            .ok_or_else(|| AppError::InvalidArgument(format!("Unknown preview handle {handle}")))?;
        Ok(surface.snapshot())
    }
}

impl Drop for CameraSessionManager {
    fn drop(&mut self) {
        self.close_cameras();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{Layout, Orientation};
    use crate::testing::{FakeCameraBackend, BLUE, RED};

    fn test_config() -> SessionConfig {
        SessionConfig {
            preview_resolution: Resolution::new(32, 18),
            stream: StreamConfig {
                resolution: Resolution::new(16, 12),
                frame_rate: 30,
            },
            sample_interval: Duration::from_millis(10),
            open_timeout: Duration::from_millis(300),
            still_timeout: Duration::from_millis(1000),
            join_timeout: Duration::from_millis(1000),
        }
    }

    fn manager(backend: &FakeCameraBackend) -> CameraSessionManager {
        let compositor = Arc::new(CompositionEngine::new(
            Layout::SideBySideHorizontal,
            Duration::from_millis(10),
            Orientation::default(),
        ));
        CameraSessionManager::new(Arc::new(backend.clone()), compositor, test_config())
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_initialize_requires_permission() {
        let backend = FakeCameraBackend::dual().without_permission();
        let manager = manager(&backend);
        let err = manager.initialize().unwrap_err();
        assert!(matches!(err, AppError::Initialization(_)));
        assert!(!manager.is_initialized());
    }

    #[test]
    fn test_initialize_allocates_two_previews_once() {
        let backend = FakeCameraBackend::dual();
        let manager = manager(&backend);
        let first = manager.initialize().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].role, DeviceRole::Back);
        assert_eq!((first[1].width, first[1].height), (32, 18));

        let second = manager.initialize().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_open_requires_initialize() {
        let backend = FakeCameraBackend::dual();
        let manager = manager(&backend);
        assert!(matches!(manager.open_cameras(), Err(AppError::InvalidState(_))));
    }

    #[test]
    fn test_dual_open_without_official_pair() {
        let backend = FakeCameraBackend::dual();
        let manager = manager(&backend);
        manager.initialize().unwrap();

        let report = manager.open_cameras().unwrap();
        assert!(report.is_dual_camera_supported);
        assert!(!report.official_dual_camera_support);
        assert_eq!(report.opened_roles(), vec![DeviceRole::Back, DeviceRole::Front]);
        assert_eq!(backend.opened(), vec!["back", "front"]);
    }

    #[test]
    fn test_official_pair_in_either_order() {
        let backend = FakeCameraBackend::dual().with_concurrent_pair("front", "back");
        let manager = manager(&backend);
        let discovery = manager.discover_devices().unwrap();
        assert!(discovery.official_dual_camera_support);
        assert!(discovery.dual_attempted());
    }

    #[test]
    fn test_back_only_opens_single() {
        let backend = FakeCameraBackend::back_only();
        let manager = manager(&backend);
        manager.initialize().unwrap();

        let report = manager.open_cameras().unwrap();
        assert_eq!(report.opened_roles(), vec![DeviceRole::Back]);
        assert!(!report.is_dual_camera_supported);
        assert_eq!(manager.open_roles(), vec![DeviceRole::Back]);
    }

    #[test]
    fn test_no_cameras_is_unavailable() {
        let backend = FakeCameraBackend::none();
        let manager = manager(&backend);
        manager.initialize().unwrap();
        assert!(matches!(
            manager.open_cameras(),
            Err(AppError::CameraUnavailable(_))
        ));
    }

    #[test]
    fn test_partial_open_reports_each_device() {
        let backend = FakeCameraBackend::dual().failing_open("front");
        let manager = manager(&backend);
        manager.initialize().unwrap();

        let report = manager.open_cameras().unwrap();
        assert!(!report.is_dual_camera_supported);
        let front = report
            .devices
            .iter()
            .find(|d| d.role == DeviceRole::Front)
            .unwrap();
        assert!(!front.opened);
        assert_eq!(front.error.as_ref().unwrap().code, "DEVICE_OPEN_ERROR");
    }

    #[test]
    fn test_both_failing_is_unavailable() {
        let backend = FakeCameraBackend::dual()
            .failing_open("back")
            .failing_open("front");
        let manager = manager(&backend);
        manager.initialize().unwrap();

        let err = manager.open_cameras().unwrap_err();
        assert!(matches!(err, AppError::CameraUnavailable(_)));
        assert!(err.to_string().contains("busy"));
    }

    #[test]
    fn test_hardware_lock_timeout() {
        let backend = FakeCameraBackend::back_only();
        let manager = manager(&backend);
        manager.initialize().unwrap();

        let held = manager.hardware.lock();
        let err = manager.open_cameras().unwrap_err();
        drop(held);

        assert!(err.to_string().contains("Timed out"));
        assert!(backend.opened().is_empty());
    }

    #[test]
    fn test_externals_fill_back_then_front() {
        let backend = FakeCameraBackend::externals();
        let manager = manager(&backend);
        let discovery = manager.discover_devices().unwrap();
        assert_eq!(discovery.back_id.as_deref(), Some("usb0"));
        assert_eq!(discovery.front_id.as_deref(), Some("usb1"));
    }

    #[test]
    fn test_frames_reach_compositor_and_previews() {
        let backend = FakeCameraBackend::dual().failing_auto_controls();
        let manager = manager(&backend);
        let previews = manager.initialize().unwrap();
        manager.open_cameras().unwrap();

        let compositor = manager.compositor().clone();
        assert!(wait_until(|| {
            compositor.latest_frame(DeviceRole::Back).is_some()
                && compositor.latest_frame(DeviceRole::Front).is_some()
        }));

        let back = compositor.latest_frame(DeviceRole::Back).unwrap();
        assert_eq!(back.bitmap.pixel(0, 0), RED);
        let front = compositor.latest_frame(DeviceRole::Front).unwrap();
        assert_eq!(front.bitmap.pixel(0, 0), BLUE);

        let preview = manager.preview_frame(previews[0].handle).unwrap().unwrap();
        assert_eq!((preview.width(), preview.height()), (32, 18));
        assert!(manager.preview_frame(9999).is_err());
    }

    #[test]
    fn test_stills_from_every_open_device() {
        let backend = FakeCameraBackend::dual().failing_still("front");
        let manager = manager(&backend);
        manager.initialize().unwrap();
        manager.open_cameras().unwrap();

        let stills = manager.request_stills().unwrap();
        assert_eq!(stills.len(), 2);
        assert_eq!(stills[0].0, DeviceRole::Back);
        assert!(stills[0].1.is_ok());
        assert!(stills[1].1.is_err());
    }

    #[test]
    fn test_stills_without_open_device() {
        let backend = FakeCameraBackend::dual();
        let manager = manager(&backend);
        manager.initialize().unwrap();
        assert!(matches!(
            manager.request_stills(),
            Err(AppError::CameraUnavailable(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent_and_releases_devices() {
        let backend = FakeCameraBackend::dual();
        let manager = manager(&backend);
        manager.initialize().unwrap();
        manager.open_cameras().unwrap();

        manager.close_cameras();
        manager.close_cameras();

        let mut closed = backend.closed();
        closed.sort();
        assert_eq!(closed, vec!["back", "front"]);
        assert!(manager.open_roles().is_empty());
        assert!(manager.compositor().latest_frame(DeviceRole::Back).is_none());

        // Reopen after close works
        let report = manager.open_cameras().unwrap();
        assert!(report.is_dual_camera_supported);

        manager.dispose();
        manager.dispose();
        assert!(!manager.is_initialized());
        assert!(manager.camera_info().previews.is_empty());
    }

    #[test]
    fn test_two_swaps_restore_assignment() {
        let backend = FakeCameraBackend::dual();
        let manager = manager(&backend);
        assert!(manager.swap_cameras());
        assert!(!manager.swap_cameras());
        assert!(!manager.camera_info().swapped);
    }

    #[test]
    fn test_status_reads_answer_while_cameras_open() {
        let backend = FakeCameraBackend::dual().with_open_delay(Duration::from_millis(150));
        let manager = Arc::new(manager(&backend));
        let previews = manager.initialize().unwrap();

        let opener = {
            let manager = manager.clone();
            std::thread::spawn(move || manager.open_cameras())
        };
        std::thread::sleep(Duration::from_millis(40));

        let asked = Instant::now();
        let status = manager.camera_info();
        assert!(manager.preview_frame(previews[0].handle).unwrap().is_none());
        assert!(asked.elapsed() < Duration::from_millis(100));
        assert!(status.open_roles.is_empty());
        assert!(matches!(manager.open_cameras(), Err(AppError::InvalidState(_))));

        let report = opener.join().unwrap().unwrap();
        assert!(report.is_dual_camera_supported);
        assert_eq!(manager.open_roles(), vec![DeviceRole::Back, DeviceRole::Front]);
    }

    #[test]
    fn test_close_during_open_releases_devices() {
        let backend = FakeCameraBackend::dual().with_open_delay(Duration::from_millis(100));
        let manager = Arc::new(manager(&backend));
        manager.initialize().unwrap();

        let opener = {
            let manager = manager.clone();
            std::thread::spawn(move || manager.open_cameras())
        };
        std::thread::sleep(Duration::from_millis(30));
        manager.close_cameras();

        let result = opener.join().unwrap();
        assert!(matches!(result, Err(AppError::InvalidState(_))));
        assert!(manager.open_roles().is_empty());
        assert!(wait_until(|| backend.closed().len() == 2));

        let report = manager.open_cameras().unwrap();
        assert!(report.is_dual_camera_supported);
    }

    #[test]
    fn test_frame_errors_back_off_and_recover() {
        let backend = FakeCameraBackend::dual().failing_frames("back", 3);
        let manager = manager(&backend);
        manager.initialize().unwrap();
        manager.open_cameras().unwrap();

        let compositor = manager.compositor().clone();
        assert!(wait_until(|| compositor.latest_frame(DeviceRole::Back).is_some()));

        let status = manager.camera_info();
        let back = status
            .sessions
            .iter()
            .find(|s| s.role == DeviceRole::Back)
            .unwrap();
        assert_eq!(back.frame_errors, 3);
        let front = status
            .sessions
            .iter()
            .find(|s| s.role == DeviceRole::Front)
            .unwrap();
        assert_eq!(front.frame_errors, 0);
    }

    #[test]
    fn test_frame_error_backoff_doubles_and_caps() {
        assert_eq!(frame_error_backoff(1), Duration::from_millis(10));
        assert_eq!(frame_error_backoff(2), Duration::from_millis(20));
        assert_eq!(frame_error_backoff(3), Duration::from_millis(40));
        assert_eq!(frame_error_backoff(10), MAX_FRAME_ERROR_BACKOFF);
        assert_eq!(frame_error_backoff(u32::MAX), MAX_FRAME_ERROR_BACKOFF);
    }
}
