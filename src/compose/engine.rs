//! Frame composition engine
//!
//! Holds the latest oriented frame per device and draws them into a
//! composite canvas on demand. Producers (device workers) call
//! `submit_frame`; the recording pipeline's timer loop calls
//! `render_composite` at the output frame rate, so a slow device simply
//! has its last frame redrawn.

use super::bitmap::{Bitmap, Rotation, BACKGROUND};
use super::convert::{to_bitmap, ConvertError};
use super::layout::{self, Layout, DIVIDER_COLOR, INSET_BORDER_COLOR};
use crate::capture::{DeviceRole, RawFrame};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-role sensor orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Orientation {
    pub back_rotation: Rotation,
    pub front_rotation: Rotation,
    /// Mirror the front camera so it reads like a mirror
    pub mirror_front: bool,
}

impl Orientation {
    /// Rotate, then mirror the front camera when configured
    pub fn apply(&self, role: DeviceRole, bitmap: Bitmap) -> Bitmap {
        let rotation = match role {
            DeviceRole::Back => self.back_rotation,
            DeviceRole::Front => self.front_rotation,
        };
        let rotated = match rotation {
            Rotation::None => bitmap,
            other => bitmap.rotated(other),
        };
        if role == DeviceRole::Front && self.mirror_front {
            rotated.mirrored()
        } else {
            rotated
        }
    }
}

/// Latest frame stored for one device
#[derive(Debug, Clone)]
pub struct StoredFrame {
    pub bitmap: Arc<Bitmap>,
    /// Engine-wide store order
    pub sequence: u64,
}

#[derive(Default)]
struct FrameSlot {
    frame: Option<StoredFrame>,
    last_accepted: Option<Instant>,
}

/// What happened to a submitted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Stored,
    /// Arrived inside the throttle window and was dropped unconverted
    Throttled,
}

/// Counters since the engine was created or last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionStats {
    pub frames_stored: u64,
    pub frames_throttled: u64,
    pub composites_rendered: u64,
}

pub struct CompositionEngine {
    back: Mutex<FrameSlot>,
    front: Mutex<FrameSlot>,
    throttle: Duration,
    orientation: RwLock<Orientation>,
    layout: RwLock<Layout>,
    swapped: AtomicBool,
    sequence: AtomicU64,
    frames_stored: AtomicU64,
    frames_throttled: AtomicU64,
    composites_rendered: AtomicU64,
}

impl CompositionEngine {
    pub fn new(layout: Layout, throttle: Duration, orientation: Orientation) -> Self {
        Self {
            back: Mutex::new(FrameSlot::default()),
            front: Mutex::new(FrameSlot::default()),
            throttle,
            orientation: RwLock::new(orientation),
            layout: RwLock::new(layout),
            swapped: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            frames_stored: AtomicU64::new(0),
            frames_throttled: AtomicU64::new(0),
            composites_rendered: AtomicU64::new(0),
        }
    }

    fn slot(&self, role: DeviceRole) -> &Mutex<FrameSlot> {
        match role {
            DeviceRole::Back => &self.back,
            DeviceRole::Front => &self.front,
        }
    }

    pub fn layout(&self) -> Layout {
        *self.layout.read()
    }

    pub fn set_layout(&self, layout: Layout) {
        *self.layout.write() = layout;
    }

    pub fn is_swapped(&self) -> bool {
        self.swapped.load(Ordering::SeqCst)
    }

    pub fn set_swapped(&self, swapped: bool) {
        self.swapped.store(swapped, Ordering::SeqCst);
    }

    /// Flip main/inset; returns the new swap state
    pub fn toggle_swapped(&self) -> bool {
        !self.swapped.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn orientation(&self) -> Orientation {
        *self.orientation.read()
    }

    pub fn set_orientation(&self, orientation: Orientation) {
        *self.orientation.write() = orientation;
    }

    /// Submit a raw frame from `role`, stamped now.
    pub fn submit_frame(&self, role: DeviceRole, raw: &RawFrame) -> Result<SubmitOutcome, ConvertError> {
        self.submit_frame_at(role, raw, Instant::now())
    }

    /// Submit a raw frame as if it arrived at `now`.
    ///
    /// The throttle check and the slot reservation happen before any
    /// conversion work, so a dropped frame costs one lock.
    pub fn submit_frame_at(
        &self,
        role: DeviceRole,
        raw: &RawFrame,
        now: Instant,
    ) -> Result<SubmitOutcome, ConvertError> {
        {
            let mut slot = self.slot(role).lock();
            if let Some(last) = slot.last_accepted {
                if now.saturating_duration_since(last) < self.throttle {
                    self.frames_throttled.fetch_add(1, Ordering::Relaxed);
                    return Ok(SubmitOutcome::Throttled);
                }
            }
            slot.last_accepted = Some(now);
        }

        let bitmap = to_bitmap(raw)?;
        let bitmap = self.orientation().apply(role, bitmap);
        self.store(role, Arc::new(bitmap));
        Ok(SubmitOutcome::Stored)
    }

    fn store(&self, role: DeviceRole, bitmap: Arc<Bitmap>) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        // Replacing the Arc releases the previous frame once readers are done
        self.slot(role).lock().frame = Some(StoredFrame { bitmap, sequence });
        self.frames_stored.fetch_add(1, Ordering::Relaxed);
    }

    /// The latest stored frame for `role`
    pub fn latest_frame(&self, role: DeviceRole) -> Option<StoredFrame> {
        self.slot(role).lock().frame.clone()
    }

    /// Forget the stored frame and throttle state for `role`
    pub fn clear(&self, role: DeviceRole) {
        let mut slot = self.slot(role).lock();
        slot.frame = None;
        slot.last_accepted = None;
    }

    pub fn clear_all(&self) {
        for role in DeviceRole::ALL {
            self.clear(role);
        }
    }

    /// Draw the current layout into `target`.
    ///
    /// Each device's frame is snapshotted once up front so a composite
    /// never mixes two frames from the same device.
    pub fn render_composite(&self, target: &mut Bitmap) {
        let back = self.latest_frame(DeviceRole::Back).map(|f| f.bitmap);
        let front = self.latest_frame(DeviceRole::Front).map(|f| f.bitmap);
        compose_into(
            target,
            self.layout(),
            self.is_swapped(),
            back.as_deref(),
            front.as_deref(),
        );
        self.composites_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CompositionStats {
        CompositionStats {
            frames_stored: self.frames_stored.load(Ordering::Relaxed),
            frames_throttled: self.frames_throttled.load(Ordering::Relaxed),
            composites_rendered: self.composites_rendered.load(Ordering::Relaxed),
        }
    }
}

/// Draw `back` and `front` into `target` using `layout`.
///
/// Missing frames leave their region as background. Shared by live
/// composition and still-photo composition.
pub fn compose_into(
    target: &mut Bitmap,
    layout: Layout,
    swapped: bool,
    back: Option<&Bitmap>,
    front: Option<&Bitmap>,
) {
    target.fill(BACKGROUND);
    let plan = layout::plan(layout, swapped, target.width(), target.height());

    for placement in &plan.placements {
        let source = match placement.role {
            DeviceRole::Back => back,
            DeviceRole::Front => front,
        };
        let Some(source) = source else {
            continue;
        };
        target.draw_scaled(source, placement.rect);
        if let Some(border) = placement.border {
            target.stroke_rect(placement.rect.inflate(border), border, INSET_BORDER_COLOR);
        }
    }

    if let Some(divider) = plan.divider {
        target.fill_rect(divider, DIVIDER_COLOR);
    }
}
