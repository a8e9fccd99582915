//! Preview surfaces
//!
//! One surface per device role, identified by a handle the application
//! layer uses to fetch frames. A surface keeps the device's latest oriented
//! frame and scales it to the preview resolution when read.

use crate::capture::{DeviceRole, Resolution};
use crate::compose::{Bitmap, Rect};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type PreviewHandle = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewInfo {
    pub handle: PreviewHandle,
    pub role: DeviceRole,
    pub width: u32,
    pub height: u32,
}

pub struct PreviewSurface {
    handle: PreviewHandle,
    role: DeviceRole,
    resolution: Resolution,
    latest: Mutex<Option<Arc<Bitmap>>>,
    frames: AtomicU64,
}

impl PreviewSurface {
    pub fn new(handle: PreviewHandle, role: DeviceRole, resolution: Resolution) -> Self {
        Self {
            handle,
            role,
            resolution,
            latest: Mutex::new(None),
            frames: AtomicU64::new(0),
        }
    }

    pub fn handle(&self) -> PreviewHandle {
        self.handle
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    pub fn info(&self) -> PreviewInfo {
        PreviewInfo {
            handle: self.handle,
            role: self.role,
            width: self.resolution.width,
            height: self.resolution.height,
        }
    }

    pub fn update(&self, frame: Arc<Bitmap>) {
        *self.latest.lock() = Some(frame);
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        *self.latest.lock() = None;
    }

    /// Frames shown since the surface was created
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// The latest frame at preview resolution
    pub fn snapshot(&self) -> Option<Bitmap> {
        let frame = self.latest.lock().clone()?;
        let (w, h) = (self.resolution.width, self.resolution.height);
        if frame.width() == w && frame.height() == h {
            return Some(frame.as_ref().clone());
        }
        let mut out = Bitmap::new(w, h);
        out.draw_scaled(&frame, Rect::new(0, 0, w, h));
        Some(out)
    }
}
