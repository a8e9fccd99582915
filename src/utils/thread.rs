//! Worker thread helpers

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Join a worker, giving up after `timeout`. A worker that does not exit in
/// time is detached and `None` is returned, as it is for a panicked one.
pub fn join_within<T>(handle: JoinHandle<T>, timeout: Duration, name: &str) -> Option<T> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!("{} thread did not exit within {:?}; detaching", name, timeout);
            return None;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::error!("{} thread panicked", name);
            None
        }
    }
}
