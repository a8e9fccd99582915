//! Tauri command handlers
//!
//! IPC commands the frontend calls through Tauri's invoke system. Each one
//! runs the coordinator call on the blocking pool and answers with a
//! structured `CommandResponse`.

pub mod camera;
pub mod recording;
pub mod system;

use crate::recorder::DualCameraCoordinator;
use crate::utils::{AppResult, CommandResponse};

/// Application state shared by all commands
pub struct EngineState {
    pub coordinator: DualCameraCoordinator,
}

impl EngineState {
    pub fn new(coordinator: DualCameraCoordinator) -> Self {
        Self { coordinator }
    }
}

/// Run a coordinator call off the async runtime; hardware calls block.
pub(crate) async fn run_blocking<T, F>(
    state: &EngineState,
    name: &'static str,
    call: F,
) -> Result<CommandResponse<T>, String>
where
    T: Send + 'static,
    F: FnOnce(&DualCameraCoordinator) -> AppResult<T> + Send + 'static,
{
    let coordinator = state.coordinator.clone();
    tracing::debug!("Command: {}", name);
    tokio::task::spawn_blocking(move || CommandResponse::from(call(&coordinator)))
        .await
        .map_err(|e| format!("{name} task failed: {e}"))
}
