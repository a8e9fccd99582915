//! System-related Tauri commands

use super::{run_blocking, EngineState};
use crate::recorder::DeviceInfo;
use crate::utils::CommandResponse;
use tauri::State;

/// Host, backend and camera summary. Checks for FFmpeg, so it runs blocking.
#[tauri::command]
pub async fn get_device_info(
    state: State<'_, EngineState>,
) -> Result<CommandResponse<DeviceInfo>, String> {
    run_blocking(&state, "get_device_info", |c| Ok(c.device_info())).await
}
