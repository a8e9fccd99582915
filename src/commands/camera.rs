//! Camera, layout and photo commands

use super::{run_blocking, EngineState};
use crate::camera::{CameraStatus, OpenReport, PreviewHandle, PreviewInfo};
use crate::compose::Layout;
use crate::photo::PhotoOutput;
use crate::recorder::LayoutInfo;
use crate::utils::CommandResponse;
use tauri::ipc::Response;
use tauri::State;

#[tauri::command]
pub async fn initialize(
    state: State<'_, EngineState>,
) -> Result<CommandResponse<Vec<PreviewInfo>>, String> {
    run_blocking(&state, "initialize", |c| c.initialize()).await
}

#[tauri::command]
pub async fn open_cameras(
    state: State<'_, EngineState>,
) -> Result<CommandResponse<OpenReport>, String> {
    run_blocking(&state, "open_cameras", |c| c.open_cameras()).await
}

#[tauri::command]
pub async fn swap_cameras(state: State<'_, EngineState>) -> Result<CommandResponse<bool>, String> {
    run_blocking(&state, "swap_cameras", |c| c.swap_cameras()).await
}

#[tauri::command]
pub async fn close_cameras(state: State<'_, EngineState>) -> Result<CommandResponse<()>, String> {
    run_blocking(&state, "close_cameras", |c| c.close_cameras()).await
}

#[tauri::command]
pub async fn dispose(state: State<'_, EngineState>) -> Result<CommandResponse<()>, String> {
    run_blocking(&state, "dispose", |c| c.dispose()).await
}

#[tauri::command]
pub async fn take_picture(
    state: State<'_, EngineState>,
) -> Result<CommandResponse<PhotoOutput>, String> {
    run_blocking(&state, "take_picture", |c| c.take_picture()).await
}

#[tauri::command]
pub async fn set_layout(
    state: State<'_, EngineState>,
    layout: String,
) -> Result<CommandResponse<Layout>, String> {
    run_blocking(&state, "set_layout", move |c| c.set_layout(&layout)).await
}

#[tauri::command]
pub fn get_layout_info(state: State<'_, EngineState>) -> CommandResponse<LayoutInfo> {
    CommandResponse::ok(state.coordinator.layout_info())
}

#[tauri::command]
pub async fn get_camera_info(
    state: State<'_, EngineState>,
) -> Result<CommandResponse<CameraStatus>, String> {
    run_blocking(&state, "get_camera_info", |c| Ok(c.camera_info())).await
}

/// Latest preview frame as raw bytes: width and height as little-endian
/// u32, then RGBA pixels. Empty when the surface has no frame yet.
#[tauri::command]
pub async fn get_preview_frame(
    state: State<'_, EngineState>,
    handle: PreviewHandle,
) -> Result<Response, String> {
    let coordinator = state.coordinator.clone();
    let frame = tokio::task::spawn_blocking(move || coordinator.preview_frame(handle))
        .await
        .map_err(|e| format!("get_preview_frame task failed: {e}"))?
        .map_err(|e| e.to_string())?;

    let body = match frame {
        Some(bitmap) => {
            let mut body = Vec::with_capacity(8 + bitmap.pixels().len());
            body.extend_from_slice(&bitmap.width().to_le_bytes());
            body.extend_from_slice(&bitmap.height().to_le_bytes());
            body.extend_from_slice(bitmap.pixels());
            body
        }
        None => Vec::new(),
    };
    Ok(Response::new(body))
}
