//! Recording and capture-settings commands

use super::{run_blocking, EngineState};
use crate::encode::QualityPreset;
use crate::recorder::{QualityInfo, RecordingOutput, RecordingSession, RecordingStatus};
use crate::utils::CommandResponse;
use tauri::State;

#[tauri::command]
pub async fn start_recording(
    state: State<'_, EngineState>,
) -> Result<CommandResponse<RecordingSession>, String> {
    run_blocking(&state, "start_recording", |c| c.start_recording()).await
}

/// `data` is null when nothing was recording
#[tauri::command]
pub async fn stop_recording(
    state: State<'_, EngineState>,
) -> Result<CommandResponse<Option<RecordingOutput>>, String> {
    run_blocking(&state, "stop_recording", |c| c.stop_recording()).await
}

#[tauri::command]
pub async fn pause_recording(state: State<'_, EngineState>) -> Result<CommandResponse<()>, String> {
    run_blocking(&state, "pause_recording", |c| c.pause_recording()).await
}

#[tauri::command]
pub async fn resume_recording(state: State<'_, EngineState>) -> Result<CommandResponse<()>, String> {
    run_blocking(&state, "resume_recording", |c| c.resume_recording()).await
}

#[tauri::command]
pub async fn get_recording_state(
    state: State<'_, EngineState>,
) -> Result<CommandResponse<RecordingStatus>, String> {
    run_blocking(&state, "get_recording_state", |c| Ok(c.recording_state())).await
}

/// Recorded time in milliseconds, pauses excluded
#[tauri::command]
pub async fn get_recording_duration(
    state: State<'_, EngineState>,
) -> Result<CommandResponse<f64>, String> {
    run_blocking(&state, "get_recording_duration", |c| Ok(c.recording_duration())).await
}

#[tauri::command]
pub async fn set_quality(
    state: State<'_, EngineState>,
    quality: String,
) -> Result<CommandResponse<QualityPreset>, String> {
    run_blocking(&state, "set_quality", move |c| c.set_quality(&quality)).await
}

#[tauri::command]
pub async fn set_audio_enabled(
    state: State<'_, EngineState>,
    enabled: bool,
) -> Result<CommandResponse<bool>, String> {
    run_blocking(&state, "set_audio_enabled", move |c| c.set_audio_enabled(enabled)).await
}

#[tauri::command]
pub fn get_quality_info(state: State<'_, EngineState>) -> CommandResponse<QualityInfo> {
    CommandResponse::ok(state.coordinator.quality_info())
}
