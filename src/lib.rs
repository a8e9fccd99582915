//! DualCam - concurrent front/back camera capture.
//!
//! Library core: camera sessions, live composition, muxed recording and
//! still photos behind a command/event coordinator. The `desktop` feature
//! adds the Tauri application layer on top.

pub mod camera;
pub mod capture;
pub mod compose;
pub mod config;
pub mod encode;
pub mod photo;
pub mod recorder;
pub mod utils;

#[cfg(feature = "desktop")]
pub mod commands;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use recorder::{DualCameraCoordinator, EngineEvent};
pub use utils::{AppError, AppResult, CommandResponse};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dualcam=debug,dualcam_lib=debug,tauri=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(feature = "desktop")]
fn load_config(app: &tauri::App) -> anyhow::Result<EngineConfig> {
    use anyhow::Context;
    use tauri::Manager;

    let dir = app
        .path()
        .app_config_dir()
        .context("Failed to resolve the app config directory")?;
    let path = dir.join("engine.json");
    EngineConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Forward engine events to the webview under their event names
#[cfg(feature = "desktop")]
fn forward_events(app: tauri::AppHandle, coordinator: &DualCameraCoordinator) {
    use tauri::Emitter;
    use tokio::sync::broadcast::error::RecvError;

    let mut rx = coordinator.subscribe();
    tauri::async_runtime::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = app.emit(event.name(), &event) {
                        tracing::warn!("Failed to emit {}: {}", event.name(), e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event forwarder lagged; {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Initialize the application
#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use tauri::Manager;

    init_tracing();
    tracing::info!("Starting DualCam v{}", env!("CARGO_PKG_VERSION"));

    let result = tauri::Builder::default()
        .invoke_handler(tauri::generate_handler![
            // Camera commands
            commands::camera::initialize,
            commands::camera::open_cameras,
            commands::camera::swap_cameras,
            commands::camera::close_cameras,
            commands::camera::dispose,
            commands::camera::take_picture,
            commands::camera::set_layout,
            commands::camera::get_layout_info,
            commands::camera::get_camera_info,
            commands::camera::get_preview_frame,
            // Recording commands
            commands::recording::start_recording,
            commands::recording::stop_recording,
            commands::recording::pause_recording,
            commands::recording::resume_recording,
            commands::recording::get_recording_state,
            commands::recording::get_recording_duration,
            commands::recording::set_quality,
            commands::recording::set_audio_enabled,
            commands::recording::get_quality_info,
            // System commands
            commands::system::get_device_info,
        ])
        .setup(|app| {
            let config = load_config(app)?;
            tracing::info!("Output directory: {:?}", config.output_dir);

            let coordinator = DualCameraCoordinator::with_defaults(config);
            forward_events(app.handle().clone(), &coordinator);
            app.manage(commands::EngineState::new(coordinator));
            Ok(())
        })
        .build(tauri::generate_context!());

    match result {
        Ok(app) => app.run(|handle, event| {
            if let tauri::RunEvent::Exit = event {
                if let Some(state) = handle.try_state::<commands::EngineState>() {
                    if let Err(e) = state.coordinator.dispose() {
                        tracing::error!("Dispose on exit failed: {}", e);
                    }
                }
            }
        }),
        Err(e) => tracing::error!("Error while running tauri application: {}", e),
    }
}
