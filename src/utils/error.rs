//! Error types and handling
//!
//! Common error types used across the capture core, plus the structured
//! response shape every command returns to the application layer.

use crate::capture::{CaptureError, DeviceRole};
use crate::compose::ConvertError;
use crate::encode::EncodeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Failed to open {role} camera: {reason}")]
    DeviceOpen { role: DeviceRole, reason: String },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Stable machine-readable code for the frontend
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Initialization(_) => "INITIALIZATION_ERROR",
            AppError::CameraUnavailable(_) => "CAMERA_UNAVAILABLE",
            AppError::DeviceOpen { .. } => "DEVICE_OPEN_ERROR",
            AppError::Encoding(_) => "ENCODING_ERROR",
            AppError::CaptureFailed(_) => "CAPTURE_FAILED",
            AppError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<EncodeError> for AppError {
    fn from(error: EncodeError) -> Self {
        match error {
            EncodeError::Io(e) => AppError::Io(e),
            other => AppError::Encoding(other.to_string()),
        }
    }
}

impl From<CaptureError> for AppError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::PermissionDenied(msg) => AppError::Initialization(msg),
            CaptureError::DeviceNotFound(msg) => AppError::CameraUnavailable(msg),
            other => AppError::CaptureFailed(other.to_string()),
        }
    }
}

impl From<ConvertError> for AppError {
    fn from(error: ConvertError) -> Self {
        AppError::CaptureFailed(error.to_string())
    }
}

/// Error response for frontend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Structured command result: `success=false` always carries an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> CommandResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<ErrorResponse>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

impl<T> From<AppResult<T>> for CommandResponse<T> {
    fn from(result: AppResult<T>) -> Self {
        match result {
            Ok(data) => CommandResponse::ok(data),
            Err(e) => {
                tracing::warn!("Command failed: {}", e);
                CommandResponse::failure(e)
            }
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
