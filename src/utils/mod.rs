pub mod error;
pub mod paths;
pub mod system;
pub mod thread;

pub use error::{AppError, AppResult, CommandResponse, ErrorResponse};
pub use paths::{artifact_name, artifact_path};
pub use thread::join_within;
