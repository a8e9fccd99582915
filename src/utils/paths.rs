//! Output artifact naming

use super::error::AppResult;
use chrono::{DateTime, Local, TimeZone};
use std::path::{Path, PathBuf};

const ARTIFACT_PREFIX: &str = "DualCam";

/// `DualCam_<YYYYMMDD_HHMMSS_mmm>.<extension>`
pub fn artifact_name<Tz: TimeZone>(at: &DateTime<Tz>, extension: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}_{}.{}",
        ARTIFACT_PREFIX,
        at.format("%Y%m%d_%H%M%S_%3f"),
        extension
    )
}

/// A fresh artifact path in `dir`, creating the directory if needed
pub fn artifact_path(dir: &Path, extension: &str) -> AppResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    Ok(dir.join(artifact_name(&Local::now(), extension)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_artifact_name_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + chrono::Duration::milliseconds(42);
        assert_eq!(artifact_name(&at, "mp4"), "DualCam_20240309_140507_042.mp4");
    }

    #[test]
    fn test_artifact_path_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("out");
        let path = artifact_path(&nested, "png").unwrap();
        assert!(nested.is_dir());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("DualCam_")));
    }
}
