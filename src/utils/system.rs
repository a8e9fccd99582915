//! Host information

/// Operating system version, or "Unknown"
pub fn os_version() -> String {
    #[cfg(target_os = "macos")]
    let output = std::process::Command::new("sw_vers")
        .arg("-productVersion")
        .output();

    #[cfg(target_os = "windows")]
    let output = std::process::Command::new("cmd").args(["/C", "ver"]).output();

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let output = std::process::Command::new("uname").arg("-r").output();

    output
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}
