//! Configuration paths
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/backup-scenarios/`
//! - macOS: `~/Library/Application Support/backup-scenarios/`
//! - Windows: `%APPDATA%\backup-scenarios\`

use std::path::PathBuf;

/// Application name used for platform directories
const APP_NAME: &str = "backup-scenarios";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Base directory that relative harness paths are resolved against
///
/// The current working directory, falling back to `.` when it cannot be read.
pub fn default_base_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_ends_with_toml() {
        if let Some(path) = config_path() {
            assert_eq!(path.file_name().unwrap(), "config.toml");
        }
    }

    #[test]
    fn test_default_base_dir_is_not_empty() {
        assert!(!default_base_dir().as_os_str().is_empty());
    }
}
