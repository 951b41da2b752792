/// Platform-specific path computation and repository path helpers
use std::path::{Path, PathBuf};

/// Platform-agnostic path utilities
pub struct PlatformPaths;

impl PlatformPaths {
    /// Get the appropriate config directory for the current platform
    ///
    /// - Windows: %APPDATA%
    /// - macOS: ~/Library/Application Support
    /// - Linux/Unix: $XDG_CONFIG_HOME or ~/.config
    pub fn config_dir() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Get the project-specific config directory
    pub fn project_config_dir() -> PathBuf {
        Self::config_dir().join("project-metrics")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::project_config_dir().join("config.toml")
    }
}

/// Project name used in exported records: the repository directory's base name
///
/// Trailing separators and `.` components are resolved first so `repo/` and
/// `repo/.` both yield `repo`.
pub fn project_name(repository: &Path) -> String {
    let resolved = std::fs::canonicalize(repository).unwrap_or_else(|_| repository.to_path_buf());
    resolved
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| resolved.display().to_string())
}
