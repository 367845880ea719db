//! # Project Paths
//!
//! Centralized definitions for where the assistant keeps its files inside a project.

use std::path::{Path, PathBuf};

pub const DATA_DIR: &str = ".devpilot";
pub const CONFIG_FILE: &str = "config.yaml";
pub const SESSION_LOG: &str = "session.log";
pub const METADATA_FILE: &str = "project_metadata.json";

/// Directory for the assistant's own files (logs, local config).
pub fn data_dir(root: &Path) -> PathBuf {
    root.join(DATA_DIR)
}

/// Project-local configuration file.
pub fn project_config_path(root: &Path) -> PathBuf {
    data_dir(root).join(CONFIG_FILE)
}

/// User-wide configuration file, if the platform has a config directory.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("devpilot").join(CONFIG_FILE))
}

/// Returns `path` relative to `root` with forward slashes, or the path unchanged
/// if it is not under `root`.
pub fn relative_to(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_to() {
        let root = Path::new("/home/me/app");
        assert_eq!(relative_to(root, Path::new("/home/me/app/src/index.js")), "src/index.js");
        assert_eq!(relative_to(root, Path::new("/etc/hosts")), "/etc/hosts");
    }
}
