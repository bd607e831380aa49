//! Utility functions for directory management
//!
//! This module provides helper functions for the platform's standard
//! configuration and data locations.
//!
//! # Directory Structure
//!
//! - Data: `~/.local/share/wfkit/` - Configuration (`config.json`)
//! - State: `~/.local/state/wfkit/` - Engine state file and audit log
//!
//! # Example
//!
//! ```no_run
//! use wfkit::utils::{get_state_dir, ensure_dirs};
//!
//! // Ensure directories exist before use
//! ensure_dirs().expect("Failed to create directories");
//!
//! if let Some(state_path) = get_state_dir() {
//!     // Load the engine state from state_path
//! }
//! ```

use directories::ProjectDirs;
use std::path::PathBuf;

pub fn get_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "wfkit", "wfkit").map(|pd| pd.data_dir().to_path_buf())
}

/// Falls back to the data directory on platforms without a state directory.
pub fn get_state_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "wfkit", "wfkit").map(|pd| {
        pd.state_dir()
            .unwrap_or_else(|| pd.data_dir())
            .to_path_buf()
    })
}

/// Default location of the engine state file.
pub fn default_state_path() -> Option<PathBuf> {
    get_state_dir().map(|dir| dir.join("engine.json"))
}

pub fn ensure_dirs() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        let mut builder = DirBuilder::new();
        builder.mode(0o700); // User read/write/execute only
        builder.recursive(true);

        if let Some(dir) = get_data_dir() {
            builder.create(dir)?;
        }
        if let Some(dir) = get_state_dir() {
            builder.create(dir)?;
        }
    }

    #[cfg(not(unix))]
    {
        if let Some(dir) = get_data_dir() {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(dir) = get_state_dir() {
            std::fs::create_dir_all(dir)?;
        }
    }

    Ok(())
}

/// Truncates a string to a maximum length and adds an ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        // Find the nearest character boundary to avoid splitting multi-byte characters
        let end = s
            .char_indices()
            .map(|(idx, _)| idx)
            .take_while(|&idx| idx <= max_len.saturating_sub(3))
            .last()
            .unwrap_or(0);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("a long rule name", 10), "a long ...");
        // Never splits a multi-byte character
        assert_eq!(truncate_string("ééééé", 6), "é...");
    }

    #[test]
    fn test_state_path_is_under_state_dir() {
        if let (Some(dir), Some(path)) = (get_state_dir(), default_state_path()) {
            assert!(path.starts_with(dir));
            assert!(path.ends_with("engine.json"));
        }
    }
}
