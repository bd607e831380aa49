use crate::core::session::Options;
use crate::core::types::TransactionFlags;
use crate::utils::get_data_dir;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI configuration: how sessions are opened and where engine state lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default = "default_session_name")]
    pub session_name: String,
    #[serde(default)]
    pub session_description: String,
    /// Open dynamic sessions unless a command says otherwise
    #[serde(default)]
    pub dynamic: bool,
    /// How long to wait for the engine's transaction lock (0 = library default)
    ///
    /// Clamped to 3600 seconds (1 hour) when the session is opened.
    #[serde(default = "default_transaction_start_timeout")]
    pub transaction_start_timeout_secs: u64,
    /// Engine state file; `None` uses the platform state directory
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            session_name: default_session_name(),
            session_description: String::new(),
            dynamic: false,
            transaction_start_timeout_secs: default_transaction_start_timeout(),
            state_path: None,
        }
    }
}

/// Settings changed by `wfkit config`; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub session_name: Option<String>,
    pub session_description: Option<String>,
    pub dynamic: Option<bool>,
    pub transaction_start_timeout_secs: Option<u64>,
    pub state_path: Option<PathBuf>,
}

fn default_session_name() -> String {
    "wfkit".to_string()
}

fn default_transaction_start_timeout() -> u64 {
    30
}

impl CliConfig {
    /// Applies an update. Returns whether any setting changed.
    pub fn apply(&mut self, update: ConfigUpdate) -> bool {
        let before = self.clone();
        if let Some(name) = update.session_name {
            self.session_name = name;
        }
        if let Some(description) = update.session_description {
            self.session_description = description;
        }
        if let Some(dynamic) = update.dynamic {
            self.dynamic = dynamic;
        }
        if let Some(secs) = update.transaction_start_timeout_secs {
            self.transaction_start_timeout_secs = secs;
        }
        if let Some(path) = update.state_path {
            self.state_path = Some(path);
        }
        *self != before
    }

    /// Session options for one CLI run. Every run works inside a transaction.
    pub fn session_options(&self, dynamic: bool, flags: TransactionFlags) -> Options {
        Options {
            name: self.session_name.clone(),
            description: self.session_description.clone(),
            dynamic: dynamic || self.dynamic,
            start_transaction: true,
            transaction_flags: flags,
            transaction_start_timeout: Duration::from_secs(self.transaction_start_timeout_secs),
        }
    }
}

/// Location of `config.json` in the platform data directory.
pub fn config_path() -> Option<PathBuf> {
    get_data_dir().map(|dir| dir.join("config.json"))
}

/// Saves the config to disk using an atomic write pattern.
/// 1. Writes to a temporary file in the target directory (created 0o600 on Unix).
/// 2. Flushes it to physical media.
/// 3. Atomically renames it over the target path.
pub fn save_config_to(path: &Path, config: &CliConfig) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(config)?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(json.as_bytes())?;
    temp.as_file().sync_all()?;

    // Atomic rename
    temp.persist(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            )
        } else {
            e.error
        }
    })?;
    Ok(())
}

/// Saves the config to the platform data directory.
pub fn save_config(config: &CliConfig) -> std::io::Result<()> {
    let path = config_path().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "Data directory not found")
    })?;
    save_config_to(&path, config)
}

/// Loads a config file, or returns default if it is missing or unreadable.
pub fn load_config_from(path: &Path) -> CliConfig {
    match std::fs::read_to_string(path) {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "ignoring invalid config: {e}");
            CliConfig::default()
        }),
        Err(_) => CliConfig::default(),
    }
}

/// Loads the config from the platform data directory, or returns default if not found.
pub fn load_config() -> CliConfig {
    config_path().map_or_else(CliConfig::default, |path| load_config_from(&path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: CliConfig = serde_json::from_str(r#"{"dynamic": true}"#).unwrap();
        assert!(config.dynamic);
        assert_eq!(config.session_name, "wfkit");
        assert_eq!(config.transaction_start_timeout_secs, 30);
        assert_eq!(config.state_path, None);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = CliConfig {
            session_name: "ops".to_string(),
            transaction_start_timeout_secs: 5,
            state_path: Some(dir.path().join("engine.json")),
            ..CliConfig::default()
        };
        save_config_to(&path, &config).unwrap();
        assert_eq!(load_config_from(&path), config);
    }

    #[test]
    fn test_invalid_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_config_from(&path), CliConfig::default());
        assert_eq!(
            load_config_from(&dir.path().join("absent.json")),
            CliConfig::default()
        );
    }

    #[test]
    fn test_apply_update() {
        let mut config = CliConfig::default();
        assert!(!config.apply(ConfigUpdate::default()));
        assert!(!config.apply(ConfigUpdate {
            session_name: Some("wfkit".to_string()),
            ..ConfigUpdate::default()
        }));

        assert!(config.apply(ConfigUpdate {
            dynamic: Some(true),
            transaction_start_timeout_secs: Some(90),
            ..ConfigUpdate::default()
        }));
        assert!(config.dynamic);
        assert_eq!(config.transaction_start_timeout_secs, 90);
        assert_eq!(config.session_name, "wfkit");
    }

    #[test]
    fn test_session_options() {
        let config = CliConfig::default();
        let options = config.session_options(true, TransactionFlags::ReadOnly);
        assert!(options.dynamic);
        assert!(options.start_transaction);
        assert_eq!(options.transaction_flags, TransactionFlags::ReadOnly);
        assert_eq!(options.transaction_start_timeout, Duration::from_secs(30));
        assert!(!config.session_options(false, TransactionFlags::ReadWrite).dynamic);
    }
}
