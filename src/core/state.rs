//! Persistent engine state
//!
//! The in-process engine keeps persistent objects across processes by
//! exporting them as an [`EngineSnapshot`] and writing it to a state file.
//! The file carries a format version and a SHA-256 checksum of the snapshot;
//! a file that fails either check is refused rather than partially loaded.
//!
//! Writes go to a temporary file in the same directory which is then renamed
//! over the target, so a crash never leaves a half-written state file.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::core::error::{Result, StateError};
use crate::core::types::{Provider, Rule, Sublayer};

pub const STATE_VERSION: u32 = 1;

/// Persistent providers, sublayers and rules, in dependency order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub sublayers: Vec<Sublayer>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl EngineSnapshot {
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty() && self.sublayers.is_empty() && self.rules.is_empty()
    }
}

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u32,
    checksum: String,
    snapshot: EngineSnapshot,
}

/// SHA-256 of the snapshot's compact JSON form, hex encoded.
pub fn compute_checksum(snapshot: &EngineSnapshot) -> Result<String> {
    let json = serde_json::to_vec(snapshot)?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Loads a state file. A missing file is an empty snapshot.
pub fn load(path: &Path) -> Result<EngineSnapshot> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no state file, starting empty");
            return Ok(EngineSnapshot::default());
        }
        Err(e) => return Err(e.into()),
    };

    let file: StateFile = serde_json::from_str(&json).map_err(|_| StateError::Corrupted)?;
    if file.version != STATE_VERSION {
        return Err(StateError::VersionMismatch {
            found: file.version,
            expected: STATE_VERSION,
        }
        .into());
    }
    let actual = compute_checksum(&file.snapshot)?;
    if actual != file.checksum {
        return Err(StateError::ChecksumMismatch {
            expected: file.checksum,
            actual,
        }
        .into());
    }

    debug!(
        path = %path.display(),
        providers = file.snapshot.providers.len(),
        sublayers = file.snapshot.sublayers.len(),
        rules = file.snapshot.rules.len(),
        "state loaded"
    );
    Ok(file.snapshot)
}

/// Writes a state file atomically.
pub fn save(path: &Path, snapshot: &EngineSnapshot) -> Result<()> {
    let file = StateFile {
        version: STATE_VERSION,
        checksum: compute_checksum(snapshot)?,
        snapshot: snapshot.clone(),
    };
    let json = serde_json::to_string_pretty(&file)?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    // NamedTempFile is created 0o600 on Unix.
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(json.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    info!(path = %path.display(), "state saved");
    Ok(())
}
