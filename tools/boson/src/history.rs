//! Action history: the command line that last produced each file.
//!
//! A produced file whose recorded command line differs from the current one
//! is rebuilt even when its timestamps look fresh.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};
use crate::target::TargetKey;
use crate::verbose::vprintln;

/// Current schema version. Bump when the file format changes.
const HISTORY_VERSION: u32 = 1;

/// History filename within a target's intermediate directory.
const HISTORY_FILE: &str = "ActionHistory.json";

/// Persisted per-target record of producing command lines.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ActionHistory {
    version: u32,
    produced: BTreeMap<PathBuf, String>,
    #[serde(skip)]
    path: PathBuf,
    #[serde(skip)]
    dirty: bool,
}

impl ActionHistory {
    /// Location of the history file for a target.
    pub fn path_for(root: &Path, key: &TargetKey) -> PathBuf {
        key.intermediate_dir(root).join(HISTORY_FILE)
    }

    /// Load the history at `path`, starting empty if it is missing, corrupt
    /// or from another schema version.
    pub fn load(path: &Path) -> Self {
        let loaded = std::fs::read_to_string(path)
            .ok()
            .and_then(|data| match serde_json::from_str::<Self>(&data) {
                Ok(history) if history.version == HISTORY_VERSION => Some(history),
                Ok(_) => {
                    vprintln!("  action history: version mismatch in {}", path.display());
                    None
                }
                Err(e) => {
                    vprintln!("  action history: {} is corrupt: {e}", path.display());
                    None
                }
            });
        let mut history = loaded.unwrap_or_else(|| Self {
            version: HISTORY_VERSION,
            ..Self::default()
        });
        history.path = path.to_path_buf();
        history
    }

    /// Record `command_line` as the producer of `produced`.
    ///
    /// Returns `true` if it differs from the recorded one, including when
    /// nothing was recorded yet.
    pub fn update(&mut self, produced: &Path, command_line: &str) -> bool {
        if self.produced.get(produced).is_some_and(|old| old == command_line) {
            return false;
        }
        self.produced.insert(produced.to_path_buf(), command_line.to_string());
        self.dirty = true;
        true
    }

    /// Write the history atomically if it changed.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let dir = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;

        let tmp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| BuildError::serialization("action history", e))?;
        std::fs::write(&tmp_path, json).map_err(|e| BuildError::io(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| BuildError::io(&self.path, e))?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_reports_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = ActionHistory::load(&dir.path().join(HISTORY_FILE));
        assert!(history.update(Path::new("/obj/a.o"), "cc -c a.c"));
        assert!(!history.update(Path::new("/obj/a.o"), "cc -c a.c"));
        assert!(history.update(Path::new("/obj/a.o"), "cc -O2 -c a.c"));
    }

    #[test]
    fn survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(HISTORY_FILE);
        let mut history = ActionHistory::load(&path);
        history.update(Path::new("/obj/a.o"), "cc -c a.c");
        history.save().unwrap();

        let mut reloaded = ActionHistory::load(&path);
        assert!(!reloaded.update(Path::new("/obj/a.o"), "cc -c a.c"));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(HISTORY_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        let mut history = ActionHistory::load(&path);
        assert!(history.update(Path::new("/obj/a.o"), "cc"));
    }
}
