//! Dependency cache: per-target record of which files each source includes.
//!
//! Direct includes are scanned from `#include` lines and cached together
//! with the source's mtime at scan time; the flattened transitive set is
//! cached on top and trusted only while every file in it is unchanged.
//! The cache is independent of the build plan cache and survives its
//! invalidation.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};
use crate::file_item::{file_mtime, normalize_path};
use crate::target::TargetKey;
use crate::verbose::vprintln;

/// Current schema version. Bump when the file format changes.
const DEPENDENCY_CACHE_VERSION: u32 = 1;

/// Cache filename within a target's intermediate directory.
const DEPENDENCY_CACHE_FILE: &str = "DependencyCache.bin";

/// Include information for one file.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct IncludeEntry {
    /// Mtime of the file when `direct` was scanned.
    scanned_mtime: Option<SystemTime>,
    /// Resolved `#include` targets, in source order.
    direct: Vec<PathBuf>,
    /// Transitive closure of `direct`, if computed.
    flattened: Option<Vec<PathBuf>>,
}

/// Persisted include information for one target.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DependencyCache {
    version: u32,
    entries: BTreeMap<PathBuf, IncludeEntry>,
    #[serde(skip)]
    path: PathBuf,
    #[serde(skip)]
    dirty: bool,
    #[serde(skip)]
    on_disk: bool,
}

impl DependencyCache {
    /// Location of the cache file for a target.
    pub fn path_for(root: &Path, key: &TargetKey) -> PathBuf {
        key.intermediate_dir(root).join(DEPENDENCY_CACHE_FILE)
    }

    /// Load the cache at `path`, starting empty if it is missing or unusable.
    pub fn load(path: &Path) -> Self {
        let loaded = std::fs::read(path).ok().and_then(|bytes| {
            match bincode::serde::decode_from_slice::<Self, _>(&bytes, bincode::config::standard()) {
                Ok((cache, _)) if cache.version == DEPENDENCY_CACHE_VERSION => Some(cache),
                Ok(_) => {
                    vprintln!("  dependency cache: version mismatch in {}", path.display());
                    None
                }
                Err(e) => {
                    vprintln!("  dependency cache: {} is corrupt: {e}", path.display());
                    None
                }
            }
        });
        let on_disk = loaded.is_some();
        let mut cache = loaded.unwrap_or_else(|| Self {
            version: DEPENDENCY_CACHE_VERSION,
            ..Self::default()
        });
        cache.path = path.to_path_buf();
        cache.on_disk = on_disk;
        cache
    }

    /// Whether the cache was read from disk rather than started empty.
    pub fn was_loaded(&self) -> bool {
        self.on_disk
    }

    /// Drop every flattened include set so the next query rescans.
    pub fn clear_flattened(&mut self) {
        for entry in self.entries.values_mut() {
            if entry.flattened.take().is_some() {
                self.dirty = true;
            }
        }
    }

    /// Direct includes of `source`, rescanning if it changed since last time.
    pub fn direct_includes(&mut self, source: &Path, search_paths: &[PathBuf]) -> Vec<PathBuf> {
        let mtime = file_mtime(source);
        if let Some(entry) = self.entries.get(source) {
            if mtime.is_some() && entry.scanned_mtime == mtime {
                return entry.direct.clone();
            }
        }
        let Some(mtime) = mtime else {
            if self.entries.remove(source).is_some() {
                self.dirty = true;
            }
            return Vec::new();
        };

        let direct = match std::fs::read_to_string(source) {
            Ok(text) => scan_includes(&text, source, search_paths),
            Err(e) => {
                vprintln!("  dependency cache: cannot read {}: {e}", source.display());
                Vec::new()
            }
        };
        self.entries.insert(
            source.to_path_buf(),
            IncludeEntry {
                scanned_mtime: Some(mtime),
                direct: direct.clone(),
                flattened: None,
            },
        );
        self.dirty = true;
        direct
    }

    /// Every file `source` includes, directly or transitively.
    ///
    /// With `only_cached`, never touches the filesystem beyond what is
    /// already recorded and returns an empty list for unknown sources.
    pub fn find_and_cache_all_included_files(
        &mut self,
        source: &Path,
        search_paths: &[PathBuf],
        only_cached: bool,
    ) -> Vec<PathBuf> {
        if only_cached {
            return self
                .entries
                .get(source)
                .and_then(|e| e.flattened.clone())
                .unwrap_or_default();
        }
        if let Some(flattened) = self.fresh_flattened(source) {
            return flattened;
        }

        let mut seen: HashSet<PathBuf> = HashSet::new();
        seen.insert(source.to_path_buf());
        let mut stack = vec![source.to_path_buf()];
        let mut all = Vec::new();
        while let Some(file) = stack.pop() {
            for include in self.direct_includes(&file, search_paths) {
                if seen.insert(include.clone()) {
                    all.push(include.clone());
                    stack.push(include);
                }
            }
        }

        if let Some(entry) = self.entries.get_mut(source) {
            entry.flattened = Some(all.clone());
            self.dirty = true;
        }
        all
    }

    /// The flattened set of `source`, if it and every member are unchanged.
    fn fresh_flattened(&self, source: &Path) -> Option<Vec<PathBuf>> {
        let entry = self.entries.get(source)?;
        let flattened = entry.flattened.as_ref()?;
        let unchanged = |path: &Path| {
            self.entries
                .get(path)
                .is_some_and(|e| e.scanned_mtime.is_some() && e.scanned_mtime == file_mtime(path))
        };
        if unchanged(source) && flattened.iter().all(|p| unchanged(p)) {
            Some(flattened.clone())
        } else {
            None
        }
    }

    /// Write the cache atomically if it changed.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let dir = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;

        let bytes = bincode::serde::encode_to_vec(&*self, bincode::config::standard())
            .map_err(|e| BuildError::serialization("dependency cache", e))?;
        let tmp_path = self.path.with_extension("bin.tmp");
        std::fs::write(&tmp_path, bytes).map_err(|e| BuildError::io(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| BuildError::io(&self.path, e))?;
        self.dirty = false;
        self.on_disk = true;
        vprintln!("  dependency cache: saved {} entries to {}", self.entries.len(), self.path.display());
        Ok(())
    }
}

/// Resolve the `#include` lines of `text`.
///
/// Quoted includes are looked up next to `source` first; unresolved
/// includes (system headers) are dropped.
fn scan_includes(text: &str, source: &Path, search_paths: &[PathBuf]) -> Vec<PathBuf> {
    let local_dir = source.parent().unwrap_or(Path::new("/"));
    let mut out = Vec::new();
    for line in text.lines() {
        let Some(rest) = line.trim_start().strip_prefix('#') else {
            continue;
        };
        let Some(rest) = rest.trim_start().strip_prefix("include") else {
            continue;
        };
        let rest = rest.trim_start();
        let (name, quoted) = if let Some(r) = rest.strip_prefix('"') {
            (r.split('"').next().unwrap_or(""), true)
        } else if let Some(r) = rest.strip_prefix('<') {
            (r.split('>').next().unwrap_or(""), false)
        } else {
            continue;
        };
        if name.is_empty() {
            continue;
        }

        let local = quoted.then(|| local_dir.join(name));
        let resolved = local
            .into_iter()
            .chain(search_paths.iter().map(|dir| dir.join(name)))
            .find(|candidate| candidate.is_file());
        if let Some(path) = resolved {
            let path = normalize_path(&path);
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    out
}
