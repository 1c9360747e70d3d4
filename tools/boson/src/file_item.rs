//! File identity layer.
//!
//! Every file the action graph touches is interned once in a [`FileTable`]
//! and referred to by its [`FileId`]. Identity is the lexically normalised
//! absolute path. Items are never removed from the table; a renamed item
//! supersedes the old one, which keeps its slot but loses its producer.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::action::ActionId;

/// Index of a file in the [`FileTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u32);

impl FileId {
    /// Position in the file table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Filesystem metadata captured the first time a file is queried.
#[derive(Clone, Copy, Debug)]
pub struct FileStat {
    /// Whether the path existed.
    pub exists: bool,
    /// Length in bytes (0 when missing).
    pub len: u64,
    /// Last modification time.
    pub modified: Option<SystemTime>,
    /// Whether the path is a directory.
    pub is_dir: bool,
}

impl FileStat {
    /// Query the filesystem for `path`.
    pub fn query(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(meta) => Self {
                exists: true,
                len: meta.len(),
                modified: meta.modified().ok(),
                is_dir: meta.is_dir(),
            },
            Err(_) => Self {
                exists: false,
                len: 0,
                modified: None,
                is_dir: false,
            },
        }
    }
}

/// A file or directory known to the action graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileItem {
    /// Absolute, normalised path.
    pub path: PathBuf,
    /// Action that produces this file, if any.
    pub producing_action: Option<ActionId>,
    /// Include search paths; present only on include-scannable compile inputs.
    pub cached_include_paths: Option<Vec<PathBuf>>,
    /// Older suffixed copies of this file should be deleted before a hot reload.
    pub needs_hot_reload_cleanup: bool,
    /// File lives on a remote build machine.
    pub is_remote: bool,
    #[serde(skip)]
    stat: OnceLock<FileStat>,
}

impl FileItem {
    /// Create an item for an already-normalised path.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            producing_action: None,
            cached_include_paths: None,
            needs_hot_reload_cleanup: false,
            is_remote: false,
            stat: OnceLock::new(),
        }
    }

    /// Cached filesystem metadata, queried on first use.
    pub fn stat(&self) -> FileStat {
        *self.stat.get_or_init(|| FileStat::query(&self.path))
    }

    /// Whether the file exists on disk.
    pub fn exists(&self) -> bool {
        self.stat().exists
    }

    /// Last modification time, `None` when missing.
    pub fn modified(&self) -> Option<SystemTime> {
        self.stat().modified
    }

    /// Forget cached metadata so the next query hits the filesystem.
    pub fn reset_stat(&mut self) {
        self.stat = OnceLock::new();
    }

    /// File name as a string, empty when the path has none.
    pub fn file_name(&self) -> &str {
        self.path.file_name().and_then(|n| n.to_str()).unwrap_or("")
    }

    /// Lower-cased final extension.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    }
}

/// Interning table of every file referenced by the action graph.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileTable {
    items: Vec<FileItem>,
    #[serde(skip)]
    by_path: HashMap<PathBuf, FileId>,
}

impl FileTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id for `path`, inserting a new item if it is unknown.
    pub fn intern(&mut self, path: impl AsRef<Path>) -> FileId {
        let path = normalize_path(path.as_ref());
        if let Some(&id) = self.by_path.get(&path) {
            return id;
        }
        let id = FileId(u32::try_from(self.items.len()).unwrap_or(u32::MAX));
        self.by_path.insert(path.clone(), id);
        self.items.push(FileItem::new(path));
        id
    }

    /// Look up an existing item by path.
    pub fn find(&self, path: impl AsRef<Path>) -> Option<FileId> {
        self.by_path.get(&normalize_path(path.as_ref())).copied()
    }

    /// Borrow an item.
    ///
    /// # Panics
    /// Panics if `id` is out of range; ids only come from this table or
    /// from a validated plan.
    pub fn get(&self, id: FileId) -> &FileItem {
        &self.items[id.index()]
    }

    /// Mutably borrow an item.
    pub fn get_mut(&mut self, id: FileId) -> &mut FileItem {
        &mut self.items[id.index()]
    }

    /// Whether `id` refers to an item in this table.
    pub fn contains(&self, id: FileId) -> bool {
        id.index() < self.items.len()
    }

    /// Number of interned files.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if no files are interned.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over all items with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (FileId, &FileItem)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (FileId(u32::try_from(i).unwrap_or(u32::MAX)), item))
    }

    /// Replace `old` with an item at `new_path`, carrying over the producer
    /// back reference and auxiliary flags. The old item stays in the table
    /// without a producer.
    pub fn supersede(&mut self, old: FileId, new_path: impl AsRef<Path>) -> FileId {
        let new = self.intern(new_path);
        if new == old {
            return old;
        }
        let source = self.items[old.index()].clone();
        let item = &mut self.items[new.index()];
        item.producing_action = source.producing_action;
        item.cached_include_paths = source.cached_include_paths;
        item.needs_hot_reload_cleanup = source.needs_hot_reload_cleanup;
        item.is_remote = source.is_remote;
        item.reset_stat();
        self.items[old.index()].producing_action = None;
        new
    }

    /// Rebuild the path index after deserialization.
    ///
    /// Returns the first duplicated path, if any.
    pub fn rebuild_index(&mut self) -> Option<PathBuf> {
        self.by_path.clear();
        for (i, item) in self.items.iter().enumerate() {
            let id = FileId(u32::try_from(i).unwrap_or(u32::MAX));
            if self.by_path.insert(item.path.clone(), id).is_some() {
                return Some(item.path.clone());
            }
        }
        None
    }

    /// Forget all cached metadata.
    pub fn reset_stats(&mut self) {
        for item in &mut self.items {
            item.reset_stat();
        }
    }
}

/// Make `path` absolute and resolve `.` and `..` components lexically.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Modification time of `path`, `None` if it does not exist.
pub fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Returns `true` if `candidate` is strictly newer than `reference` by more
/// than `slop`.
pub fn is_newer_than(candidate: SystemTime, reference: SystemTime, slop: Duration) -> bool {
    candidate
        .duration_since(reference)
        .is_ok_and(|delta| delta > slop)
}
