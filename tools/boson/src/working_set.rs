//! Source working set: files the developer is actively editing.
//!
//! Adaptive unity batching compiles working-set files on their own, so a
//! file moving into or out of the set changes the action graph.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::WorkingSetKind;
use crate::file_item::normalize_path;
use crate::verbose::vprintln;

/// Membership test for the current working set.
pub trait WorkingSet: Send + Sync {
    /// Returns `true` if `path` is currently being edited.
    fn contains(&self, path: &Path) -> bool;
}

/// A working set with nothing in it.
pub struct EmptyWorkingSet;

impl WorkingSet for EmptyWorkingSet {
    fn contains(&self, _path: &Path) -> bool {
        false
    }
}

/// A fixed list of files.
#[derive(Debug, Default)]
pub struct ListedWorkingSet {
    files: BTreeSet<PathBuf>,
}

impl ListedWorkingSet {
    /// Build a set from paths, normalising each.
    pub fn new<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            files: files.into_iter().map(|p| normalize_path(p.as_ref())).collect(),
        }
    }
}

impl WorkingSet for ListedWorkingSet {
    fn contains(&self, path: &Path) -> bool {
        self.files.contains(path)
    }
}

/// Files `git status` reports as modified, added or untracked under `root`.
///
/// Falls back to an empty set when `root` is not a git checkout.
pub fn git_working_set(root: &Path) -> ListedWorkingSet {
    let output = Command::new("git")
        .args(["status", "--porcelain", "--untracked-files=all"])
        .current_dir(root)
        .output();
    let output = match output {
        Ok(o) if o.status.success() => o,
        Ok(o) => {
            vprintln!(
                "  working set: git status failed: {}",
                String::from_utf8_lossy(&o.stderr).trim()
            );
            return ListedWorkingSet::default();
        }
        Err(e) => {
            vprintln!("  working set: cannot run git: {e}");
            return ListedWorkingSet::default();
        }
    };

    let text = String::from_utf8_lossy(&output.stdout);
    let files: Vec<PathBuf> = text
        .lines()
        .filter_map(parse_status_line)
        .map(|rel| root.join(rel))
        .collect();
    vprintln!("  working set: {} files from git", files.len());
    ListedWorkingSet::new(files)
}

/// Path column of one `git status --porcelain` line (destination of renames).
fn parse_status_line(line: &str) -> Option<&str> {
    let path = line.get(3..)?;
    let path = path.rsplit(" -> ").next().unwrap_or(path);
    let path = path.trim_matches('"');
    (!path.is_empty()).then_some(path)
}

/// Create the working set selected by configuration.
pub fn from_kind(kind: WorkingSetKind, root: &Path) -> Box<dyn WorkingSet> {
    match kind {
        WorkingSetKind::None => Box::new(EmptyWorkingSet),
        WorkingSetKind::Git => Box::new(git_working_set(root)),
    }
}
