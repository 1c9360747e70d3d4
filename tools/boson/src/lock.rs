//! Single-instance lock.
//!
//! Two invocations building from the same install location would race on
//! the plan, history and dependency caches, so the whole run is bracketed
//! by an exclusive lock on a file named after that location. Platform
//! validation and SDK provisioning use one global lock instead.

use std::fs::{File, TryLockError};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{BuildError, Result};
use crate::file_item::normalize_path;
use crate::verbose::{dprintln, vprintln};

/// Environment variable overriding the directory holding lock files.
pub const LOCK_DIR_ENV: &str = "BOSON_LOCK_DIR";

/// What the lock serialises.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockScope {
    /// Builds from one install location.
    Location(PathBuf),
    /// Every invocation on the machine.
    Global,
}

/// Behaviour when another instance holds the lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Block until it is released.
    Wait,
    /// Return [`BuildError::LockContention`] immediately.
    FailFast,
}

impl LockScope {
    /// Lock file for this scope inside `dir`.
    pub fn lock_path(&self, dir: &Path) -> PathBuf {
        match self {
            Self::Global => dir.join("boson-global.lock"),
            Self::Location(location) => {
                let normalized = normalize_path(location);
                let digest = Sha256::digest(normalized.to_string_lossy().as_bytes());
                let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
                dir.join(format!("boson-{hex}.lock"))
            }
        }
    }
}

/// Directory holding lock files.
pub fn lock_dir() -> PathBuf {
    std::env::var_os(LOCK_DIR_ENV).map_or_else(std::env::temp_dir, PathBuf::from)
}

/// Held exclusive lock; released on drop.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock for `scope` in [`lock_dir`].
    pub fn acquire(scope: &LockScope, mode: LockMode) -> Result<Self> {
        Self::acquire_in(&lock_dir(), scope, mode)
    }

    /// Acquire the lock for `scope` in `dir`.
    pub fn acquire_in(dir: &Path, scope: &LockScope, mode: LockMode) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
        let path = scope.lock_path(dir);
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| BuildError::io(&path, e))?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => match mode {
                LockMode::FailFast => return Err(BuildError::LockContention { path }),
                LockMode::Wait => {
                    dprintln!("  waiting for another instance to finish...");
                    file.lock().map_err(|e| BuildError::io(&path, e))?;
                }
            },
            Err(TryLockError::Error(e)) => return Err(BuildError::io(&path, e)),
        }
        vprintln!("  acquired instance lock {}", path.display());
        Ok(Self { file, path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            vprintln!("  cannot release {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_names_are_stable_per_location() {
        let dir = Path::new("/locks");
        let a = LockScope::Location("/opt/engine".into()).lock_path(dir);
        let b = LockScope::Location("/opt/engine/./".into()).lock_path(dir);
        let c = LockScope::Location("/opt/other".into()).lock_path(dir);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(LockScope::Global.lock_path(dir), dir.join("boson-global.lock"));
    }

    #[test]
    fn second_instance_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let scope = LockScope::Location("/opt/engine".into());
        let held = InstanceLock::acquire_in(dir.path(), &scope, LockMode::FailFast).unwrap();

        let err = InstanceLock::acquire_in(dir.path(), &scope, LockMode::FailFast).unwrap_err();
        assert!(matches!(err, BuildError::LockContention { .. }), "unexpected error: {err}");

        let other = LockScope::Location("/opt/other".into());
        InstanceLock::acquire_in(dir.path(), &other, LockMode::FailFast).unwrap();

        drop(held);
        InstanceLock::acquire_in(dir.path(), &scope, LockMode::FailFast).unwrap();
    }
}
