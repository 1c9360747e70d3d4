//! Error types for the build core.
//!
//! A stale build plan cache is not an error: it is reported as
//! [`LoadResult::Invalid`](crate::plan_cache::LoadResult) and triggers a
//! gather. Everything here aborts the invocation.

use std::path::{Path, PathBuf};

/// Convenience alias used throughout the crate.
pub type Result<T, E = BuildError> = std::result::Result<T, E>;

/// Fatal errors raised by the build core.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The action graph violates a structural invariant (bad index, missing
    /// response file reference, inconsistent producer links).
    #[error("malformed action graph: {reason}")]
    GraphMalformed {
        /// Description of the structural problem.
        reason: String,
    },

    /// Prerequisite edges form a cycle.
    #[error("action graph cycle detected:\n{description}")]
    Cycle {
        /// Human-readable listing of the actions involved.
        description: String,
    },

    /// Two actions claim to produce the same file.
    #[error("{path} is produced by both '{first}' and '{second}'")]
    DuplicateProducer {
        /// The contested file.
        path: PathBuf,
        /// Status description of the first producer.
        first: String,
        /// Status description of the second producer.
        second: String,
    },

    /// The instance lock is held by another invocation and the caller asked
    /// not to wait.
    #[error("another build is already running (lock file {path})")]
    LockContention {
        /// Path of the lock file.
        path: PathBuf,
    },

    /// An I/O error occurred while reading or writing a file.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A cache or manifest could not be encoded or decoded.
    #[error("serialization error in {what}: {reason}")]
    Serialization {
        /// What was being (de)serialized.
        what: String,
        /// Description of the failure.
        reason: String,
    },

    /// A configuration file is invalid.
    #[error("invalid configuration in {path}: {reason}")]
    Config {
        /// The offending configuration file.
        path: PathBuf,
        /// Description of the problem.
        reason: String,
    },

    /// Target discovery failed.
    #[error("failed to gather target '{target}': {reason}")]
    Gather {
        /// The target being gathered.
        target: String,
        /// Description of the failure.
        reason: String,
    },

    /// Neither gathering nor assembling was requested.
    #[error("at least one of gathering or assembling must be enabled")]
    NoPhases,
}

impl BuildError {
    /// Wrap an I/O error with the path it occurred at.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Shorthand for [`BuildError::GraphMalformed`].
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::GraphMalformed {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`BuildError::Serialization`].
    pub fn serialization(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Serialization {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = BuildError::io(
            "/tmp/Intermediate/BuildPlan.bin",
            std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        );
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(msg.contains("BuildPlan.bin"));
    }

    #[test]
    fn duplicate_producer_display() {
        let err = BuildError::DuplicateProducer {
            path: PathBuf::from("/out/Core.o"),
            first: "Core.c".into(),
            second: "Core2.c".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Core.o"));
        assert!(msg.contains("Core.c"));
        assert!(msg.contains("Core2.c"));
    }

    #[test]
    fn malformed_display() {
        let err = BuildError::malformed("prerequisite index 7 out of range");
        assert!(err.to_string().contains("index 7 out of range"));
    }

    #[test]
    fn lock_contention_display() {
        let err = BuildError::LockContention {
            path: PathBuf::from("/tmp/boson-global.lock"),
        };
        assert!(err.to_string().contains("already running"));
    }
}
