//! Incremental build core.
//!
//! Decides which build actions must run for a set of requested targets,
//! runs them through a pluggable executor, and persists a build plan so a
//! later invocation can skip graph discovery entirely.
//!
//! Pipeline: acquire instance lock → load or gather the build plan →
//!           patch for hot reload → plan outdated actions → execute →
//!           persist caches → release lock.

pub mod action;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod dep_cache;
pub mod error;
pub mod executor;
pub mod file_item;
pub mod gather;
pub mod graph;
pub mod history;
pub mod hot_reload;
pub mod lock;
pub mod outdated;
pub mod plan_cache;
pub mod reflection;
pub mod target;
pub mod verbose;
pub mod working_set;

pub use coordinator::{BuildOutcome, BuildRequest, Coordinator};
pub use error::{BuildError, Result};
