//! Executor strategies for running outdated actions.
//!
//! An executor receives the topologically ordered action list and reports
//! one outcome per action. [`LocalExecutor`] runs actions on worker
//! threads; [`ExportExecutor`] writes them out for an external build
//! system and runs nothing itself.

mod export;
mod local;

pub use export::ExportExecutor;
pub use local::LocalExecutor;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::action::{ActionId, ActionKind};
use crate::config::{BuildConfiguration, ExecutorKind};
use crate::error::Result;
use crate::graph::ActionGraph;
use crate::hot_reload::failed_marker_for;
use crate::verbose::vprintln;

/// Cooperative stop signal shared between the coordinator and workers.
///
/// Once cancelled, no further actions are dispatched; actions already
/// running are allowed to finish.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that no further actions start.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to one action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The command exited successfully.
    Succeeded,
    /// The command failed or could not be started.
    Failed {
        /// Process exit code, `None` if it never ran or was killed.
        exit_code: Option<i32>,
        /// Captured stdout and stderr.
        output: String,
    },
    /// Not started because an earlier action failed.
    Skipped,
    /// Handed to an external system.
    Deferred,
}

/// Per-action outcomes in dispatch order.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Outcome of every action passed to the executor.
    pub outcomes: Vec<(ActionId, ActionOutcome)>,
}

impl ExecutionReport {
    /// `true` if no action failed or was skipped.
    pub fn success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, o)| matches!(o, ActionOutcome::Succeeded | ActionOutcome::Deferred))
    }

    /// Outcome recorded for `id`.
    pub fn outcome(&self, id: ActionId) -> Option<&ActionOutcome> {
        self.outcomes.iter().find(|(a, _)| *a == id).map(|(_, o)| o)
    }

    /// Number of actions that failed.
    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ActionOutcome::Failed { .. }))
            .count()
    }
}

/// A strategy for running actions.
pub trait Executor: Send + Sync {
    /// Short name for log output.
    fn name(&self) -> &'static str;

    /// Run `actions` (already topologically ordered) with `environment`.
    fn execute(
        &self,
        graph: &ActionGraph,
        actions: &[ActionId],
        environment: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport>;
}

/// Executor selected by configuration; `jobs` overrides the worker count.
pub fn from_config(config: &BuildConfiguration, jobs: Option<usize>) -> Box<dyn Executor> {
    match (config.executor, &config.export_path) {
        (ExecutorKind::Export, Some(path)) => Box::new(ExportExecutor::new(path.clone())),
        _ => Box::new(LocalExecutor::new(jobs.unwrap_or(config.max_workers))),
    }
}

/// Check that every executed link action left its primary output on disk.
///
/// Metadata is queried fresh, not from the graph's cached stats. During a
/// hot reload the `failed.hotreload` marker beside each link output is
/// created on failure and removed on success.
pub fn verify_link_outputs(
    graph: &ActionGraph,
    report: &ExecutionReport,
    hot_reload: bool,
) -> bool {
    let mut ok = true;
    for (id, outcome) in &report.outcomes {
        let action = graph.action(*id);
        if action.kind != ActionKind::Link || matches!(outcome, ActionOutcome::Deferred) {
            continue;
        }
        let Some(output) = action.primary_output() else {
            continue;
        };
        let path = &graph.file(output).path;
        let linked = matches!(outcome, ActionOutcome::Succeeded)
            && std::fs::metadata(path).is_ok_and(|m| m.is_file() || m.is_dir());
        if matches!(outcome, ActionOutcome::Succeeded) && !linked {
            eprintln!("error: {} reported success but {} is missing", action.status_description, path.display());
        }
        if matches!(outcome, ActionOutcome::Succeeded | ActionOutcome::Failed { .. }) {
            ok &= linked;
        }

        if hot_reload && !matches!(outcome, ActionOutcome::Skipped) {
            let marker = failed_marker_for(path);
            let result = if linked {
                match std::fs::remove_file(&marker) {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    other => other,
                }
            } else {
                std::fs::write(&marker, "")
            };
            if let Err(e) = result {
                vprintln!("  cannot update {}: {e}", marker.display());
            }
        }
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::graph_of;

    #[test]
    fn cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn report_success() {
        let mut report = ExecutionReport::default();
        report.outcomes.push((ActionId(0), ActionOutcome::Succeeded));
        report.outcomes.push((ActionId(1), ActionOutcome::Deferred));
        assert!(report.success());
        report.outcomes.push((ActionId(2), ActionOutcome::Skipped));
        assert!(!report.success());
        assert_eq!(report.failed_count(), 0);
        assert_eq!(report.outcome(ActionId(2)), Some(&ActionOutcome::Skipped));
    }

    #[test]
    fn missing_link_output_fails_and_marks_hot_reload() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("Game-Core-1.so");
        let output_str = output.to_string_lossy().into_owned();
        let graph = graph_of(&[(ActionKind::Link, "link", &["/obj/a.o"], &[output_str.as_str()])]);
        let marker = failed_marker_for(&output);

        let report = ExecutionReport {
            outcomes: vec![(ActionId(0), ActionOutcome::Succeeded)],
        };
        assert!(!verify_link_outputs(&graph, &report, true));
        assert!(marker.exists());

        std::fs::write(&output, "elf").unwrap();
        assert!(verify_link_outputs(&graph, &report, true));
        assert!(!marker.exists());
    }
}
