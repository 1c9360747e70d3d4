//! Export executor: writes the action list for an external build system.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{ActionOutcome, CancellationToken, ExecutionReport, Executor};
use crate::action::{ActionId, ActionKind};
use crate::error::{BuildError, Result};
use crate::graph::ActionGraph;
use crate::verbose::dprintln;

/// Writes actions and their dependency edges as JSON.
#[derive(Debug, Clone)]
pub struct ExportExecutor {
    path: PathBuf,
}

impl ExportExecutor {
    /// Export to `path`.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Serialize)]
struct ExportFile<'a> {
    environment: &'a BTreeMap<String, String>,
    actions: Vec<ExportedAction<'a>>,
}

#[derive(Serialize)]
struct ExportedAction<'a> {
    /// Position in this file.
    id: usize,
    kind: ActionKind,
    status: &'a str,
    command: Option<&'a Path>,
    arguments: &'a [String],
    working_directory: &'a Path,
    /// Positions of actions in this file that must finish first.
    depends_on: Vec<usize>,
    prerequisites: Vec<&'a Path>,
    produced: Vec<&'a Path>,
    can_execute_remotely: bool,
}

impl Executor for ExportExecutor {
    fn name(&self) -> &'static str {
        "export"
    }

    fn execute(
        &self,
        graph: &ActionGraph,
        actions: &[ActionId],
        environment: &BTreeMap<String, String>,
        _cancel: &CancellationToken,
    ) -> Result<ExecutionReport> {
        let mut position = vec![None; graph.actions.len()];
        for (i, id) in actions.iter().enumerate() {
            position[id.index()] = Some(i);
        }

        let exported = actions
            .iter()
            .enumerate()
            .map(|(i, &id)| {
                let action = graph.action(id);
                ExportedAction {
                    id: i,
                    kind: action.kind,
                    status: &action.status_description,
                    command: action.command_path.as_deref(),
                    arguments: &action.arguments,
                    working_directory: &action.working_directory,
                    depends_on: graph
                        .prerequisite_actions(id)
                        .into_iter()
                        .filter_map(|p| position[p.index()])
                        .collect(),
                    prerequisites: action.prerequisites.iter().map(|&f| graph.file(f).path.as_path()).collect(),
                    produced: action.produced.iter().map(|&f| graph.file(f).path.as_path()).collect(),
                    can_execute_remotely: action.can_execute_remotely,
                }
            })
            .collect();

        let json = serde_json::to_string_pretty(&ExportFile {
            environment,
            actions: exported,
        })
        .map_err(|e| BuildError::serialization("action export", e))?;

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| BuildError::io(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| BuildError::io(&self.path, e))?;
        dprintln!("  exported {} actions to {}", actions.len(), self.path.display());

        Ok(ExecutionReport {
            outcomes: actions.iter().map(|&id| (id, ActionOutcome::Deferred)).collect(),
        })
    }
}
