//! Build actions: one compile, link or generation step each.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::file_item::FileId;

/// Index of an action in the [`ActionGraph`](crate::graph::ActionGraph).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub u32);

impl ActionId {
    /// Position in the action table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What an action does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Compiles a translation unit.
    Compile,
    /// Links objects into a library or executable.
    Link,
    /// Runs a code generator.
    Generate,
    /// Anything else (copies, stamps, post-build steps).
    Other,
}

/// A single build step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Action {
    /// Kind of work performed.
    pub kind: ActionKind,
    /// Program to run. Actions without one are bookkeeping only.
    pub command_path: Option<PathBuf>,
    /// Arguments passed to the program, one token each.
    pub arguments: Vec<String>,
    /// Directory the program runs in.
    pub working_directory: PathBuf,
    /// Short label of the tool, e.g. `cc` or `ld`.
    pub command_description: String,
    /// Line printed when the action starts.
    pub status_description: String,
    /// Files that must be up to date before this action runs.
    pub prerequisites: Vec<FileId>,
    /// Files this action writes.
    pub produced: Vec<FileId>,
    /// May be distributed to a remote machine.
    pub can_execute_remotely: bool,
    /// Delete produced files before re-running.
    pub should_delete_produced_items: bool,
    /// Linker keeps incremental state beside the output.
    pub use_incremental_linking: bool,
    /// Also produces an import library.
    pub produces_import_library: bool,
}

impl Action {
    /// Create an action with no files and default flags.
    pub fn new(kind: ActionKind, status_description: impl Into<String>) -> Self {
        Self {
            kind,
            command_path: None,
            arguments: Vec::new(),
            working_directory: PathBuf::new(),
            command_description: String::new(),
            status_description: status_description.into(),
            prerequisites: Vec::new(),
            produced: Vec::new(),
            can_execute_remotely: false,
            should_delete_produced_items: false,
            use_incremental_linking: false,
            produces_import_library: false,
        }
    }

    /// Primary output: the first produced file.
    pub fn primary_output(&self) -> Option<FileId> {
        self.produced.first().copied()
    }

    /// Full command line as a single string, used for change tracking.
    pub fn command_line(&self) -> String {
        let mut line = self
            .command_path
            .as_ref()
            .map(|p| quote_token(&p.to_string_lossy()))
            .unwrap_or_default();
        for arg in &self.arguments {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&quote_token(arg));
        }
        line
    }
}

/// Quote a token containing whitespace.
fn quote_token(token: &str) -> String {
    if token.contains(char::is_whitespace) && !token.starts_with('"') {
        format!("\"{token}\"")
    } else {
        token.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_quotes_spaced_arguments() {
        let mut action = Action::new(ActionKind::Compile, "main.c");
        action.command_path = Some(PathBuf::from("/usr/bin/cc"));
        action.arguments = vec!["-c".into(), "/src/my file.c".into()];
        assert_eq!(action.command_line(), "/usr/bin/cc -c \"/src/my file.c\"");
    }

    #[test]
    fn bookkeeping_action_has_empty_command_line() {
        let action = Action::new(ActionKind::Other, "stamp");
        assert_eq!(action.command_line(), "");
        assert!(action.primary_output().is_none());
    }
}
