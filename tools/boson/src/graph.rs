//! Action graph: a DAG of actions joined by prerequisite/produced files.
//!
//! Edges are implicit: action B depends on action A when one of B's
//! prerequisites is produced by A. All structural checks (index ranges,
//! unique producers, acyclicity) live here and are shared by gather,
//! cache load and the hot-reload patcher.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionId};
use crate::error::{BuildError, Result};
use crate::file_item::{FileId, FileItem, FileTable};

/// How far down the dependent tree to look when prioritising actions.
const DEPENDENT_COUNT_DEPTH: usize = 5;

/// All actions and the files they reference.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActionGraph {
    /// Every file referenced by any action.
    pub files: FileTable,
    /// Every action, addressed by [`ActionId`].
    pub actions: Vec<Action>,
}

impl ActionGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action and return its id.
    pub fn add_action(&mut self, action: Action) -> ActionId {
        let id = ActionId(u32::try_from(self.actions.len()).unwrap_or(u32::MAX));
        self.actions.push(action);
        id
    }

    /// Borrow an action.
    pub fn action(&self, id: ActionId) -> &Action {
        &self.actions[id.index()]
    }

    /// Mutably borrow an action.
    pub fn action_mut(&mut self, id: ActionId) -> &mut Action {
        &mut self.actions[id.index()]
    }

    /// Borrow a file item.
    pub fn file(&self, id: FileId) -> &FileItem {
        self.files.get(id)
    }

    /// All action ids in table order.
    pub fn action_ids(&self) -> impl Iterator<Item = ActionId> + use<> {
        (0..u32::try_from(self.actions.len()).unwrap_or(u32::MAX)).map(ActionId)
    }

    /// Set every produced item's producer back reference.
    ///
    /// Fails if two actions produce the same file.
    pub fn link_actions_and_items(&mut self) -> Result<()> {
        self.check_indices()?;
        let mut producer: HashMap<FileId, ActionId> = HashMap::new();
        for id in self.action_ids() {
            for &file in &self.actions[id.index()].produced {
                if let Some(&first) = producer.get(&file) {
                    if first != id {
                        return Err(self.duplicate_producer(file, first, id));
                    }
                }
                producer.insert(file, id);
            }
        }
        let ids: Vec<FileId> = self.files.iter().map(|(id, _)| id).collect();
        for file in ids {
            self.files.get_mut(file).producing_action = producer.get(&file).copied();
        }
        Ok(())
    }

    /// Run every structural check.
    pub fn validate(&self) -> Result<()> {
        self.check_indices()?;
        self.check_producers()?;
        self.detect_cycles()
    }

    /// Every file and action index is in range.
    pub fn check_indices(&self) -> Result<()> {
        for (i, action) in self.actions.iter().enumerate() {
            for &file in action.prerequisites.iter().chain(&action.produced) {
                if !self.files.contains(file) {
                    return Err(BuildError::malformed(format!(
                        "action #{i} ({}) references file index {} of {}",
                        action.status_description,
                        file.0,
                        self.files.len(),
                    )));
                }
            }
        }
        for (id, item) in self.files.iter() {
            if let Some(producer) = item.producing_action {
                if producer.index() >= self.actions.len() {
                    return Err(BuildError::malformed(format!(
                        "file #{} ({}) names producer #{} of {}",
                        id.0,
                        item.path.display(),
                        producer.0,
                        self.actions.len(),
                    )));
                }
            }
        }
        Ok(())
    }

    /// Produced files are unique and their back references agree.
    pub fn check_producers(&self) -> Result<()> {
        let mut seen: HashMap<FileId, ActionId> = HashMap::new();
        for id in self.action_ids() {
            for &file in &self.action(id).produced {
                if let Some(&first) = seen.get(&file) {
                    if first != id {
                        return Err(self.duplicate_producer(file, first, id));
                    }
                }
                seen.insert(file, id);
                if self.file(file).producing_action != Some(id) {
                    return Err(BuildError::malformed(format!(
                        "{} is produced by '{}' but records a different producer",
                        self.file(file).path.display(),
                        self.action(id).status_description,
                    )));
                }
            }
        }
        for (file, item) in self.files.iter() {
            if let Some(producer) = item.producing_action {
                if seen.get(&file) != Some(&producer) {
                    return Err(BuildError::malformed(format!(
                        "{} names '{}' as producer, which does not produce it",
                        item.path.display(),
                        self.action(producer).status_description,
                    )));
                }
            }
        }
        Ok(())
    }

    fn duplicate_producer(&self, file: FileId, first: ActionId, second: ActionId) -> BuildError {
        BuildError::DuplicateProducer {
            path: self.file(file).path.clone(),
            first: self.action(first).status_description.clone(),
            second: self.action(second).status_description.clone(),
        }
    }

    /// Distinct actions producing `id`'s prerequisites.
    pub fn prerequisite_actions(&self, id: ActionId) -> Vec<ActionId> {
        let mut out = Vec::new();
        for &file in &self.action(id).prerequisites {
            if let Some(producer) = self.file(file).producing_action {
                if !out.contains(&producer) {
                    out.push(producer);
                }
            }
        }
        out
    }

    /// For each action, the actions that consume one of its products.
    pub fn dependents(&self) -> Vec<Vec<ActionId>> {
        let mut dependents = vec![Vec::new(); self.actions.len()];
        for id in self.action_ids() {
            for producer in self.prerequisite_actions(id) {
                dependents[producer.index()].push(id);
            }
        }
        dependents
    }

    /// Fail with a readable description if prerequisite edges form a cycle.
    pub fn detect_cycles(&self) -> Result<()> {
        let total = self.actions.len();
        let dependents = self.dependents();
        let mut in_degree = vec![0usize; total];
        for deps in &dependents {
            for d in deps {
                in_degree[d.index()] += 1;
            }
        }

        let mut ready: Vec<usize> = (0..total).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = 0;
        while let Some(idx) = ready.pop() {
            visited += 1;
            for d in &dependents[idx] {
                in_degree[d.index()] -= 1;
                if in_degree[d.index()] == 0 {
                    ready.push(d.index());
                }
            }
        }
        if visited == total {
            return Ok(());
        }

        let stuck: Vec<ActionId> = self
            .action_ids()
            .filter(|id| in_degree[id.index()] > 0)
            .collect();
        Err(BuildError::Cycle {
            description: self.describe_cycle(&stuck),
        })
    }

    fn describe_cycle(&self, stuck: &[ActionId]) -> String {
        let stuck_set: HashSet<ActionId> = stuck.iter().copied().collect();
        let mut text = String::new();
        for &id in stuck {
            let action = self.action(id);
            let produced = action
                .primary_output()
                .map(|f| self.file(f).path.display().to_string())
                .unwrap_or_default();
            let _ = writeln!(text, "  '{}' produces {produced}", action.status_description);
            for &file in &action.prerequisites {
                if let Some(producer) = self.file(file).producing_action {
                    if stuck_set.contains(&producer) {
                        let _ = writeln!(
                            text,
                            "    depends on {} (from '{}')",
                            self.file(file).path.display(),
                            self.action(producer).status_description,
                        );
                    }
                }
            }
        }
        text
    }

    /// Actions transitively required to build `roots`, as a membership mask.
    pub fn reachable_from(&self, roots: &[ActionId]) -> Vec<bool> {
        let mut reachable = vec![false; self.actions.len()];
        let mut stack: Vec<ActionId> = roots.to_vec();
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut reachable[id.index()], true) {
                continue;
            }
            stack.extend(self.prerequisite_actions(id));
        }
        reachable
    }

    /// Actions producing `outputs`; falls back to actions nothing depends on.
    pub fn root_actions_for(&self, outputs: &[FileId]) -> Vec<ActionId> {
        let mut roots: Vec<ActionId> = Vec::new();
        for &file in outputs {
            if let Some(producer) = self.file(file).producing_action {
                if !roots.contains(&producer) {
                    roots.push(producer);
                }
            }
        }
        if roots.is_empty() {
            let dependents = self.dependents();
            roots = self
                .action_ids()
                .filter(|id| dependents[id.index()].is_empty())
                .collect();
        }
        roots
    }

    /// Number of distinct dependents within a few levels of each action.
    fn dependent_counts(&self, dependents: &[Vec<ActionId>]) -> Vec<usize> {
        let mut counts = vec![0; self.actions.len()];
        for id in self.action_ids() {
            let mut seen: HashSet<ActionId> = HashSet::new();
            let mut frontier = vec![id];
            for _ in 0..DEPENDENT_COUNT_DEPTH {
                let mut next = Vec::new();
                for node in frontier {
                    for &d in &dependents[node.index()] {
                        if seen.insert(d) {
                            next.push(d);
                        }
                    }
                }
                if next.is_empty() {
                    break;
                }
                frontier = next;
            }
            counts[id.index()] = seen.len();
        }
        counts
    }

    /// Order `actions` topologically, preferring actions with many dependents.
    pub fn sort_action_list(&self, actions: &[ActionId]) -> Result<Vec<ActionId>> {
        let members: HashSet<ActionId> = actions.iter().copied().collect();
        let dependents = self.dependents();
        let counts = self.dependent_counts(&dependents);

        let mut in_degree: HashMap<ActionId, usize> = actions.iter().map(|&a| (a, 0)).collect();
        for &id in actions {
            for producer in self.prerequisite_actions(id) {
                if producer != id && members.contains(&producer) {
                    *in_degree.entry(id).or_default() += 1;
                }
            }
        }

        let mut ready: BinaryHeap<(usize, Reverse<ActionId>)> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&id, _)| (counts[id.index()], Reverse(id)))
            .collect();
        let mut sorted = Vec::with_capacity(actions.len());
        while let Some((_, Reverse(id))) = ready.pop() {
            sorted.push(id);
            for &d in &dependents[id.index()] {
                if d == id {
                    continue;
                }
                if let Some(deg) = in_degree.get_mut(&d) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push((counts[d.index()], Reverse(d)));
                    }
                }
            }
        }

        if sorted.len() != members.len() {
            let stuck: Vec<ActionId> = actions
                .iter()
                .copied()
                .filter(|a| !sorted.contains(a))
                .collect();
            return Err(BuildError::Cycle {
                description: self.describe_cycle(&stuck),
            });
        }
        Ok(sorted)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::action::ActionKind;

    /// Build a graph from `(kind, status, prerequisites, produced)` tuples.
    pub(crate) fn graph_of(specs: &[(ActionKind, &str, &[&str], &[&str])]) -> ActionGraph {
        let mut graph = ActionGraph::new();
        for &(kind, status, prereqs, produced) in specs {
            let mut action = Action::new(kind, status);
            action.command_path = Some("/bin/true".into());
            action.prerequisites = prereqs.iter().map(|p| graph.files.intern(p)).collect();
            action.produced = produced.iter().map(|p| graph.files.intern(p)).collect();
            graph.add_action(action);
        }
        graph.link_actions_and_items().expect("test graph should link");
        graph
    }

    fn chain() -> ActionGraph {
        graph_of(&[
            (ActionKind::Compile, "a.c", &["/src/a.c"], &["/obj/a.o"]),
            (ActionKind::Compile, "b.c", &["/src/b.c"], &["/obj/b.o"]),
            (ActionKind::Link, "app", &["/obj/a.o", "/obj/b.o"], &["/bin/app"]),
        ])
    }

    // -----------------------------------------------------------------------
    // 1. link_sets_producers
    // -----------------------------------------------------------------------

    #[test]
    fn link_sets_producers() {
        let graph = chain();
        let obj = graph.files.find("/obj/a.o").unwrap();
        assert_eq!(graph.file(obj).producing_action, Some(ActionId(0)));
        let src = graph.files.find("/src/a.c").unwrap();
        assert_eq!(graph.file(src).producing_action, None);
        graph.validate().expect("chain is valid");
    }

    // -----------------------------------------------------------------------
    // 2. duplicate_producer_rejected
    // -----------------------------------------------------------------------

    #[test]
    fn duplicate_producer_rejected() {
        let mut graph = ActionGraph::new();
        for status in ["one", "two"] {
            let mut action = Action::new(ActionKind::Generate, status);
            action.produced = vec![graph.files.intern("/gen/out.h")];
            graph.add_action(action);
        }
        let err = graph.link_actions_and_items().unwrap_err();
        assert!(matches!(err, BuildError::DuplicateProducer { .. }), "unexpected error: {err}");
    }

    // -----------------------------------------------------------------------
    // 3. cycle_detected_with_description
    // -----------------------------------------------------------------------

    #[test]
    fn cycle_detected_with_description() {
        let graph = graph_of(&[
            (ActionKind::Generate, "gen-x", &["/gen/y"], &["/gen/x"]),
            (ActionKind::Generate, "gen-y", &["/gen/x"], &["/gen/y"]),
        ]);
        let err = graph.detect_cycles().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("cycle"), "unexpected error: {msg}");
        assert!(msg.contains("gen-x") && msg.contains("gen-y"), "unexpected error: {msg}");
    }

    // -----------------------------------------------------------------------
    // 4. out_of_range_index_is_malformed
    // -----------------------------------------------------------------------

    #[test]
    fn out_of_range_index_is_malformed() {
        let mut graph = chain();
        graph.actions[2].prerequisites.push(FileId(999));
        let err = graph.validate().unwrap_err();
        assert!(matches!(err, BuildError::GraphMalformed { .. }), "unexpected error: {err}");
    }

    // -----------------------------------------------------------------------
    // 5. sort_is_topological
    // -----------------------------------------------------------------------

    #[test]
    fn sort_is_topological() {
        let graph = chain();
        let sorted = graph
            .sort_action_list(&[ActionId(2), ActionId(1), ActionId(0)])
            .unwrap();
        assert_eq!(sorted.last(), Some(&ActionId(2)));
        assert_eq!(sorted.len(), 3);
    }

    // -----------------------------------------------------------------------
    // 6. roots_and_reachability
    // -----------------------------------------------------------------------

    #[test]
    fn roots_and_reachability() {
        let mut graph = chain();
        let mut stray = Action::new(ActionKind::Compile, "stray.c");
        stray.produced = vec![graph.files.intern("/obj/stray.o")];
        graph.add_action(stray);
        graph.link_actions_and_items().unwrap();

        let app = graph.files.find("/bin/app").unwrap();
        let roots = graph.root_actions_for(&[app]);
        assert_eq!(roots, vec![ActionId(2)]);

        let reachable = graph.reachable_from(&roots);
        assert_eq!(reachable, vec![true, true, true, false]);
    }
}
