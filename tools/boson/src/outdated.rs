//! Outdated-action planning.
//!
//! Starting from the root actions, every reachable action is checked
//! against the filesystem, the action history and the dependency cache.
//! Outdatedness propagates forward: an action consuming a file produced by
//! an outdated action is itself outdated. The result is the executable
//! subset in topological order.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::action::{ActionId, ActionKind};
use crate::config::BuildConfiguration;
use crate::dep_cache::DependencyCache;
use crate::error::{BuildError, Result};
use crate::file_item::{FileId, file_mtime, is_newer_than};
use crate::graph::ActionGraph;
use crate::history::ActionHistory;
use crate::hot_reload::failed_marker_for;
use crate::target::{Target, TargetKey};
use crate::verbose::{Timer, vprintln};

/// Timestamps closer than this are treated as equal.
const TIMESTAMP_SLOP: Duration = Duration::from_secs(1);

/// Produced files whose timestamps do not reflect the last execution.
const IGNORED_TIMESTAMP_EXTENSIONS: &[&str] = &["lib", "exp", "pdb"];

/// Incremental linker state kept across outdated runs.
const INCREMENTAL_LINK_EXTENSIONS: &[&str] = &["pdb", "ilk"];

/// Persistent per-target state consulted while planning.
#[derive(Debug)]
pub struct TargetCaches {
    /// Target the caches belong to.
    pub key: TargetKey,
    /// Producing command lines.
    pub history: ActionHistory,
    /// Include information.
    pub dependencies: DependencyCache,
}

impl TargetCaches {
    /// Load both caches from the target's intermediate directory.
    pub fn load(root: &Path, key: &TargetKey) -> Self {
        Self {
            key: key.clone(),
            history: ActionHistory::load(&ActionHistory::path_for(root, key)),
            dependencies: DependencyCache::load(&DependencyCache::path_for(root, key)),
        }
    }

    /// Persist both caches.
    pub fn save(&mut self) -> Result<()> {
        self.history.save()?;
        self.dependencies.save()
    }
}

/// Knobs that change what counts as outdated.
#[derive(Clone, Copy, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct PlanOptions {
    /// Compare command lines against the action history.
    pub use_action_history: bool,
    /// Do not propagate outdatedness through import libraries.
    pub ignore_outdated_import_libraries: bool,
    /// Delete produced files of every outdated action.
    pub delete_all_outdated_produced_items: bool,
    /// Drop link actions none of whose inputs were recompiled.
    pub skip_linking_when_nothing_to_compile: bool,
    /// Use only cached include information; never scan sources.
    pub only_cached_dependencies: bool,
    /// This run is a hot reload.
    pub hot_reload: bool,
}

impl PlanOptions {
    /// Options from configuration.
    pub fn from_config(config: &BuildConfiguration, only_cached_dependencies: bool, hot_reload: bool) -> Self {
        Self {
            use_action_history: config.use_action_history,
            ignore_outdated_import_libraries: config.ignore_outdated_import_libraries,
            delete_all_outdated_produced_items: config.delete_all_outdated_produced_items,
            skip_linking_when_nothing_to_compile: config.skip_linking_when_nothing_to_compile,
            only_cached_dependencies,
            hot_reload,
        }
    }
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self::from_config(&BuildConfiguration::default(), false, false)
    }
}

/// Result of planning.
#[derive(Debug, Default)]
pub struct Plan {
    /// Actions to execute, topologically ordered.
    pub actions: Vec<ActionId>,
    /// Include-scannable inputs of outdated compile actions, per target.
    pub outdated_prerequisites: BTreeMap<TargetKey, Vec<FileId>>,
}

impl Plan {
    /// Nothing needs to run.
    pub fn is_up_to_date(&self) -> bool {
        self.actions.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    InProgress,
    Done(bool),
}

struct Planner<'a> {
    graph: &'a ActionGraph,
    caches: &'a mut [TargetCaches],
    options: &'a PlanOptions,
    owner: Vec<Option<usize>>,
    visits: Vec<Visit>,
}

/// Compute the actions that must run to bring `targets` up to date.
///
/// Side effects: records command lines in (and saves) the action
/// histories, deletes produced files of outdated actions that ask for it,
/// and creates output directories.
pub fn plan(
    graph: &ActionGraph,
    roots: &[ActionId],
    targets: &[Target],
    caches: &mut [TargetCaches],
    options: &PlanOptions,
) -> Result<Plan> {
    let _t = Timer::start("outdated action planning");

    let mut owner = vec![None; graph.actions.len()];
    for (i, target) in targets.iter().enumerate() {
        for &id in &target.actions {
            owner[id.index()].get_or_insert(i);
        }
    }

    let reachable = graph.reachable_from(roots);
    let mut planner = Planner {
        graph,
        caches,
        options,
        owner,
        visits: vec![Visit::Unvisited; graph.actions.len()],
    };

    let mut outdated = Vec::new();
    for id in graph.action_ids() {
        if reachable[id.index()] && planner.is_outdated(id)? {
            outdated.push(id);
        }
    }

    let mut result = Plan::default();
    for &id in &outdated {
        let action = graph.action(id);
        if action.kind != ActionKind::Compile {
            continue;
        }
        let key = match planner.cache_index(id) {
            Some(i) => planner.caches[i].key.clone(),
            None => match targets.first() {
                Some(t) => t.key.clone(),
                None => continue,
            },
        };
        let entry = result.outdated_prerequisites.entry(key).or_default();
        for &file in &action.prerequisites {
            if graph.file(file).cached_include_paths.is_some() && !entry.contains(&file) {
                entry.push(file);
            }
        }
    }

    delete_outdated_produced_items(graph, &outdated, options)?;
    for cache in planner.caches.iter_mut() {
        cache.history.save()?;
    }
    create_output_directories(graph, &outdated)?;

    let mut to_execute: Vec<ActionId> = outdated
        .into_iter()
        .filter(|&id| graph.action(id).command_path.is_some())
        .collect();
    if options.skip_linking_when_nothing_to_compile {
        to_execute = skip_unneeded_links(graph, &to_execute, options.hot_reload);
    }

    result.actions = graph.sort_action_list(&to_execute)?;
    vprintln!("  {} of {} actions outdated", result.actions.len(), graph.actions.len());
    Ok(result)
}

impl Planner<'_> {
    fn cache_index(&self, id: ActionId) -> Option<usize> {
        if self.caches.is_empty() {
            return None;
        }
        Some(self.owner[id.index()].filter(|&i| i < self.caches.len()).unwrap_or(0))
    }

    fn is_outdated(&mut self, id: ActionId) -> Result<bool> {
        match self.visits[id.index()] {
            Visit::Done(outdated) => return Ok(outdated),
            Visit::InProgress => {
                return Err(BuildError::Cycle {
                    description: format!("  '{}' depends on itself", self.graph.action(id).status_description),
                });
            }
            Visit::Unvisited => {}
        }
        self.visits[id.index()] = Visit::InProgress;
        let reason = self.outdated_reason(id)?;
        if let Some(reason) = &reason {
            vprintln!("  outdated: {} ({reason})", self.graph.action(id).status_description);
        }
        self.visits[id.index()] = Visit::Done(reason.is_some());
        Ok(reason.is_some())
    }

    fn outdated_reason(&mut self, id: ActionId) -> Result<Option<String>> {
        let graph = self.graph;
        let action = graph.action(id);
        let cache = self.cache_index(id);
        let mut reason: Option<String> = None;

        if self.options.use_action_history {
            if let Some(i) = cache {
                let command_line = action.command_line();
                for &file in &action.produced {
                    let path = &graph.file(file).path;
                    if self.caches[i].history.update(path, &command_line) && reason.is_none() {
                        reason = Some(format!("command line changed for {}", path.display()));
                    }
                }
            }
        }

        let mut last_execution: Option<SystemTime> = None;
        for &file in &action.produced {
            let item = graph.file(file);
            let stat = item.stat();
            if !stat.exists || (stat.len == 0 && !stat.is_dir) {
                reason.get_or_insert_with(|| format!("{} is missing", item.path.display()));
                continue;
            }
            if IGNORED_TIMESTAMP_EXTENSIONS.contains(&item.extension().as_str()) {
                continue;
            }
            if let Some(modified) = stat.modified {
                last_execution = Some(last_execution.map_or(modified, |t| t.min(modified)));
            }
        }
        if reason.is_some() {
            return Ok(reason);
        }

        if action.kind == ActionKind::Compile {
            if let (Some(i), Some(last)) = (cache, last_execution) {
                for &file in &action.prerequisites {
                    let item = graph.file(file);
                    let Some(search_paths) = &item.cached_include_paths else {
                        continue;
                    };
                    let includes = self.caches[i].dependencies.find_and_cache_all_included_files(
                        &item.path,
                        search_paths,
                        self.options.only_cached_dependencies,
                    );
                    if let Some(newer) = includes
                        .iter()
                        .find(|inc| file_mtime(inc).is_some_and(|m| is_newer_than(m, last, TIMESTAMP_SLOP)))
                    {
                        return Ok(Some(format!("included file {} is newer", newer.display())));
                    }
                }
            }
        }

        for &file in &action.prerequisites {
            let item = graph.file(file);
            if let Some(producer) = item.producing_action {
                if producer != id && self.is_outdated(producer)? {
                    let import_library = item.extension() == "lib"
                        && graph.action(producer).produces_import_library;
                    if !(self.options.ignore_outdated_import_libraries && import_library) {
                        return Ok(Some(format!(
                            "{} is produced by an outdated action",
                            item.path.display()
                        )));
                    }
                }
            }
            if let (Some(last), Some(modified)) = (last_execution, item.modified()) {
                if is_newer_than(modified, last, TIMESTAMP_SLOP) {
                    return Ok(Some(format!("{} is newer", item.path.display())));
                }
            }
        }
        Ok(None)
    }
}

fn delete_outdated_produced_items(graph: &ActionGraph, outdated: &[ActionId], options: &PlanOptions) -> Result<()> {
    for &id in outdated {
        let action = graph.action(id);
        if !(action.should_delete_produced_items || options.delete_all_outdated_produced_items) {
            continue;
        }
        for &file in &action.produced {
            let item = graph.file(file);
            if action.use_incremental_linking
                && INCREMENTAL_LINK_EXTENSIONS.contains(&item.extension().as_str())
            {
                continue;
            }
            if item.stat().is_dir {
                continue;
            }
            match std::fs::remove_file(&item.path) {
                Ok(()) => vprintln!("  deleted outdated {}", item.path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(BuildError::io(&item.path, e)),
            }
        }
    }
    Ok(())
}

fn create_output_directories(graph: &ActionGraph, outdated: &[ActionId]) -> Result<()> {
    for &id in outdated {
        for &file in &graph.action(id).produced {
            if let Some(dir) = graph.file(file).path.parent() {
                std::fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
            }
        }
    }
    Ok(())
}

/// Drop link actions whose inputs were not rebuilt this run.
///
/// A link is kept if a non-link input producer is executing, if a previous
/// hot reload of its output failed, or if a kept link consumes its output.
/// Actions depending only on dropped links are dropped too.
fn skip_unneeded_links(graph: &ActionGraph, actions: &[ActionId], hot_reload: bool) -> Vec<ActionId> {
    let executing: HashSet<ActionId> = actions.iter().copied().collect();
    let is_link = |id: ActionId| graph.action(id).kind == ActionKind::Link;

    let mut keep: HashSet<ActionId> = HashSet::new();
    for &id in actions.iter().filter(|&&id| is_link(id)) {
        let recompiled = graph
            .prerequisite_actions(id)
            .into_iter()
            .any(|p| executing.contains(&p) && !is_link(p));
        let failed_before = hot_reload
            && graph
                .action(id)
                .primary_output()
                .is_some_and(|f| failed_marker_for(&graph.file(f).path).is_file());
        if recompiled || failed_before {
            keep.insert(id);
        }
    }

    loop {
        let needed: Vec<ActionId> = actions
            .iter()
            .copied()
            .filter(|&id| is_link(id) && !keep.contains(&id))
            .filter(|&id| {
                keep.iter()
                    .any(|&k| graph.prerequisite_actions(k).contains(&id))
            })
            .collect();
        if needed.is_empty() {
            break;
        }
        keep.extend(needed);
    }

    let mut dropped: HashSet<ActionId> = actions
        .iter()
        .copied()
        .filter(|&id| is_link(id) && !keep.contains(&id))
        .collect();
    loop {
        let orphaned: Vec<ActionId> = actions
            .iter()
            .copied()
            .filter(|id| !dropped.contains(id) && !is_link(*id))
            .filter(|&id| {
                let producers: Vec<ActionId> = graph
                    .prerequisite_actions(id)
                    .into_iter()
                    .filter(|p| executing.contains(p))
                    .collect();
                !producers.is_empty() && producers.iter().all(|p| dropped.contains(p))
            })
            .collect();
        if orphaned.is_empty() {
            break;
        }
        dropped.extend(orphaned);
    }

    for id in &dropped {
        vprintln!("  skipping {}: nothing to compile", graph.action(*id).status_description);
    }
    actions.iter().copied().filter(|id| !dropped.contains(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::file_item::normalize_path;
    use std::fs::File;
    use std::path::PathBuf;

    /// Scratch tree with files whose mtimes are offsets from a base time.
    struct Tree {
        _dir: tempfile::TempDir,
        root: PathBuf,
        base: SystemTime,
    }

    impl Tree {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = normalize_path(dir.path());
            Self {
                _dir: dir,
                root,
                base: SystemTime::now() - Duration::from_secs(1_000),
            }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.root.join(rel)
        }

        /// Write `rel` with mtime `base + secs`.
        fn file(&self, rel: &str, text: &str, secs: u64) -> PathBuf {
            let path = self.path(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, text).unwrap();
            File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(self.base + Duration::from_secs(secs))
                .unwrap();
            path
        }

        fn caches(&self, key: &TargetKey) -> Vec<TargetCaches> {
            vec![TargetCaches::load(&self.root, key)]
        }
    }

    fn key() -> TargetKey {
        TargetKey::new("App", "Linux", "Debug")
    }

    /// `a.c → a.o → app` with every action owned by one target.
    fn chain(tree: &Tree) -> (ActionGraph, Vec<Target>) {
        let mut graph = ActionGraph::new();
        let mut compile = Action::new(ActionKind::Compile, "a.c");
        compile.command_path = Some("/usr/bin/cc".into());
        compile.arguments = vec!["-c".into(), tree.path("src/a.c").display().to_string()];
        let src = graph.files.intern(tree.path("src/a.c"));
        graph.files.get_mut(src).cached_include_paths = Some(vec![tree.path("include")]);
        compile.prerequisites = vec![src];
        compile.produced = vec![graph.files.intern(tree.path("obj/a.o"))];
        graph.add_action(compile);

        let mut link = Action::new(ActionKind::Link, "app");
        link.command_path = Some("/usr/bin/ld".into());
        link.prerequisites = vec![graph.files.intern(tree.path("obj/a.o"))];
        link.produced = vec![graph.files.intern(tree.path("bin/app"))];
        graph.add_action(link);
        graph.link_actions_and_items().unwrap();

        let output = graph.files.find(tree.path("bin/app")).unwrap();
        (graph, vec![target_owning(tree, output)])
    }

    /// A target owning actions 0 and 1.
    fn target_owning(tree: &Tree, output: FileId) -> Target {
        Target {
            key: key(),
            project_file: None,
            rules_file: tree.path("App.rules"),
            modules: Vec::new(),
            actions: vec![ActionId(0), ActionId(1)],
            output_items: vec![output],
            only_modules: Vec::new(),
            use_adaptive_unity: false,
            module_manifest: None,
        }
    }

    fn no_history() -> PlanOptions {
        PlanOptions {
            use_action_history: false,
            ..PlanOptions::default()
        }
    }

    fn run(graph: &ActionGraph, targets: &[Target], caches: &mut [TargetCaches], options: &PlanOptions) -> Plan {
        plan(graph, &[ActionId(1)], targets, caches, options).unwrap()
    }

    // -----------------------------------------------------------------------
    // 1. fresh_tree_is_up_to_date
    // -----------------------------------------------------------------------

    #[test]
    fn fresh_tree_is_up_to_date() {
        let tree = Tree::new();
        tree.file("src/a.c", "int a;\n", 0);
        tree.file("obj/a.o", "obj", 10);
        tree.file("bin/app", "bin", 20);
        let (graph, targets) = chain(&tree);
        let mut caches = tree.caches(&key());
        assert!(run(&graph, &targets, &mut caches, &no_history()).is_up_to_date());
    }

    // -----------------------------------------------------------------------
    // 2. outdatedness_propagates_forward
    // -----------------------------------------------------------------------

    #[test]
    fn outdatedness_propagates_forward() {
        let tree = Tree::new();
        tree.file("src/a.c", "int a;\n", 30);
        tree.file("obj/a.o", "obj", 10);
        tree.file("bin/app", "bin", 40);
        let (graph, targets) = chain(&tree);
        let mut caches = tree.caches(&key());
        let plan = run(&graph, &targets, &mut caches, &no_history());
        assert_eq!(plan.actions, vec![ActionId(0), ActionId(1)]);
    }

    // -----------------------------------------------------------------------
    // 3. second_plan_is_empty
    // -----------------------------------------------------------------------

    #[test]
    fn second_plan_is_empty() {
        let tree = Tree::new();
        tree.file("src/a.c", "int a;\n", 0);
        tree.file("obj/a.o", "obj", 10);
        tree.file("bin/app", "bin", 20);
        let (graph, targets) = chain(&tree);
        let options = PlanOptions::default();

        // No history yet: everything counts as a command line change.
        let mut caches = tree.caches(&key());
        assert_eq!(run(&graph, &targets, &mut caches, &options).actions.len(), 2);

        let mut caches = tree.caches(&key());
        assert!(run(&graph, &targets, &mut caches, &options).is_up_to_date());
    }

    // -----------------------------------------------------------------------
    // 4. missing_output_forces_rebuild
    // -----------------------------------------------------------------------

    #[test]
    fn missing_output_forces_rebuild() {
        let tree = Tree::new();
        tree.file("src/a.c", "int a;\n", 0);
        tree.file("obj/a.o", "obj", 10);
        let app = tree.file("bin/app", "bin", 20);
        let (mut graph, targets) = chain(&tree);
        let mut caches = tree.caches(&key());
        assert!(run(&graph, &targets, &mut caches, &no_history()).is_up_to_date());

        std::fs::remove_file(app).unwrap();
        graph.files.reset_stats();
        let plan = run(&graph, &targets, &mut caches, &no_history());
        assert_eq!(plan.actions, vec![ActionId(1)]);
    }

    // -----------------------------------------------------------------------
    // 5. empty_output_counts_as_missing
    // -----------------------------------------------------------------------

    #[test]
    fn empty_output_counts_as_missing() {
        let tree = Tree::new();
        tree.file("src/a.c", "int a;\n", 0);
        tree.file("obj/a.o", "", 10);
        tree.file("bin/app", "bin", 20);
        let (graph, targets) = chain(&tree);
        let mut caches = tree.caches(&key());
        let plan = run(&graph, &targets, &mut caches, &no_history());
        assert_eq!(plan.actions, vec![ActionId(0), ActionId(1)]);
    }

    // -----------------------------------------------------------------------
    // 6. command_line_change_forces_rebuild
    // -----------------------------------------------------------------------

    #[test]
    fn command_line_change_forces_rebuild() {
        let tree = Tree::new();
        tree.file("src/a.c", "int a;\n", 0);
        tree.file("obj/a.o", "obj", 10);
        tree.file("bin/app", "bin", 20);
        let (mut graph, targets) = chain(&tree);
        let options = PlanOptions::default();
        let mut caches = tree.caches(&key());
        run(&graph, &targets, &mut caches, &options);

        graph.actions[1].arguments.push("-O2".into());
        let mut caches = tree.caches(&key());
        let plan = run(&graph, &targets, &mut caches, &options);
        assert_eq!(plan.actions, vec![ActionId(1)]);
    }

    // -----------------------------------------------------------------------
    // 7. newer_include_forces_recompile
    // -----------------------------------------------------------------------

    #[test]
    fn newer_include_forces_recompile() {
        let tree = Tree::new();
        tree.file("src/a.c", "#include <a.h>\n", 0);
        tree.file("include/a.h", "", 30);
        tree.file("obj/a.o", "obj", 10);
        tree.file("bin/app", "bin", 40);
        let (graph, targets) = chain(&tree);
        let mut caches = tree.caches(&key());
        let plan = run(&graph, &targets, &mut caches, &no_history());
        assert_eq!(plan.actions, vec![ActionId(0), ActionId(1)]);

        let outdated = &plan.outdated_prerequisites[&key()];
        assert_eq!(outdated, &vec![graph.files.find(tree.path("src/a.c")).unwrap()]);
    }

    // -----------------------------------------------------------------------
    // 8. only_cached_dependencies_skip_scanning
    // -----------------------------------------------------------------------

    #[test]
    fn only_cached_dependencies_skip_scanning() {
        let tree = Tree::new();
        tree.file("src/a.c", "#include <a.h>\n", 0);
        tree.file("include/a.h", "", 30);
        tree.file("obj/a.o", "obj", 10);
        tree.file("bin/app", "bin", 40);
        let (graph, targets) = chain(&tree);
        let mut caches = tree.caches(&key());
        let options = PlanOptions {
            only_cached_dependencies: true,
            ..no_history()
        };
        assert!(run(&graph, &targets, &mut caches, &options).is_up_to_date());
    }

    // -----------------------------------------------------------------------
    // 9. import_libraries
    // -----------------------------------------------------------------------

    fn import_library_graph(tree: &Tree) -> (ActionGraph, Vec<Target>) {
        let mut graph = ActionGraph::new();
        let mut core = Action::new(ActionKind::Link, "Core");
        core.command_path = Some("/usr/bin/ld".into());
        core.produces_import_library = true;
        core.prerequisites = vec![graph.files.intern(tree.path("obj/core.o"))];
        core.produced = vec![
            graph.files.intern(tree.path("bin/Core.dll")),
            graph.files.intern(tree.path("bin/Core.lib")),
        ];
        graph.add_action(core);
        let mut app = Action::new(ActionKind::Link, "App");
        app.command_path = Some("/usr/bin/ld".into());
        app.prerequisites = vec![graph.files.intern(tree.path("bin/Core.lib"))];
        app.produced = vec![graph.files.intern(tree.path("bin/App.exe"))];
        graph.add_action(app);
        graph.link_actions_and_items().unwrap();
        let output = graph.files.find(tree.path("bin/App.exe")).unwrap();
        (graph, vec![target_owning(tree, output)])
    }

    #[test]
    fn import_libraries() {
        let tree = Tree::new();
        tree.file("obj/core.o", "o", 0);
        tree.file("bin/Core.lib", "lib", 5);
        tree.file("bin/App.exe", "exe", 20);
        let (graph, targets) = import_library_graph(&tree);

        // Core.dll is missing, so Core relinks; App ignores the import library.
        let mut caches = tree.caches(&key());
        let plan = run(&graph, &targets, &mut caches, &no_history());
        assert_eq!(plan.actions, vec![ActionId(0)]);

        let strict = PlanOptions {
            ignore_outdated_import_libraries: false,
            ..no_history()
        };
        let plan = run(&graph, &targets, &mut caches, &strict);
        assert_eq!(plan.actions, vec![ActionId(0), ActionId(1)]);
    }

    #[test]
    fn missing_import_library_still_forces_relink() {
        let tree = Tree::new();
        tree.file("obj/core.o", "o", 0);
        tree.file("bin/Core.dll", "dll", 5);
        tree.file("bin/App.exe", "exe", 20);
        let (graph, targets) = import_library_graph(&tree);
        let mut caches = tree.caches(&key());
        let plan = run(&graph, &targets, &mut caches, &no_history());
        assert!(plan.actions.contains(&ActionId(0)));
    }

    // -----------------------------------------------------------------------
    // 10. skip_linking_when_nothing_to_compile
    // -----------------------------------------------------------------------

    #[test]
    fn skip_linking_when_nothing_to_compile() {
        let tree = Tree::new();
        tree.file("src/a.c", "int a;\n", 0);
        tree.file("obj/a.o", "obj", 10);
        let (graph, targets) = chain(&tree);
        let options = PlanOptions {
            skip_linking_when_nothing_to_compile: true,
            hot_reload: true,
            ..no_history()
        };
        let mut caches = tree.caches(&key());
        assert!(run(&graph, &targets, &mut caches, &options).is_up_to_date());

        tree.file("bin/failed.hotreload", "", 0);
        let plan = run(&graph, &targets, &mut caches, &options);
        assert_eq!(plan.actions, vec![ActionId(1)]);
    }

    // -----------------------------------------------------------------------
    // 11. outdated_outputs_are_deleted_on_request
    // -----------------------------------------------------------------------

    #[test]
    fn outdated_outputs_are_deleted_on_request() {
        let tree = Tree::new();
        tree.file("src/a.c", "int a;\n", 30);
        let obj = tree.file("obj/a.o", "obj", 10);
        let app = tree.file("bin/app", "bin", 40);
        let (mut graph, targets) = chain(&tree);
        graph.actions[0].should_delete_produced_items = true;
        let mut caches = tree.caches(&key());
        run(&graph, &targets, &mut caches, &no_history());
        assert!(!obj.exists());
        assert!(app.exists());
    }

    // -----------------------------------------------------------------------
    // 12. unreachable_actions_are_ignored
    // -----------------------------------------------------------------------

    #[test]
    fn unreachable_actions_are_ignored() {
        let tree = Tree::new();
        tree.file("src/a.c", "int a;\n", 0);
        tree.file("obj/a.o", "obj", 10);
        tree.file("bin/app", "bin", 20);
        let (mut graph, targets) = chain(&tree);
        let mut stray = Action::new(ActionKind::Compile, "stray.c");
        stray.command_path = Some("/usr/bin/cc".into());
        stray.produced = vec![graph.files.intern(tree.path("obj/stray.o"))];
        graph.add_action(stray);
        graph.link_actions_and_items().unwrap();

        let mut caches = tree.caches(&key());
        assert!(run(&graph, &targets, &mut caches, &no_history()).is_up_to_date());
    }
}
