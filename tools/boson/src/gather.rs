//! Gather phase: discover targets and build the action graph.
//!
//! Module and target discovery proper belongs to the rules layer, which
//! writes one JSON manifest per target to `<root>/Targets/<Name>.target.json`.
//! [`ManifestGatherer`] turns those manifests into a [`BuildPlan`].
//!
//! Strings in a manifest may use the placeholders `{root}`, `{name}`,
//! `{platform}` and `{configuration}`. Relative paths resolve against the
//! project root (or the engine directory when there is no project).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::action::{Action, ActionKind};
use crate::config::BuildConfiguration;
use crate::error::{BuildError, Result};
use crate::file_item::normalize_path;
use crate::graph::ActionGraph;
use crate::plan_cache::{BuildPlan, ProjectContext};
use crate::reflection;
use crate::target::{ModuleRecord, Target, TargetDescriptor, TargetKey};
use crate::verbose::{Timer, vprintln};

/// Sources whose includes are scanned for outdated checks.
const SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx", "m", "mm"];

/// Builds a fresh plan for the requested targets.
pub trait Gatherer {
    /// Discover every target and produce a validated plan.
    fn gather(
        &self,
        targets: &[TargetDescriptor],
        ctx: &ProjectContext,
        config: &BuildConfiguration,
    ) -> Result<BuildPlan>;
}

/// Reads per-target JSON manifests.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestGatherer;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetManifest {
    rules_file: String,
    #[serde(default)]
    modules: Vec<ModuleManifest>,
    actions: Vec<ActionManifest>,
    outputs: Vec<String>,
    #[serde(default)]
    module_manifest: Option<String>,
    #[serde(default)]
    adaptive_unity_candidates: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleManifest {
    name: String,
    rules_file: String,
    source_dir: String,
    #[serde(default)]
    external_dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
struct ActionManifest {
    kind: ActionKind,
    status: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    arguments: Vec<String>,
    #[serde(default)]
    working_directory: Option<String>,
    #[serde(default)]
    prerequisites: Vec<String>,
    produced: Vec<String>,
    #[serde(default)]
    include_paths: Option<Vec<String>>,
    #[serde(default)]
    remote: bool,
    #[serde(default)]
    delete_produced: bool,
    #[serde(default)]
    incremental_linking: bool,
    #[serde(default)]
    import_library: bool,
    #[serde(default)]
    hot_reload_cleanup: bool,
}

/// Placeholder expansion and path resolution for one target.
struct Expander<'a> {
    root: &'a Path,
    key: &'a TargetKey,
}

impl Expander<'_> {
    fn text(&self, s: &str) -> String {
        s.replace("{root}", &self.root.to_string_lossy())
            .replace("{name}", &self.key.name)
            .replace("{platform}", &self.key.platform)
            .replace("{configuration}", &self.key.configuration)
    }

    fn path(&self, s: &str) -> PathBuf {
        normalize_path(&self.root.join(self.text(s)))
    }
}

impl ManifestGatherer {
    /// Manifest location for `key` under `root`.
    pub fn manifest_path(root: &Path, key: &TargetKey) -> PathBuf {
        root.join("Targets").join(format!("{}.target.json", key.name))
    }
}

impl Gatherer for ManifestGatherer {
    fn gather(
        &self,
        targets: &[TargetDescriptor],
        ctx: &ProjectContext,
        config: &BuildConfiguration,
    ) -> Result<BuildPlan> {
        let _t = Timer::start("gather");
        let root = ctx.root_dir().to_path_buf();
        let mut graph = ActionGraph::new();
        let mut gathered = Vec::new();
        let mut output_files = Vec::new();
        let mut working_set = BTreeSet::new();
        let mut candidates = BTreeSet::new();

        for descriptor in targets {
            let key = &descriptor.key;
            let gather_err = |reason: String| BuildError::Gather {
                target: key.to_string(),
                reason,
            };
            let manifest_path = Self::manifest_path(&root, key);
            let text = std::fs::read_to_string(&manifest_path)
                .map_err(|e| gather_err(format!("cannot read {}: {e}", manifest_path.display())))?;
            let manifest: TargetManifest = serde_json::from_str(&text)
                .map_err(|e| gather_err(format!("{}: {e}", manifest_path.display())))?;
            let expand = Expander { root: &root, key };

            let mut actions = Vec::with_capacity(manifest.actions.len());
            for entry in &manifest.actions {
                let action = build_action(&mut graph, entry, &expand);
                actions.push(graph.add_action(action));
            }

            let mut outputs = Vec::new();
            for output in &manifest.outputs {
                outputs.push(graph.files.intern(expand.path(output)));
            }
            output_files.extend(outputs.iter().copied());

            let modules = manifest
                .modules
                .iter()
                .map(|m| module_record(m, &expand, ctx))
                .collect();

            if config.use_adaptive_unity {
                for candidate in &manifest.adaptive_unity_candidates {
                    let path = expand.path(candidate);
                    if ctx.working_set.contains(&path) {
                        working_set.insert(path);
                    } else {
                        candidates.insert(path);
                    }
                }
            }

            vprintln!("  gathered {key}: {} actions", actions.len());
            gathered.push(Target {
                key: key.clone(),
                project_file: descriptor.project_file.clone().or_else(|| ctx.project_file.clone()),
                rules_file: expand.path(&manifest.rules_file),
                modules,
                actions,
                output_items: outputs,
                only_modules: descriptor.only_modules.clone(),
                use_adaptive_unity: config.use_adaptive_unity,
                module_manifest: manifest.module_manifest.as_deref().map(|m| expand.path(m)),
            });
        }

        graph.link_actions_and_items()?;
        graph.validate()?;
        let root_actions = graph.root_actions_for(&output_files);

        Ok(BuildPlan {
            graph,
            root_actions,
            targets: gathered,
            environment: std::env::vars().collect::<BTreeMap<_, _>>(),
            use_adaptive_unity: config.use_adaptive_unity,
            working_set,
            candidates,
        })
    }
}

fn build_action(graph: &mut ActionGraph, entry: &ActionManifest, expand: &Expander<'_>) -> Action {
    let mut action = Action::new(entry.kind, expand.text(&entry.status));
    action.command_path = entry.command.as_deref().map(|c| PathBuf::from(expand.text(c)));
    action.command_description = entry.description.clone();
    action.arguments = entry.arguments.iter().map(|a| expand.text(a)).collect();
    action.working_directory = entry
        .working_directory
        .as_deref()
        .map_or_else(|| expand.root.to_path_buf(), |d| expand.path(d));
    action.can_execute_remotely = entry.remote;
    action.should_delete_produced_items = entry.delete_produced;
    action.use_incremental_linking = entry.incremental_linking;
    action.produces_import_library = entry.import_library;

    let include_paths: Option<Vec<PathBuf>> = entry
        .include_paths
        .as_ref()
        .map(|paths| paths.iter().map(|p| expand.path(p)).collect());
    for prereq in &entry.prerequisites {
        let id = graph.files.intern(expand.path(prereq));
        let item = graph.files.get_mut(id);
        if entry.kind == ActionKind::Compile
            && SOURCE_EXTENSIONS.contains(&item.extension().as_str())
        {
            if let Some(paths) = &include_paths {
                item.cached_include_paths = Some(paths.clone());
            }
        }
        action.prerequisites.push(id);
    }
    for produced in &entry.produced {
        let id = graph.files.intern(expand.path(produced));
        if entry.hot_reload_cleanup {
            graph.files.get_mut(id).needs_hot_reload_cleanup = true;
        }
        action.produced.push(id);
    }
    action
}

fn module_record(entry: &ModuleManifest, expand: &Expander<'_>, ctx: &ProjectContext) -> ModuleRecord {
    let source_dir = expand.path(&entry.source_dir);
    let reflected_headers = reflection::headers_under(&source_dir)
        .map(|e| normalize_path(e.path()))
        .filter(|h| ctx.reflection.has_reflection_metadata(h))
        .collect();
    ModuleRecord {
        name: entry.name.clone(),
        rules_file: expand.path(&entry.rules_file),
        external_dependencies: entry.external_dependencies.iter().map(PathBuf::from).collect(),
        source_dir,
        reflected_headers,
    }
}
