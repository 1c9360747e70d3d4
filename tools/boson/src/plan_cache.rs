//! Build plan cache: the gathered action graph persisted between runs.
//!
//! The plan is written after a gather and loaded on a later run instead of
//! gathering again. Trust is all-or-nothing: [`try_load`] either returns a
//! plan that passed every check, or the first reason it is stale. A stale
//! plan is not an error; a plan that decodes but is structurally broken is.
//!
//! On-disk layout: bincode-encoded format version, then the encoded
//! [`BuildPlan`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::action::ActionId;
use crate::config::BuildConfiguration;
use crate::error::{BuildError, Result};
use crate::file_item::{file_mtime, normalize_path};
use crate::graph::ActionGraph;
use crate::reflection::{self, MarkerProbe, ReflectionProbe};
use crate::target::{OnlyModule, Target, TargetDescriptor};
use crate::verbose::{Timer, vprintln};
use crate::working_set::{self, EmptyWorkingSet, WorkingSet};

/// Current format version. Bump when [`BuildPlan`] changes shape.
pub const PLAN_CACHE_VERSION: u32 = 1;

/// Everything an assemble-only run needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildPlan {
    /// Every action and file.
    pub graph: ActionGraph,
    /// Actions producing the targets' outputs; planning starts here.
    pub root_actions: Vec<ActionId>,
    /// Targets in the order they were requested.
    pub targets: Vec<Target>,
    /// Process environment captured at gather time, passed to actions.
    pub environment: BTreeMap<String, String>,
    /// Whether any target uses adaptive unity batching.
    pub use_adaptive_unity: bool,
    /// Adaptive unity sources that were in the working set.
    pub working_set: BTreeSet<PathBuf>,
    /// Adaptive unity sources that were not in the working set.
    pub candidates: BTreeSet<PathBuf>,
}

impl BuildPlan {
    /// Why the plan cannot be used at all, if it is missing required parts.
    pub fn structural_problem(&self) -> Option<String> {
        if self.graph.actions.is_empty() {
            return Some("plan has no actions".into());
        }
        if self.targets.is_empty() {
            return Some("plan has no targets".into());
        }
        if self.root_actions.is_empty() {
            return Some("plan has no root actions".into());
        }
        None
    }

    /// Rebuild transient indices after decoding and check every invariant.
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(path) = self.graph.files.rebuild_index() {
            return Err(BuildError::malformed(format!(
                "file {} appears twice in the file table",
                path.display()
            )));
        }
        self.check_references()?;
        self.graph.validate()
    }

    fn check_references(&self) -> Result<()> {
        let actions = self.graph.actions.len();
        if let Some(bad) = self.root_actions.iter().find(|a| a.index() >= actions) {
            return Err(BuildError::malformed(format!(
                "root action #{} out of range ({actions} actions)",
                bad.0
            )));
        }
        for target in &self.targets {
            if let Some(bad) = target.actions.iter().find(|a| a.index() >= actions) {
                return Err(BuildError::malformed(format!(
                    "target {} owns action #{} out of range",
                    target.key, bad.0
                )));
            }
            if let Some(bad) = target.output_items.iter().find(|f| !self.graph.files.contains(**f)) {
                return Err(BuildError::malformed(format!(
                    "target {} lists output file #{} out of range",
                    target.key, bad.0
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of [`try_load`].
#[derive(Debug)]
pub enum LoadResult {
    /// Every check passed.
    Valid(Box<BuildPlan>),
    /// The first failed check.
    Invalid(String),
}

impl LoadResult {
    /// Returns `true` for [`LoadResult::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// Inputs consulted when validating a cached plan.
pub struct ProjectContext {
    /// Engine installation root.
    pub engine_dir: PathBuf,
    /// Project descriptor, when building a project.
    pub project_file: Option<PathBuf>,
    /// Installed engines never regenerate their project files.
    pub is_installed: bool,
    /// Files whose change means the build tool itself changed.
    pub tool_markers: Vec<PathBuf>,
    /// Configuration files that were read this run.
    pub config_files: Vec<PathBuf>,
    /// Current source working set.
    pub working_set: Box<dyn WorkingSet>,
    /// Reflection metadata probe.
    pub reflection: Box<dyn ReflectionProbe>,
}

impl ProjectContext {
    /// Context for `engine_dir` with the default tool markers
    /// (`Build/Build.version` and the running executable).
    pub fn new(engine_dir: &Path, project_file: Option<&Path>, config: &BuildConfiguration) -> Self {
        let engine_dir = normalize_path(engine_dir);
        let project_file = project_file.map(normalize_path);
        let mut tool_markers = vec![engine_dir.join("Build").join("Build.version")];
        if let Ok(exe) = std::env::current_exe() {
            tool_markers.push(exe);
        }
        let root = project_file
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or(&engine_dir)
            .to_path_buf();
        let working_set: Box<dyn WorkingSet> = if config.use_adaptive_unity {
            working_set::from_kind(config.working_set, &root)
        } else {
            Box::new(EmptyWorkingSet)
        };
        Self {
            is_installed: engine_dir.join("Build").join("InstalledBuild.txt").is_file(),
            engine_dir,
            project_file,
            tool_markers,
            config_files: config.input_files.clone(),
            working_set,
            reflection: Box::new(MarkerProbe::new(config.reflection_markers.clone())),
        }
    }

    /// Directory containing the project descriptor.
    pub fn project_dir(&self) -> Option<&Path> {
        self.project_file.as_deref().and_then(Path::parent)
    }

    /// Project directory if there is a project, else the engine directory.
    pub fn root_dir(&self) -> &Path {
        self.project_dir().unwrap_or(&self.engine_dir)
    }

    /// Marker touched whenever engine project files are regenerated.
    pub fn engine_project_files_marker(&self) -> PathBuf {
        project_files_marker(&self.engine_dir)
    }
}

/// `<dir>/Intermediate/ProjectFiles/Timestamp`.
pub fn project_files_marker(dir: &Path) -> PathBuf {
    dir.join("Intermediate").join("ProjectFiles").join("Timestamp")
}

/// Location of the plan cache for a set of requested targets.
///
/// A single target gets a file in its own intermediate directory; a
/// collection gets one named after the sorted target keys.
pub fn plan_path(engine_dir: &Path, targets: &[TargetDescriptor], hot_reload: bool) -> PathBuf {
    let root = targets
        .iter()
        .find_map(|t| t.project_file.as_deref().and_then(Path::parent))
        .unwrap_or(engine_dir);

    if let [single] = targets {
        let name = if hot_reload { "HotReloadBuildPlan.bin" } else { "BuildPlan.bin" };
        return single.key.intermediate_dir(root).join(name);
    }

    let mut keys: Vec<String> = targets.iter().map(|t| t.key.to_string()).collect();
    keys.sort();
    let suffix = if hot_reload { "hotreload.plan.bin" } else { "plan.bin" };
    root.join("Intermediate")
        .join("Build")
        .join(format!("{}.{suffix}", keys.join("_")))
}

/// Load the plan at `path` if every validity check passes.
///
/// Checks run in a fixed order and the first failure wins:
///
/// 1. the file exists, decodes and is structurally complete
/// 2. not older than the tool build markers
/// 3. not older than any configuration file
/// 4. not older than generated project files (engine and project)
/// 5. not older than the project descriptor, which must exist
/// 6. target and module rules files and external dependencies exist and
///    are not newer
/// 7. reflected headers still exist and no newer header changed its
///    reflection status
/// 8. no adaptive unity source changed working-set membership while
///    also changing on disk
pub fn try_load(path: &Path, ctx: &ProjectContext) -> Result<LoadResult> {
    let _t = Timer::start("build plan cache load");

    let Some(cache_time) = file_mtime(path) else {
        return Ok(invalid(format!("no build plan cache at {}", path.display())));
    };
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => return Ok(invalid(format!("cannot read build plan cache {}: {e}", path.display()))),
    };
    let mut plan = match decode(&bytes) {
        Ok(plan) => plan,
        Err(reason) => return Ok(invalid(reason)),
    };
    if let Some(reason) = plan.structural_problem() {
        return Ok(invalid(reason));
    }
    plan.finalize()?;

    let checks: [Check; 7] = [
        check_tool_markers,
        check_config_files,
        check_project_files,
        check_project_descriptor,
        check_rules_files,
        check_reflection_headers,
        check_working_set,
    ];
    for check in checks {
        if let Some(reason) = check(&plan, ctx, cache_time) {
            return Ok(invalid(reason));
        }
    }

    vprintln!(
        "  build plan cache: valid ({} actions, {} targets)",
        plan.graph.actions.len(),
        plan.targets.len()
    );
    Ok(LoadResult::Valid(Box::new(plan)))
}

/// One validity check: the reason the plan is stale, if it is.
type Check = fn(&BuildPlan, &ProjectContext, SystemTime) -> Option<String>;

fn invalid(reason: String) -> LoadResult {
    vprintln!("  build plan cache rejected: {reason}");
    LoadResult::Invalid(reason)
}

fn decode(bytes: &[u8]) -> std::result::Result<BuildPlan, String> {
    let config = bincode::config::standard();
    let (version, used): (u32, usize) = bincode::serde::decode_from_slice(bytes, config)
        .map_err(|e| format!("cannot read build plan header: {e}"))?;
    if version != PLAN_CACHE_VERSION {
        return Err(format!(
            "build plan format version {version}, expected {PLAN_CACHE_VERSION}"
        ));
    }
    let (plan, _): (BuildPlan, usize) = bincode::serde::decode_from_slice(&bytes[used..], config)
        .map_err(|e| format!("cannot decode build plan: {e}"))?;
    Ok(plan)
}

fn newer_than_cache(path: &Path, cache_time: SystemTime) -> bool {
    file_mtime(path).is_some_and(|m| m > cache_time)
}

fn check_tool_markers(_plan: &BuildPlan, ctx: &ProjectContext, cache_time: SystemTime) -> Option<String> {
    ctx.tool_markers
        .iter()
        .find(|m| newer_than_cache(m, cache_time))
        .map(|m| format!("build tool changed ({} is newer)", m.display()))
}

fn check_config_files(_plan: &BuildPlan, ctx: &ProjectContext, cache_time: SystemTime) -> Option<String> {
    ctx.config_files
        .iter()
        .find(|f| newer_than_cache(f, cache_time))
        .map(|f| format!("configuration file {} is newer", f.display()))
}

fn check_project_files(_plan: &BuildPlan, ctx: &ProjectContext, cache_time: SystemTime) -> Option<String> {
    if !ctx.is_installed {
        let marker = ctx.engine_project_files_marker();
        if newer_than_cache(&marker, cache_time) {
            return Some("engine project files were regenerated".into());
        }
    }
    if let Some(dir) = ctx.project_dir() {
        if newer_than_cache(&project_files_marker(dir), cache_time) {
            return Some("project files were regenerated".into());
        }
    }
    None
}

fn check_project_descriptor(plan: &BuildPlan, ctx: &ProjectContext, cache_time: SystemTime) -> Option<String> {
    let descriptors: BTreeSet<&Path> = ctx
        .project_file
        .as_deref()
        .into_iter()
        .chain(plan.targets.iter().filter_map(|t| t.project_file.as_deref()))
        .collect();
    for descriptor in descriptors {
        match file_mtime(descriptor) {
            None => return Some(format!("project descriptor {} is missing", descriptor.display())),
            Some(m) if m > cache_time => {
                return Some(format!("project descriptor {} is newer", descriptor.display()));
            }
            Some(_) => {}
        }
    }
    None
}

fn check_rules_files(plan: &BuildPlan, _ctx: &ProjectContext, cache_time: SystemTime) -> Option<String> {
    let stale = |what: &str, path: &Path| match file_mtime(path) {
        None => Some(format!("{what} {} no longer exists", path.display())),
        Some(m) if m > cache_time => Some(format!("{what} {} is newer", path.display())),
        Some(_) => None,
    };
    for target in &plan.targets {
        if let Some(reason) = stale("target rules file", &target.rules_file) {
            return Some(reason);
        }
        for module in &target.modules {
            if let Some(reason) = stale("module rules file", &module.rules_file) {
                return Some(reason);
            }
            for dep in module.external_dependency_paths() {
                if let Some(reason) = stale("external dependency", &dep) {
                    return Some(format!("{reason} (module {})", module.name));
                }
            }
        }
    }
    None
}

fn check_reflection_headers(plan: &BuildPlan, ctx: &ProjectContext, cache_time: SystemTime) -> Option<String> {
    for target in &plan.targets {
        for module in &target.modules {
            if let Some(gone) = module.reflected_headers.iter().find(|h| !h.is_file()) {
                return Some(format!("reflected header {} was deleted", gone.display()));
            }
            for entry in reflection::headers_under(&module.source_dir) {
                if !newer_than_cache(entry.path(), cache_time) {
                    continue;
                }
                let header = normalize_path(entry.path());
                let had = module.reflected_headers.contains(&header);
                let has = ctx.reflection.has_reflection_metadata(&header);
                if had != has {
                    let change = if has { "gained" } else { "lost" };
                    return Some(format!("{} {change} reflection metadata", header.display()));
                }
            }
        }
    }
    None
}

fn check_working_set(plan: &BuildPlan, ctx: &ProjectContext, cache_time: SystemTime) -> Option<String> {
    if !plan.use_adaptive_unity {
        return None;
    }
    let changed = |path: &Path| file_mtime(path).is_none_or(|m| m > cache_time);
    if let Some(left) = plan
        .working_set
        .iter()
        .find(|f| !ctx.working_set.contains(f) && changed(f))
    {
        return Some(format!("{} left the working set", left.display()));
    }
    if let Some(joined) = plan
        .candidates
        .iter()
        .find(|f| ctx.working_set.contains(f) && changed(f))
    {
        return Some(format!("{} entered the working set", joined.display()));
    }
    None
}

/// Why a cached plan cannot serve the requested hot-reload modules.
///
/// The module names and whether each has a forced suffix must match.
pub fn only_modules_mismatch(plan: &BuildPlan, requested: &[TargetDescriptor]) -> Option<String> {
    if plan.targets.len() != requested.len() {
        return Some("requested target set differs from the cached plan".into());
    }
    for descriptor in requested {
        let Some(target) = plan.targets.iter().find(|t| t.key == descriptor.key) else {
            return Some(format!("target {} is not in the cached plan", descriptor.key));
        };
        let shape = |list: &[OnlyModule]| {
            let mut v: Vec<(String, bool)> = list
                .iter()
                .map(|m| (m.name.to_ascii_lowercase(), m.suffix.is_some()))
                .collect();
            v.sort();
            v
        };
        if shape(&target.only_modules) != shape(&descriptor.only_modules) {
            return Some(format!("hot-reload module list for {} changed", descriptor.key));
        }
    }
    None
}

/// Write `plan` to `path` atomically. Refuses to write an unusable plan.
pub fn save(path: &Path, plan: &BuildPlan) -> Result<()> {
    let _t = Timer::start("build plan cache save");
    if let Some(reason) = plan.structural_problem() {
        return Err(BuildError::malformed(format!("refusing to save build plan: {reason}")));
    }
    plan.graph.validate()?;

    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;

    let config = bincode::config::standard();
    let mut bytes = bincode::serde::encode_to_vec(PLAN_CACHE_VERSION, config)
        .map_err(|e| BuildError::serialization("build plan header", e))?;
    bytes.extend(
        bincode::serde::encode_to_vec(plan, config)
            .map_err(|e| BuildError::serialization("build plan", e))?,
    );

    let tmp_path = path.with_extension("bin.tmp");
    std::fs::write(&tmp_path, bytes).map_err(|e| BuildError::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| BuildError::io(path, e))?;
    vprintln!("  build plan cache: saved {}", path.display());
    Ok(())
}

/// Remove a cached plan so the next run gathers.
pub fn invalidate(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BuildError::io(path, e)),
    }
}
