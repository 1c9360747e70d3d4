//! Invocation coordinator.
//!
//! One run: take the instance lock, decide between the cached plan and a
//! fresh gather, patch for hot reload, plan outdated actions, execute them
//! while the dependency cache is warmed in the background, and persist the
//! per-target caches, on the error path too.

use std::path::{Path, PathBuf};

use crate::config::BuildConfiguration;
use crate::error::{BuildError, Result};
use crate::executor::{self, CancellationToken, ExecutionReport, Executor};
use crate::gather::{Gatherer, ManifestGatherer};
use crate::hot_reload;
use crate::lock::{InstanceLock, LockMode, LockScope};
use crate::outdated::{self, PlanOptions, TargetCaches};
use crate::plan_cache::{self, BuildPlan, LoadResult, ProjectContext};
use crate::target::TargetDescriptor;
use crate::verbose::{Timer, dprintln, vprintln};

// ============================================================================
// Phases
// ============================================================================

/// Phase flags as given on the command line; `None` means "not specified".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseIntent {
    /// Build the action graph from scratch.
    pub gather: Option<bool>,
    /// Plan and execute actions.
    pub assemble: Option<bool>,
}

impl PhaseIntent {
    /// Apply one flag (`gather`, `nogather`, `gatheronly`, `assemble`,
    /// `noassemble`, `assembleonly`; leading dashes and case ignored).
    /// Returns `false` for anything else.
    pub fn apply(&mut self, flag: &str) -> bool {
        match flag.trim_start_matches('-').to_ascii_lowercase().as_str() {
            "gather" => self.gather = Some(true),
            "nogather" => self.gather = Some(false),
            "gatheronly" => {
                self.gather = Some(true);
                self.assemble = Some(false);
            }
            "assemble" => self.assemble = Some(true),
            "noassemble" => self.assemble = Some(false),
            "assembleonly" => {
                self.gather = Some(false);
                self.assemble = Some(true);
            }
            _ => return false,
        }
        true
    }

    /// Intent from a list of flags, later flags winning.
    pub fn from_flags<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut intent = Self::default();
        for flag in flags {
            intent.apply(flag.as_ref());
        }
        intent
    }
}

/// Phases of this run, fixed once the plan cache has been consulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Phases {
    gathering: bool,
    assembling: bool,
}

impl Phases {
    /// Resolve `intent` against the plan cache decision.
    ///
    /// Gathering defaults to off when the plan cache is in use and is forced
    /// on when assembling without a valid cached plan.
    pub fn resolve(intent: PhaseIntent, use_plan_cache: bool, plan_valid: bool) -> Result<Self> {
        let assembling = intent.assemble.unwrap_or(true);
        let mut gathering = intent.gather.unwrap_or(!use_plan_cache);
        if assembling && !plan_valid {
            gathering = true;
        }
        if !gathering && !assembling {
            return Err(BuildError::NoPhases);
        }
        Ok(Self {
            gathering,
            assembling,
        })
    }

    /// The action graph is built from scratch.
    pub fn is_gathering(self) -> bool {
        self.gathering
    }

    /// Outdated actions are planned and executed.
    pub fn is_assembling(self) -> bool {
        self.assembling
    }
}

// ============================================================================
// Request / outcome
// ============================================================================

/// Everything one invocation asks for.
#[derive(Clone, Debug)]
pub struct BuildRequest {
    /// Targets to build.
    pub targets: Vec<TargetDescriptor>,
    /// Phase flags.
    pub intent: PhaseIntent,
    /// Instance lock to hold for the run; `None` skips locking.
    pub lock: Option<(LockScope, LockMode)>,
    /// Ignore any cached plan.
    pub force: bool,
    /// Hot reload is permitted when the request qualifies.
    pub allow_hot_reload: bool,
}

impl BuildRequest {
    /// A request for `targets` with default phases and no lock.
    pub fn new(targets: Vec<TargetDescriptor>) -> Self {
        Self {
            targets,
            intent: PhaseIntent::default(),
            lock: None,
            force: false,
            allow_hot_reload: true,
        }
    }

    /// Hot reload applies to a single target with module overrides.
    pub fn is_hot_reload(&self) -> bool {
        self.allow_hot_reload && matches!(self.targets.as_slice(), [t] if !t.only_modules.is_empty())
    }
}

/// Result of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Actions ran and all succeeded (or the run only gathered).
    Succeeded,
    /// Nothing needed to run.
    UpToDate,
    /// An action failed or a link output is missing.
    Failed,
}

impl BuildOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Succeeded | Self::UpToDate => 0,
            Self::Failed => 1,
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Drives a build for one engine/project context.
pub struct Coordinator {
    ctx: ProjectContext,
    config: BuildConfiguration,
    gatherer: Box<dyn Gatherer>,
    executor: Box<dyn Executor>,
}

impl Coordinator {
    /// Coordinator with the manifest gatherer and the configured executor.
    pub fn new(ctx: ProjectContext, config: BuildConfiguration) -> Self {
        let executor = executor::from_config(&config, None);
        Self {
            ctx,
            config,
            gatherer: Box::new(ManifestGatherer),
            executor,
        }
    }

    /// Replace the gatherer.
    #[must_use]
    pub fn with_gatherer(mut self, gatherer: Box<dyn Gatherer>) -> Self {
        self.gatherer = gatherer;
        self
    }

    /// Replace the executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Box<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Project and engine context.
    pub fn context(&self) -> &ProjectContext {
        &self.ctx
    }

    /// Run the build described by `request`.
    pub fn run(&self, request: &BuildRequest) -> Result<BuildOutcome> {
        let _t = Timer::start("total");
        let _lock = match &request.lock {
            Some((scope, mode)) => Some(InstanceLock::acquire(scope, *mode)?),
            None => None,
        };

        let hot_reload = request.is_hot_reload();
        let plan_path = plan_cache::plan_path(&self.ctx.engine_dir, &request.targets, hot_reload);
        let cached = self.load_cached_plan(&plan_path, request)?;
        let phases = Phases::resolve(request.intent, self.config.use_plan_cache, cached.is_some())?;
        vprintln!(
            "  phases: gather={} assemble={}",
            phases.is_gathering(),
            phases.is_assembling()
        );

        let mut plan = if phases.is_gathering() {
            let plan = self.gatherer.gather(&request.targets, &self.ctx, &self.config)?;
            if self.config.use_plan_cache {
                plan_cache::save(&plan_path, &plan)?;
                if !phases.is_assembling() {
                    dprintln!("  build plan written to {}", plan_path.display());
                }
            }
            plan
        } else {
            match cached {
                Some(plan) => plan,
                None => return Err(BuildError::malformed("assembling without a build plan")),
            }
        };
        if !phases.is_assembling() {
            return Ok(BuildOutcome::Succeeded);
        }

        if hot_reload {
            let overrides = &request.targets[0].only_modules;
            let report = hot_reload::patch_for_hot_reload(&mut plan.graph, &mut plan.targets, overrides)?;
            for (old, new) in &report.renamed {
                dprintln!("  hot reload: {old} -> {new}");
            }
            hot_reload::delete_stale_hot_reload_libraries(&plan.graph);
        }

        let root = self.ctx.root_dir().to_path_buf();
        let mut caches: Vec<TargetCaches> = plan
            .targets
            .iter()
            .map(|t| TargetCaches::load(&root, &t.key))
            .collect();
        let full_rescan =
            self.targets_changed(&plan, hot_reload)? || caches.iter().any(|c| !c.dependencies.was_loaded());
        if full_rescan {
            dprintln!(
                "  performing full include scan ({} a new target)",
                if hot_reload { "hot reloading" } else { "building" }
            );
            for cache in &mut caches {
                cache.dependencies.clear_flattened();
            }
        }
        let options = PlanOptions::from_config(&self.config, !phases.is_gathering() && !full_rescan, hot_reload);

        let result = self.assemble(&plan, &mut caches, &options);
        let saved = caches.iter_mut().try_for_each(TargetCaches::save);
        let outcome = result?;
        saved?;
        Ok(outcome)
    }

    fn load_cached_plan(&self, path: &Path, request: &BuildRequest) -> Result<Option<BuildPlan>> {
        if !self.config.use_plan_cache || request.force {
            return Ok(None);
        }
        match plan_cache::try_load(path, &self.ctx)? {
            LoadResult::Valid(plan) => match plan_cache::only_modules_mismatch(&plan, &request.targets) {
                Some(reason) => {
                    vprintln!("  build plan cache rejected: {reason}");
                    Ok(None)
                }
                None => Ok(Some(*plan)),
            },
            LoadResult::Invalid(_) => Ok(None),
        }
    }

    /// Record the target collection; `true` if it differs from last time.
    fn targets_changed(&self, plan: &BuildPlan, hot_reload: bool) -> Result<bool> {
        let name = if hot_reload {
            "HotReloadLastBuiltTargets.txt"
        } else {
            "LastBuiltTargets.txt"
        };
        let path: PathBuf = self.ctx.engine_dir.join("Intermediate").join("Build").join(name);
        let mut keys: Vec<String> = plan.targets.iter().map(|t| t.key.to_string()).collect();
        keys.sort();
        let current = keys.join("\n");

        let previous = std::fs::read_to_string(&path).ok();
        if previous.as_deref() == Some(current.as_str()) {
            return Ok(false);
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
        }
        std::fs::write(&path, current).map_err(|e| BuildError::io(&path, e))?;
        Ok(true)
    }

    fn assemble(&self, plan: &BuildPlan, caches: &mut [TargetCaches], options: &PlanOptions) -> Result<BuildOutcome> {
        let planned = outdated::plan(&plan.graph, &plan.root_actions, &plan.targets, caches, options)?;
        if planned.is_up_to_date() {
            dprintln!("  target is up to date");
            return Ok(BuildOutcome::UpToDate);
        }

        let scan_jobs: Vec<ScanJob> = if self.config.background_include_scan {
            planned
                .outdated_prerequisites
                .iter()
                .filter_map(|(key, files)| Some((caches.iter().position(|c| &c.key == key)?, files)))
                .flat_map(|(cache, files)| {
                    files.iter().filter_map(move |&f| {
                        let item = plan.graph.file(f);
                        Some(ScanJob {
                            cache,
                            source: item.path.clone(),
                            search_paths: item.cached_include_paths.clone()?,
                        })
                    })
                })
                .collect()
        } else {
            Vec::new()
        };

        dprintln!(
            "  building {} actions with {}",
            planned.actions.len(),
            self.executor.name()
        );
        let cancel = CancellationToken::new();
        let report: Result<ExecutionReport> = std::thread::scope(|s| {
            let scanner = (!scan_jobs.is_empty()).then(|| {
                let caches = &mut *caches;
                let jobs = scan_jobs;
                s.spawn(move || background_include_scan(caches, &jobs))
            });
            let report = self
                .executor
                .execute(&plan.graph, &planned.actions, &plan.environment, &cancel);
            if let Some(handle) = scanner {
                if handle.join().is_err() {
                    vprintln!("  background include scan panicked");
                }
            }
            report
        });
        let report = report?;

        let linked = executor::verify_link_outputs(&plan.graph, &report, options.hot_reload);
        if report.success() && linked {
            Ok(BuildOutcome::Succeeded)
        } else {
            if report.failed_count() > 0 {
                eprintln!("error: {} actions failed", report.failed_count());
            }
            Ok(BuildOutcome::Failed)
        }
    }
}

/// One outdated source to deep-scan.
struct ScanJob {
    cache: usize,
    source: PathBuf,
    search_paths: Vec<PathBuf>,
}

/// Flatten includes of outdated sources so the next run can trust the
/// cached dependency lists.
fn background_include_scan(caches: &mut [TargetCaches], jobs: &[ScanJob]) {
    let _t = Timer::start("background include scan");
    for job in jobs {
        caches[job.cache]
            .dependencies
            .find_and_cache_all_included_files(&job.source, &job.search_paths, false);
    }
    vprintln!("  background include scan: {} sources", jobs.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionKind};
    use crate::file_item::normalize_path;
    use crate::gather::tests::write_engine;
    use crate::graph::ActionGraph;
    use crate::target::{OnlyModule, Target, TargetKey};

    fn key() -> TargetKey {
        TargetKey::new("Game", "Linux", "Development")
    }

    fn engine() -> (tempfile::TempDir, PathBuf, Coordinator) {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize_path(dir.path());
        write_engine(&root);
        let config = BuildConfiguration::default();
        let ctx = ProjectContext::new(&root, None, &config);
        (dir, root, Coordinator::new(ctx, config))
    }

    // ------------------------------------------------------------------------
    // 1. phase_resolution
    // ------------------------------------------------------------------------

    #[test]
    fn phase_resolution() {
        let default = PhaseIntent::default();
        let p = Phases::resolve(default, true, true).unwrap();
        assert!(!p.is_gathering() && p.is_assembling());

        let p = Phases::resolve(default, true, false).unwrap();
        assert!(p.is_gathering() && p.is_assembling());

        let p = Phases::resolve(default, false, false).unwrap();
        assert!(p.is_gathering());

        let assemble_only = PhaseIntent::from_flags(["-assembleonly"]);
        let p = Phases::resolve(assemble_only, true, false).unwrap();
        assert!(p.is_gathering(), "invalid plan forces gathering");

        let gather_only = PhaseIntent::from_flags(["-GatherOnly"]);
        let p = Phases::resolve(gather_only, true, true).unwrap();
        assert!(p.is_gathering() && !p.is_assembling());

        let neither = PhaseIntent::from_flags(["-nogather", "-noassemble"]);
        assert!(matches!(Phases::resolve(neither, true, true), Err(BuildError::NoPhases)));
    }

    #[test]
    fn unknown_flags_are_ignored() {
        let mut intent = PhaseIntent::default();
        assert!(!intent.apply("-verbose"));
        assert_eq!(intent, PhaseIntent::default());
    }

    // ------------------------------------------------------------------------
    // 2. second_run_uses_cache_and_is_up_to_date
    // ------------------------------------------------------------------------

    #[test]
    fn second_run_uses_cache_and_is_up_to_date() {
        let (_dir, root, coordinator) = engine();
        let request = BuildRequest::new(vec![TargetDescriptor::new(key())]);

        assert_eq!(coordinator.run(&request).unwrap(), BuildOutcome::Succeeded);
        assert!(root.join("Binaries/Linux/Game-Core-1.so").is_file());
        let plan_path = plan_cache::plan_path(&root, &request.targets, false);
        assert!(plan_path.is_file());
        assert!(root.join("Intermediate/Build/LastBuiltTargets.txt").is_file());

        let cached = coordinator.load_cached_plan(&plan_path, &request).unwrap();
        assert!(cached.is_some(), "plan cache should be reusable");
        assert_eq!(coordinator.run(&request).unwrap(), BuildOutcome::UpToDate);
    }

    // ------------------------------------------------------------------------
    // 3. gather_only_writes_plan_without_building
    // ------------------------------------------------------------------------

    #[test]
    fn gather_only_writes_plan_without_building() {
        let (_dir, root, coordinator) = engine();
        let mut request = BuildRequest::new(vec![TargetDescriptor::new(key())]);
        request.intent = PhaseIntent::from_flags(["-gatheronly"]);

        assert_eq!(coordinator.run(&request).unwrap(), BuildOutcome::Succeeded);
        assert!(plan_cache::plan_path(&root, &request.targets, false).is_file());
        assert!(!root.join("Binaries/Linux/Game-Core-1.so").exists());
    }

    // ------------------------------------------------------------------------
    // 4. failed_action_reports_failure_and_saves_caches
    // ------------------------------------------------------------------------

    struct FailingGatherer;

    impl Gatherer for FailingGatherer {
        fn gather(
            &self,
            targets: &[TargetDescriptor],
            ctx: &ProjectContext,
            _config: &BuildConfiguration,
        ) -> Result<BuildPlan> {
            let root = ctx.root_dir();
            let mut graph = ActionGraph::new();
            let mut action = Action::new(ActionKind::Compile, "broken.c");
            action.command_path = Some("/bin/sh".into());
            action.arguments = vec!["-c".into(), "exit 1".into()];
            action.prerequisites = vec![graph.files.intern(root.join("Source/Core/Private/a.c"))];
            let output = graph.files.intern(root.join("Intermediate/broken.o"));
            action.produced = vec![output];
            let id = graph.add_action(action);
            graph.link_actions_and_items()?;
            Ok(BuildPlan {
                graph,
                root_actions: vec![id],
                targets: vec![Target {
                    key: targets[0].key.clone(),
                    project_file: None,
                    rules_file: root.join("Source/Game.target.rules"),
                    modules: Vec::new(),
                    actions: vec![id],
                    output_items: vec![output],
                    only_modules: Vec::new(),
                    use_adaptive_unity: false,
                    module_manifest: None,
                }],
                environment: Default::default(),
                use_adaptive_unity: false,
                working_set: Default::default(),
                candidates: Default::default(),
            })
        }
    }

    #[test]
    fn failed_action_reports_failure_and_saves_caches() {
        let (_dir, root, coordinator) = engine();
        let coordinator = coordinator.with_gatherer(Box::new(FailingGatherer));
        let request = BuildRequest::new(vec![TargetDescriptor::new(key())]);

        assert_eq!(coordinator.run(&request).unwrap(), BuildOutcome::Failed);
        assert_eq!(BuildOutcome::Failed.exit_code(), 1);
        let history = crate::history::ActionHistory::path_for(&root, &key());
        assert!(history.is_file(), "action history is persisted after a failure");
    }

    // ------------------------------------------------------------------------
    // 5. hot_reload_links_to_new_name
    // ------------------------------------------------------------------------

    #[test]
    fn hot_reload_links_to_new_name() {
        let (_dir, root, coordinator) = engine();
        let plain = BuildRequest::new(vec![TargetDescriptor::new(key())]);
        assert_eq!(coordinator.run(&plain).unwrap(), BuildOutcome::Succeeded);

        let mut descriptor = TargetDescriptor::new(key());
        descriptor.only_modules = vec![OnlyModule {
            name: "Core".into(),
            suffix: Some("7".into()),
        }];
        let request = BuildRequest::new(vec![descriptor]);
        assert!(request.is_hot_reload());

        assert_eq!(coordinator.run(&request).unwrap(), BuildOutcome::Succeeded);
        assert!(root.join("Binaries/Linux/Game-Core-7.so").is_file());
        assert!(!root.join("Binaries/Linux/Game-Core-1.so").exists(), "stale copy removed");
        assert!(!root.join("Binaries/Linux/failed.hotreload").exists());
        assert!(root.join("Intermediate/Build/HotReloadLastBuiltTargets.txt").is_file());
    }
}
