//! boson command-line driver.
//!
//! Pipeline: parse arguments → load layered configuration → build the
//!           project context → hand the request to the coordinator.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use boson::cli::{BuildArgs, Cli, Command, InvalidateArgs, TargetArgs};
use boson::config::{BuildConfiguration, ExecutorKind};
use boson::lock::{LockMode, LockScope};
use boson::plan_cache::{self, ProjectContext};
use boson::target::TargetDescriptor;
use boson::{BuildOutcome, BuildRequest, Coordinator, verbose};
use clap::Parser;

fn main() -> ExitCode {
    let cli = Cli::parse();
    verbose::init(cli.quiet, cli.verbose);

    let result = match cli.command {
        Command::Build(ref args) => cmd_build(&cli, args),
        Command::Invalidate(ref args) => cmd_invalidate(args).map(|()| BuildOutcome::Succeeded),
        Command::Clean(ref args) => cmd_clean(args).map(|()| BuildOutcome::Succeeded),
    };
    match result {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

// ===========================================================================
// Context
// ===========================================================================

/// Resolved locations for one invocation.
struct Workspace {
    engine_dir: PathBuf,
    project_file: Option<PathBuf>,
}

impl Workspace {
    fn resolve(args: &TargetArgs) -> Result<Self> {
        let engine_dir = args
            .engine_dir
            .canonicalize()
            .with_context(|| format!("engine directory {} not found", args.engine_dir.display()))?;
        let project_file = args
            .project
            .as_deref()
            .map(|p| {
                p.canonicalize()
                    .with_context(|| format!("project descriptor {} not found", p.display()))
            })
            .transpose()?;
        Ok(Self {
            engine_dir,
            project_file,
        })
    }

    fn project_dir(&self) -> Option<&Path> {
        self.project_file.as_deref().and_then(Path::parent)
    }

    fn root_dir(&self) -> &Path {
        self.project_dir().unwrap_or(&self.engine_dir)
    }

    fn descriptors(&self, args: &TargetArgs) -> Vec<TargetDescriptor> {
        args.targets
            .iter()
            .map(|key| TargetDescriptor {
                key: key.clone(),
                project_file: self.project_file.clone(),
                only_modules: Vec::new(),
            })
            .collect()
    }
}

// ===========================================================================
// Commands
// ===========================================================================

/// Bring the requested targets up to date.
fn cmd_build(cli: &Cli, args: &BuildArgs) -> Result<BuildOutcome> {
    let ws = Workspace::resolve(&args.targets)?;
    let mut config = BuildConfiguration::load(&ws.engine_dir, ws.project_dir())?;
    if let Some(jobs) = cli.jobs {
        config.max_workers = jobs;
    }
    if let Some(path) = &args.export {
        config.executor = ExecutorKind::Export;
        config.export_path = Some(path.clone());
    }

    let mut targets = ws.descriptors(&args.targets);
    for target in &mut targets {
        target.only_modules = args.hot_reload_modules.clone();
    }
    let lock = (!args.no_mutex).then(|| {
        let scope = if args.validate_platform {
            LockScope::Global
        } else {
            LockScope::Location(ws.engine_dir.clone())
        };
        let mode = if args.wait_mutex { LockMode::Wait } else { LockMode::FailFast };
        (scope, mode)
    });
    let request = BuildRequest {
        targets,
        intent: args.phase_intent(),
        lock,
        force: cli.force,
        allow_hot_reload: !args.no_hot_reload,
    };

    let ctx = ProjectContext::new(&ws.engine_dir, ws.project_file.as_deref(), &config);
    let start = std::time::Instant::now();
    let outcome = Coordinator::new(ctx, config).run(&request)?;

    let elapsed = start.elapsed();
    match outcome {
        BuildOutcome::Succeeded => println!("Build succeeded in {elapsed:.1?}"),
        BuildOutcome::UpToDate => println!("Target is up to date ({elapsed:.1?})"),
        BuildOutcome::Failed => println!("Build failed after {elapsed:.1?}"),
    }
    Ok(outcome)
}

/// Delete the cached build plan.
fn cmd_invalidate(args: &InvalidateArgs) -> Result<()> {
    let ws = Workspace::resolve(&args.targets)?;
    let path = plan_cache::plan_path(&ws.engine_dir, &ws.descriptors(&args.targets), args.hot_reload);
    if plan_cache::invalidate(&path)? {
        println!("Removed {}", path.display());
    } else {
        println!("No build plan at {}", path.display());
    }
    Ok(())
}

/// Remove every cache the targets own.
fn cmd_clean(args: &TargetArgs) -> Result<()> {
    let ws = Workspace::resolve(args)?;
    let descriptors = ws.descriptors(args);
    for hot_reload in [false, true] {
        plan_cache::invalidate(&plan_cache::plan_path(&ws.engine_dir, &descriptors, hot_reload))?;
    }
    for key in &args.targets {
        let dir = key.intermediate_dir(ws.root_dir());
        if dir.exists() {
            std::fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
            println!("Removed {}", dir.display());
        }
    }
    Ok(())
}
