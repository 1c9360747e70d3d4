//! Command-line interface definitions for boson.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::coordinator::PhaseIntent;
use crate::target::{OnlyModule, TargetKey};

/// Incremental build core.
#[derive(Parser)]
#[command(name = "boson", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Ignore the cached build plan and gather from scratch.
    #[arg(long, short = 'f', global = true)]
    pub force: bool,

    /// Suppress per-action output; show only errors and the final result.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Enable verbose output with cache diagnostics and timings.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Maximum number of parallel workers (0 or omitted = auto-detect from CPU count).
    #[arg(long, short = 'j', global = true)]
    pub jobs: Option<usize>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Bring the requested targets up to date.
    Build(BuildArgs),
    /// Delete the cached build plan so the next build gathers.
    Invalidate(InvalidateArgs),
    /// Remove plan, history and dependency caches for the targets.
    Clean(TargetArgs),
}

/// Targets and where to find them.
#[derive(Args)]
pub struct TargetArgs {
    /// Targets as NAME:PLATFORM:CONFIGURATION.
    #[arg(required = true, value_name = "TARGET")]
    pub targets: Vec<TargetKey>,

    /// Engine root directory.
    #[arg(long, default_value = ".")]
    pub engine_dir: PathBuf,

    /// Project descriptor owning the targets.
    #[arg(long)]
    pub project: Option<PathBuf>,
}

/// Arguments for the `build` subcommand.
#[derive(Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct BuildArgs {
    /// Targets and their engine and project.
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Force the gather phase.
    #[arg(long)]
    pub gather: bool,

    /// Skip the gather phase when a cached plan is valid.
    #[arg(long, conflicts_with = "gather")]
    pub no_gather: bool,

    /// Gather and write the build plan without building.
    #[arg(long, conflicts_with_all = ["assemble_only", "no_gather", "assemble"])]
    pub gather_only: bool,

    /// Run the assemble phase.
    #[arg(long)]
    pub assemble: bool,

    /// Skip the assemble phase.
    #[arg(long, conflicts_with = "assemble")]
    pub no_assemble: bool,

    /// Build from the cached plan, gathering only if it is stale.
    #[arg(long, conflicts_with_all = ["gather", "no_assemble"])]
    pub assemble_only: bool,

    /// Do not take the single-instance lock.
    #[arg(long)]
    pub no_mutex: bool,

    /// Wait for another instance instead of failing.
    #[arg(long, conflicts_with = "no_mutex")]
    pub wait_mutex: bool,

    /// Serialise against every invocation on the machine.
    #[arg(long)]
    pub validate_platform: bool,

    /// Restrict the build to a module for hot reload (NAME or NAME=SUFFIX).
    #[arg(long = "hot-reload-module", value_name = "MODULE")]
    pub hot_reload_modules: Vec<OnlyModule>,

    /// Build normally even when hot-reload modules are given.
    #[arg(long)]
    pub no_hot_reload: bool,

    /// Write the action list to this file instead of running it.
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,
}

impl BuildArgs {
    /// Phase intent of the given flags.
    ///
    /// Contradictory pairs are rejected by the parser, so the flags that
    /// remain agree and their order does not matter.
    pub fn phase_intent(&self) -> PhaseIntent {
        let flags = [
            (self.gather, "gather"),
            (self.no_gather, "nogather"),
            (self.gather_only, "gatheronly"),
            (self.assemble, "assemble"),
            (self.no_assemble, "noassemble"),
            (self.assemble_only, "assembleonly"),
        ];
        PhaseIntent::from_flags(flags.into_iter().filter(|(set, _)| *set).map(|(_, name)| name))
    }
}

/// Arguments for the `invalidate` subcommand.
#[derive(Args)]
pub struct InvalidateArgs {
    /// Targets whose plan to delete.
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Invalidate the hot-reload plan instead of the normal one.
    #[arg(long)]
    pub hot_reload: bool,
}
