//! Build configuration parsing.
//!
//! Settings come from up to three `BuildConfiguration.toml` layers, later
//! layers overriding earlier ones field by field:
//!
//! 1. `<engine>/Config/BuildConfiguration.toml`
//! 2. `<project>/Config/BuildConfiguration.toml`
//! 3. `$BOSON_USER_CONFIG`, or `$HOME/.config/boson/BuildConfiguration.toml`
//!
//! Every layer that exists is recorded in [`BuildConfiguration::input_files`]
//! because a newer configuration file invalidates the build plan cache.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};

/// Name of every configuration layer file.
pub const CONFIG_FILE_NAME: &str = "BuildConfiguration.toml";

/// Environment variable naming the user configuration layer.
pub const USER_CONFIG_ENV: &str = "BOSON_USER_CONFIG";

/// How outdated actions are run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    /// Run on local worker threads.
    #[default]
    Local,
    /// Write the action list for an external build system.
    Export,
}

/// Source of the adaptive unity working set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkingSetKind {
    /// Nothing is in the working set.
    #[default]
    None,
    /// Files reported modified or untracked by `git status`.
    Git,
}

/// Fully merged configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct BuildConfiguration {
    /// Persist and reuse the build plan between invocations.
    pub use_plan_cache: bool,
    /// Parallel workers for the local executor (0 = available parallelism).
    pub max_workers: usize,
    /// Strategy used to run outdated actions.
    pub executor: ExecutorKind,
    /// Output file for [`ExecutorKind::Export`].
    pub export_path: Option<PathBuf>,
    /// Rebuild files whose producing command line changed.
    pub use_action_history: bool,
    /// Do not propagate outdatedness through import libraries.
    pub ignore_outdated_import_libraries: bool,
    /// Delete produced files of every outdated action before running it.
    pub delete_all_outdated_produced_items: bool,
    /// Drop link actions none of whose inputs were recompiled.
    pub skip_linking_when_nothing_to_compile: bool,
    /// Deep-scan includes of outdated sources while actions execute.
    pub background_include_scan: bool,
    /// Unity batching that depends on the source working set.
    pub use_adaptive_unity: bool,
    /// Where the working set comes from.
    pub working_set: WorkingSetKind,
    /// Tokens marking a header as carrying reflection metadata.
    pub reflection_markers: Vec<String>,
    /// Configuration files that contributed to this configuration.
    pub input_files: Vec<PathBuf>,
}

impl Default for BuildConfiguration {
    fn default() -> Self {
        Self {
            use_plan_cache: true,
            max_workers: 0,
            executor: ExecutorKind::Local,
            export_path: None,
            use_action_history: true,
            ignore_outdated_import_libraries: true,
            delete_all_outdated_produced_items: false,
            skip_linking_when_nothing_to_compile: false,
            background_include_scan: true,
            use_adaptive_unity: false,
            working_set: WorkingSetKind::None,
            reflection_markers: ["REFLECT_CLASS(", "REFLECT_STRUCT(", "REFLECT_ENUM(", "REFLECT_INTERFACE("]
                .into_iter()
                .map(String::from)
                .collect(),
            input_files: Vec::new(),
        }
    }
}

/// One layer as written on disk; absent keys leave earlier values alone.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ConfigLayer {
    #[serde(default)]
    build: BuildSection,
    #[serde(default)]
    outdated: OutdatedSection,
    #[serde(default)]
    include_scan: IncludeScanSection,
    #[serde(default)]
    adaptive_unity: AdaptiveUnitySection,
    #[serde(default)]
    reflection: ReflectionSection,
}

/// `[build]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct BuildSection {
    use_plan_cache: Option<bool>,
    max_workers: Option<usize>,
    executor: Option<ExecutorKind>,
    export_path: Option<PathBuf>,
}

/// `[outdated]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct OutdatedSection {
    use_action_history: Option<bool>,
    ignore_outdated_import_libraries: Option<bool>,
    delete_all_outdated_produced_items: Option<bool>,
    skip_linking_when_nothing_to_compile: Option<bool>,
}

/// `[include-scan]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct IncludeScanSection {
    background: Option<bool>,
}

/// `[adaptive-unity]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct AdaptiveUnitySection {
    enabled: Option<bool>,
    working_set: Option<WorkingSetKind>,
}

/// `[reflection]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ReflectionSection {
    markers: Option<Vec<String>>,
}

impl BuildConfiguration {
    /// Load the engine, project and user layers that exist.
    pub fn load(engine_dir: &Path, project_dir: Option<&Path>) -> Result<Self> {
        let mut layers = vec![engine_dir.join("Config").join(CONFIG_FILE_NAME)];
        if let Some(dir) = project_dir {
            layers.push(dir.join("Config").join(CONFIG_FILE_NAME));
        }
        if let Some(user) = user_config_path() {
            layers.push(user);
        }
        Self::from_layers(&layers)
    }

    /// Merge the given layer files in order, skipping missing ones.
    pub fn from_layers(paths: &[PathBuf]) -> Result<Self> {
        let mut config = Self::default();
        for path in paths {
            if !path.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
            let layer: ConfigLayer = toml::from_str(&text).map_err(|e| BuildError::Config {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            config.apply(layer);
            config.input_files.push(path.clone());
        }
        if config.executor == ExecutorKind::Export && config.export_path.is_none() {
            return Err(BuildError::Config {
                path: config.input_files.last().cloned().unwrap_or_default(),
                reason: "executor = \"export\" requires export-path".into(),
            });
        }
        Ok(config)
    }

    fn apply(&mut self, layer: ConfigLayer) {
        let ConfigLayer {
            build,
            outdated,
            include_scan,
            adaptive_unity,
            reflection,
        } = layer;

        set(&mut self.use_plan_cache, build.use_plan_cache);
        set(&mut self.max_workers, build.max_workers);
        set(&mut self.executor, build.executor);
        if build.export_path.is_some() {
            self.export_path = build.export_path;
        }

        set(&mut self.use_action_history, outdated.use_action_history);
        set(
            &mut self.ignore_outdated_import_libraries,
            outdated.ignore_outdated_import_libraries,
        );
        set(
            &mut self.delete_all_outdated_produced_items,
            outdated.delete_all_outdated_produced_items,
        );
        set(
            &mut self.skip_linking_when_nothing_to_compile,
            outdated.skip_linking_when_nothing_to_compile,
        );

        set(&mut self.background_include_scan, include_scan.background);

        set(&mut self.use_adaptive_unity, adaptive_unity.enabled);
        set(&mut self.working_set, adaptive_unity.working_set);

        set(&mut self.reflection_markers, reflection.markers);
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// User layer location, if one can be determined.
fn user_config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(USER_CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("boson")
            .join(CONFIG_FILE_NAME)
    })
}
