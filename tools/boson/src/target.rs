//! Build targets, their modules, and hot-reload module overrides.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::action::ActionId;
use crate::file_item::FileId;

/// Identity of a target: name, platform and configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    /// Target name, e.g. `Game` or `Editor`.
    pub name: String,
    /// Platform, e.g. `Linux`.
    pub platform: String,
    /// Configuration, e.g. `Development`.
    pub configuration: String,
}

impl TargetKey {
    /// Create a key from its parts.
    pub fn new(
        name: impl Into<String>,
        platform: impl Into<String>,
        configuration: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            platform: platform.into(),
            configuration: configuration.into(),
        }
    }

    /// `<root>/Intermediate/Build/<Platform>/<Name>/<Configuration>`.
    pub fn intermediate_dir(&self, root: &Path) -> PathBuf {
        root.join("Intermediate")
            .join("Build")
            .join(&self.platform)
            .join(&self.name)
            .join(&self.configuration)
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.platform, self.configuration)
    }
}

impl FromStr for TargetKey {
    type Err = String;

    /// Parse `Name:Platform:Configuration`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [name, platform, config] if !name.is_empty() && !platform.is_empty() && !config.is_empty() => {
                Ok(Self::new(*name, *platform, *config))
            }
            _ => Err(format!("expected NAME:PLATFORM:CONFIGURATION, got '{s}'")),
        }
    }
}

/// A module restricted for hot reload, with an optional forced suffix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlyModule {
    /// Module name, matched case-insensitively.
    pub name: String,
    /// Suffix to use instead of a freshly generated one.
    pub suffix: Option<String>,
}

impl OnlyModule {
    /// Create an override with no forced suffix.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            suffix: None,
        }
    }
}

impl FromStr for OnlyModule {
    type Err = String;

    /// Parse `Name` or `Name=Suffix`. An empty suffix counts as none.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, suffix) = match s.split_once('=') {
            Some((name, suffix)) => (name, Some(suffix)),
            None => (s, None),
        };
        if name.is_empty() {
            return Err(format!("missing module name in '{s}'"));
        }
        Ok(Self {
            name: name.to_string(),
            suffix: suffix.filter(|s| !s.is_empty()).map(str::to_string),
        })
    }
}

/// What the caller asked to build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetDescriptor {
    /// Target identity.
    pub key: TargetKey,
    /// Owning project descriptor, if the target belongs to a project.
    pub project_file: Option<PathBuf>,
    /// Hot-reload module overrides.
    pub only_modules: Vec<OnlyModule>,
}

impl TargetDescriptor {
    /// Describe a target with no project and no overrides.
    pub fn new(key: TargetKey) -> Self {
        Self {
            key,
            project_file: None,
            only_modules: Vec::new(),
        }
    }
}

/// Per-module metadata recorded at gather time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// Module name.
    pub name: String,
    /// The module's build rules file.
    pub rules_file: PathBuf,
    /// Extra files the rules depend on, relative to the rules directory.
    pub external_dependencies: Vec<PathBuf>,
    /// Root of the module's sources and headers.
    pub source_dir: PathBuf,
    /// Headers that carried reflection metadata when gathered.
    pub reflected_headers: BTreeSet<PathBuf>,
}

impl ModuleRecord {
    /// Absolute paths of the external dependency files.
    pub fn external_dependency_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        let base = self.rules_file.parent().map(Path::to_path_buf).unwrap_or_default();
        self.external_dependencies.iter().map(move |dep| base.join(dep))
    }
}

/// A gathered target: the actions it owns and what it ships.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Target {
    /// Target identity.
    pub key: TargetKey,
    /// Owning project descriptor.
    pub project_file: Option<PathBuf>,
    /// Top-level build rules file.
    pub rules_file: PathBuf,
    /// Modules compiled into the target.
    pub modules: Vec<ModuleRecord>,
    /// Actions owned by this target.
    pub actions: Vec<ActionId>,
    /// Externally visible binaries.
    pub output_items: Vec<FileId>,
    /// Hot-reload module overrides the plan was gathered with.
    pub only_modules: Vec<OnlyModule>,
    /// Adaptive unity batching depends on the source working set.
    pub use_adaptive_unity: bool,
    /// JSON map of module name to binary file name.
    pub module_manifest: Option<PathBuf>,
}
