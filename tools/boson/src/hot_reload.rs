//! Hot-reload renaming of link outputs.
//!
//! A loaded module binary cannot be overwritten while the host process has
//! it mapped, so a hot reload links each module to a freshly suffixed file
//! name (`Game-Core-4711.so`, or `Game-Core-4711-Linux-Debug.so` for
//! non-default configurations). Before a hot-reload build executes, every
//! suffixed link action is patched to the new name: arguments,
//! produced files, the response file, consumers of the renamed files,
//! target outputs and the module manifest.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::action::{ActionId, ActionKind};
use crate::error::{BuildError, Result};
use crate::file_item::FileId;
use crate::graph::ActionGraph;
use crate::target::{OnlyModule, Target};
use crate::verbose::vprintln;

/// Marker left beside a module binary whose last hot-reload link failed.
pub const FAILED_MARKER: &str = "failed.hotreload";

/// Upper bound (exclusive) of generated suffixes.
const SUFFIX_RANGE: u32 = 10_000;

const RESPONSE_EXTENSION: &str = ".response";

/// Location of the failure marker for a link output.
pub fn failed_marker_for(output: &Path) -> PathBuf {
    output.parent().unwrap_or(Path::new(".")).join(FAILED_MARKER)
}

/// A file stem split around its numeric hot-reload suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SuffixedName<'a> {
    /// Everything before the suffix, e.g. `Game-Core`.
    pub base: &'a str,
    /// The digits, e.g. `4711`.
    pub suffix: &'a str,
    /// Platform and configuration tail including its hyphen, or empty.
    pub tail: &'a str,
}

impl<'a> SuffixedName<'a> {
    /// Split `stem` if it ends in `-####` or `-####-Platform-Config`.
    pub fn parse(stem: &'a str) -> Option<Self> {
        let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

        let last = stem.rfind('-')?;
        if is_number(&stem[last + 1..]) && last > 0 {
            return Some(Self {
                base: &stem[..last],
                suffix: &stem[last + 1..],
                tail: "",
            });
        }

        let second = stem[..last].rfind('-')?;
        let third = stem[..second].rfind('-')?;
        if third > 0 && is_number(&stem[third + 1..second]) {
            return Some(Self {
                base: &stem[..third],
                suffix: &stem[third + 1..second],
                tail: &stem[second..],
            });
        }
        None
    }

    /// Module name: the base without its leading `Prefix-`, if any.
    ///
    /// Module names that themselves contain a hyphen cannot be told apart
    /// from a prefix; the part after the first hyphen wins.
    pub fn module_name(&self) -> &'a str {
        self.base.split_once('-').map_or(self.base, |(_, module)| module)
    }

    /// The same name with a different suffix.
    pub fn with_suffix(&self, suffix: &str) -> String {
        format!("{}-{suffix}{}", self.base, self.tail)
    }
}

/// File name with every extension removed.
fn stem_without_extensions(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    Some(name.split_once('.').map_or(name, |(stem, _)| stem))
}

/// The suffix to use for `module`: the override if one is given, otherwise
/// a fresh number different from `current`, recorded in `overrides`.
fn replacement_suffix(overrides: &mut Vec<OnlyModule>, module: &str, current: &str) -> String {
    let slot = overrides.iter().position(|m| m.name.eq_ignore_ascii_case(module));
    if let Some(suffix) = slot.and_then(|i| overrides[i].suffix.clone()) {
        return suffix;
    }

    let mut rng = rand::thread_rng();
    let suffix = loop {
        let candidate = rng.gen_range(0..SUFFIX_RANGE).to_string();
        if candidate != current {
            break candidate;
        }
    };
    match slot {
        Some(i) => overrides[i].suffix = Some(suffix.clone()),
        None => overrides.push(OnlyModule {
            name: module.to_string(),
            suffix: Some(suffix.clone()),
        }),
    }
    suffix
}

/// Byte offsets of every occurrence of `stem` in `text` that sits on a
/// file-name boundary.
fn stem_positions(text: &str, stem: &str) -> Vec<usize> {
    if stem.is_empty() {
        return Vec::new();
    }
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    text.match_indices(stem)
        .map(|(pos, _)| pos)
        .filter(|&pos| {
            let before = text[..pos].chars().next_back();
            let after = text[pos + stem.len()..].chars().next();
            !before.is_some_and(is_word) && !after.is_some_and(is_word)
        })
        .collect()
}

/// Replace every occurrence of `old` in `text` that sits on a file-name
/// boundary. Returns the new text and the number of replacements.
pub fn replace_stem(text: &str, old: &str, new: &str) -> (String, usize) {
    let positions = stem_positions(text, old);
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for &pos in &positions {
        out.push_str(&text[last..pos]);
        out.push_str(new);
        last = pos + old.len();
    }
    out.push_str(&text[last..]);
    (out, positions.len())
}

/// The token around a stem match at `pos` when the match is a directory
/// component rather than part of the file name.
fn directory_component(text: &str, pos: usize, len: usize) -> Option<&str> {
    let is_separator = |c: char| c.is_whitespace() || c == '"';
    let rest = &text[pos + len..];
    let tail = rest.find(is_separator).map_or(rest, |end| &rest[..end]);
    if !tail.contains(['/', '\\']) {
        return None;
    }
    let start = text[..pos].rfind(is_separator).map_or(0, |i| i + 1);
    Some(&text[start..pos + len + tail.len()])
}

/// Apply `renames` to the contents of a response file.
///
/// Every whole-name match of an old stem must be a file name, none may
/// survive the rewrite, and each new stem must gain exactly as many matches
/// as its old stem had.
fn rewrite_response_text(text: &str, renames: &[(String, String)], file: &Path) -> Result<String> {
    let malformed = |detail: String| {
        BuildError::malformed(format!("cannot rewrite response file {}: {detail}", file.display()))
    };

    let mut patched = text.to_string();
    for (old, new) in renames.iter().filter(|(old, new)| old != new) {
        let positions = stem_positions(&patched, old);
        if let Some(token) = positions
            .iter()
            .find_map(|&pos| directory_component(&patched, pos, old.len()))
        {
            return Err(malformed(format!("'{old}' names a directory in '{token}'")));
        }
        let new_before = stem_positions(&patched, new).len();
        let (rewritten, replaced) = replace_stem(&patched, old, new);
        let left = stem_positions(&rewritten, old).len();
        let new_after = stem_positions(&rewritten, new).len();
        if left != 0 || new_after != new_before + replaced {
            return Err(malformed(format!(
                "renaming '{old}' to '{new}' replaced {replaced}, left {left}, \
                 '{new}' went from {new_before} to {new_after}"
            )));
        }
        patched = rewritten;
    }
    Ok(patched)
}

fn replace_all_stems(text: &str, renames: &[(String, String)]) -> String {
    renames
        .iter()
        .fold(text.to_string(), |acc, (old, new)| replace_stem(&acc, old, new).0)
}

/// A response file argument of a link action.
struct ResponseArgument {
    index: usize,
    path: PathBuf,
    quoted: bool,
}

/// Locate the `@path.response` argument, if any.
///
/// An argument mentioning `.response` that is not such a reference is an
/// error: the rename could not be applied consistently.
fn find_response_argument(arguments: &[String], status: &str) -> Result<Option<ResponseArgument>> {
    let Some(index) = arguments
        .iter()
        .position(|a| a.to_ascii_lowercase().contains(RESPONSE_EXTENSION))
    else {
        return Ok(None);
    };
    let arg = arguments[index].trim();
    let malformed = || {
        BuildError::malformed(format!(
            "cannot find response file path in arguments of '{status}' when hot reloading"
        ))
    };
    let reference = arg.strip_prefix('@').ok_or_else(malformed)?;
    let (path, quoted) = match reference.strip_prefix('"') {
        Some(inner) => (inner.strip_suffix('"').ok_or_else(malformed)?, true),
        None => (reference, false),
    };
    if !path.to_ascii_lowercase().ends_with(RESPONSE_EXTENSION) {
        return Err(malformed());
    }
    Ok(Some(ResponseArgument {
        index,
        path: PathBuf::from(path),
        quoted,
    }))
}

/// Everything that changes for one link action, computed up front.
struct LinkPatch {
    action: ActionId,
    old_stem: String,
    new_stem: String,
    arguments: Vec<String>,
    status_description: String,
    produced: Vec<(FileId, PathBuf)>,
    response: Option<(PathBuf, PathBuf)>,
}

/// What [`patch_for_hot_reload`] changed.
#[derive(Debug, Default)]
pub struct PatchReport {
    /// `(old stem, new stem)` for every renamed link output.
    pub renamed: Vec<(String, String)>,
    /// Response files written under new names.
    pub response_files: Vec<PathBuf>,
    /// Overrides including every suffix generated during the patch.
    pub overrides: Vec<OnlyModule>,
}

/// Rename every suffixed link output in `graph` to a new suffix.
///
/// Nothing in the graph is modified unless every link action could be
/// patched. The graph is revalidated afterwards.
pub fn patch_for_hot_reload(
    graph: &mut ActionGraph,
    targets: &mut [Target],
    overrides: &[OnlyModule],
) -> Result<PatchReport> {
    let mut working = overrides.to_vec();
    let mut patches = Vec::new();

    for id in graph.action_ids() {
        let action = graph.action(id);
        if action.kind != ActionKind::Link {
            continue;
        }
        let Some(output) = action.primary_output() else {
            continue;
        };
        let Some(old_stem) = stem_without_extensions(&graph.file(output).path) else {
            continue;
        };
        let Some(name) = SuffixedName::parse(old_stem) else {
            continue;
        };
        let suffix = replacement_suffix(&mut working, name.module_name(), name.suffix);
        let new_stem = name.with_suffix(&suffix);

        let response = find_response_argument(&action.arguments, &action.status_description)?;
        let mut arguments: Vec<String> = action
            .arguments
            .iter()
            .map(|a| replace_stem(a, old_stem, &new_stem).0)
            .collect();
        let response = response.map(|r| {
            let file_name = r.path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let (renamed, count) = replace_stem(file_name, old_stem, &new_stem);
            let new_name = if count > 0 {
                renamed
            } else {
                format!("{new_stem}{RESPONSE_EXTENSION}")
            };
            let new_path = r.path.with_file_name(new_name);
            arguments[r.index] = if r.quoted {
                format!("@\"{}\"", new_path.display())
            } else {
                format!("@{}", new_path.display())
            };
            (r.path, new_path)
        });

        let produced = action
            .produced
            .iter()
            .filter_map(|&f| {
                let path = &graph.file(f).path;
                let file_name = path.file_name()?.to_str()?;
                let (renamed, count) = replace_stem(file_name, old_stem, &new_stem);
                (count > 0).then(|| (f, path.with_file_name(renamed)))
            })
            .collect();

        patches.push(LinkPatch {
            action: id,
            old_stem: old_stem.to_string(),
            status_description: replace_stem(&action.status_description, old_stem, &new_stem).0,
            new_stem,
            arguments,
            produced,
            response,
        });
    }

    let renames: Vec<(String, String)> = patches
        .iter()
        .map(|p| (p.old_stem.clone(), p.new_stem.clone()))
        .collect();

    let mut rewritten = Vec::new();
    for (old, new) in patches.iter().filter_map(|p| p.response.as_ref()) {
        let text = std::fs::read_to_string(old).map_err(|e| BuildError::io(old, e))?;
        rewritten.push((new.clone(), rewrite_response_text(&text, &renames, old)?));
    }
    let mut response_files = Vec::new();
    for (path, text) in rewritten {
        std::fs::write(&path, text).map_err(|e| BuildError::io(&path, e))?;
        response_files.push(path);
    }

    let mut remap: HashMap<FileId, FileId> = HashMap::new();
    for patch in patches {
        for (old, new_path) in &patch.produced {
            let new = graph.files.supersede(*old, new_path);
            remap.insert(*old, new);
        }
        if let Some((old_path, new_path)) = &patch.response {
            if let Some(old) = graph.files.find(old_path) {
                let new = graph.files.intern(new_path);
                let action = graph.action_mut(patch.action);
                for prereq in &mut action.prerequisites {
                    if *prereq == old {
                        *prereq = new;
                    }
                }
            }
        }
        let action = graph.action_mut(patch.action);
        action.arguments = patch.arguments;
        action.status_description = patch.status_description;
        for f in &mut action.produced {
            if let Some(&new) = remap.get(f) {
                *f = new;
            }
        }
        vprintln!("  hot reload: {} -> {}", patch.old_stem, patch.new_stem);
    }

    for action in &mut graph.actions {
        let mut touched = false;
        for prereq in &mut action.prerequisites {
            if let Some(&new) = remap.get(prereq) {
                *prereq = new;
                touched = true;
            }
        }
        if touched {
            action.arguments = action
                .arguments
                .iter()
                .map(|a| replace_all_stems(a, &renames))
                .collect();
        }
    }

    for target in targets.iter_mut() {
        for item in &mut target.output_items {
            if let Some(&new) = remap.get(item) {
                *item = new;
            }
        }
        target.only_modules.clone_from(&working);
        if let Some(manifest) = &target.module_manifest {
            patch_module_manifest(manifest, &working)?;
        }
    }

    graph.validate()?;
    Ok(PatchReport {
        renamed: renames,
        response_files,
        overrides: working,
    })
}

/// Module manifest: module name to binary file name.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct ModuleManifest {
    #[serde(default)]
    modules: BTreeMap<String, String>,
}

/// Point each overridden module's manifest entry at its new file name.
fn patch_module_manifest(path: &Path, overrides: &[OnlyModule]) -> Result<()> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            vprintln!("  hot reload: no module manifest at {}", path.display());
            return Ok(());
        }
        Err(e) => return Err(BuildError::io(path, e)),
    };
    let mut manifest: ModuleManifest =
        serde_json::from_str(&text).map_err(|e| BuildError::serialization("module manifest", e))?;

    let mut changed = false;
    for file_name in manifest.modules.values_mut() {
        let (stem, extension) = match file_name.split_once('.') {
            Some((stem, ext)) => (stem, format!(".{ext}")),
            None => (file_name.as_str(), String::new()),
        };
        let Some(name) = SuffixedName::parse(stem) else {
            continue;
        };
        let suffix = overrides
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name.module_name()))
            .and_then(|m| m.suffix.as_deref());
        if let Some(suffix) = suffix {
            let renamed = format!("{}{extension}", name.with_suffix(suffix));
            if renamed != *file_name {
                *file_name = renamed;
                changed = true;
            }
        }
    }

    if changed {
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| BuildError::serialization("module manifest", e))?;
        std::fs::write(path, json).map_err(|e| BuildError::io(path, e))?;
    }
    Ok(())
}

/// Delete older suffixed copies of link outputs flagged for cleanup.
///
/// A copy matches when it lives in the same directory and has the same
/// base, platform/configuration tail and extension, but a different
/// suffix. Returns the number of files removed.
pub fn delete_stale_hot_reload_libraries(graph: &ActionGraph) -> usize {
    let mut deleted = 0;
    for action in graph.actions.iter().filter(|a| a.kind == ActionKind::Link) {
        for &file in &action.produced {
            let item = graph.file(file);
            if !item.needs_hot_reload_cleanup {
                continue;
            }
            let (Some(dir), Some(current)) = (item.path.parent(), item.path.file_name()) else {
                continue;
            };
            let Some(current) = current.to_str() else {
                continue;
            };
            let (stem, extension) = current.split_once('.').unwrap_or((current, ""));
            let Some(name) = SuffixedName::parse(stem) else {
                continue;
            };
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.filter_map(std::result::Result::ok) {
                let file_name = entry.file_name();
                let Some(candidate) = file_name.to_str() else {
                    continue;
                };
                if candidate == current {
                    continue;
                }
                let (c_stem, c_ext) = candidate.split_once('.').unwrap_or((candidate, ""));
                let stale = c_ext == extension
                    && SuffixedName::parse(c_stem).is_some_and(|c| c.base == name.base && c.tail == name.tail);
                if !stale {
                    continue;
                }
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => {
                        vprintln!("  deleted stale hot reload file {}", entry.path().display());
                        deleted += 1;
                    }
                    Err(e) => vprintln!("  cannot delete {}: {e}", entry.path().display()),
                }
            }
        }
    }
    deleted
}
