//! Reflection metadata probe.
//!
//! The reflection code generator itself is external; the build core only
//! needs to know whether a header currently carries reflection markup.

use std::path::Path;

use walkdir::WalkDir;

/// Header extensions considered by the probe.
const HEADER_EXTENSIONS: &[&str] = &["h", "hh", "hpp", "hxx", "inl"];

/// Answers "does this header carry reflection metadata".
pub trait ReflectionProbe: Send + Sync {
    /// Returns `true` if `header` contains reflection markup.
    fn has_reflection_metadata(&self, header: &Path) -> bool;
}

/// Probe that looks for marker tokens in the header text.
#[derive(Debug, Clone)]
pub struct MarkerProbe {
    markers: Vec<String>,
}

impl MarkerProbe {
    /// Create a probe for the given marker tokens.
    pub fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }
}

impl ReflectionProbe for MarkerProbe {
    fn has_reflection_metadata(&self, header: &Path) -> bool {
        std::fs::read_to_string(header)
            .is_ok_and(|text| self.markers.iter().any(|m| text.contains(m.as_str())))
    }
}

/// Returns `true` if `path` has a header extension.
pub fn is_header(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| HEADER_EXTENSIONS.iter().any(|h| e.eq_ignore_ascii_case(h)))
}

/// Every header under `dir`, in sorted order.
pub fn headers_under(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_header(e.path()))
}
