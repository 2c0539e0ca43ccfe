//! Common types for the manifest parser

use tracing::warn;

use crate::config::MANIFEST_FILE;
use crate::parser::error::ParseError;

/// Check whether a document URI points at a manifest this server handles
pub fn is_manifest(uri: &str) -> bool {
    uri.rsplit(['/', '\\']).next() == Some(MANIFEST_FILE)
}

/// Information about a dependency found in a manifest, with its location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    /// Package name (e.g., "lodash", "@types/node")
    pub name: String,
    /// Declared range as written (without an `npm:` alias prefix)
    pub version: String,
    /// Byte offset of the version string in the source (start)
    pub start_offset: usize,
    /// Byte offset of the version string in the source (end)
    pub end_offset: usize,
    /// Line number (0-indexed)
    pub line: usize,
    /// Column number (0-indexed)
    pub column: usize,
    /// Line of the dependency key (0-indexed)
    pub key_line: usize,
    /// Column of the dependency key, past its opening quote (0-indexed)
    pub key_column: usize,
    /// Length of the dependency key without quotes
    pub key_length: usize,
}

/// One declared dependency, as consumed by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    /// Range as written; may be malformed
    pub declared_range: String,
    /// Version present on disk, when already known
    pub installed_version: Option<String>,
}

impl Dependency {
    pub fn new(name: impl Into<String>, declared_range: impl Into<String>) -> Result<Self, ParseError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ParseError::InvalidDependency(
                "package name is empty".to_string(),
            ));
        }
        Ok(Self {
            name,
            declared_range: declared_range.into(),
            installed_version: None,
        })
    }

    pub fn with_installed_version(mut self, version: impl Into<String>) -> Self {
        self.installed_version = Some(version.into());
        self
    }
}

impl TryFrom<&PackageInfo> for Dependency {
    type Error = ParseError;

    fn try_from(info: &PackageInfo) -> Result<Self, Self::Error> {
        Dependency::new(&info.name, &info.version)
    }
}

/// Resolver input for every located package; invalid entries are skipped
pub fn to_dependencies(packages: &[PackageInfo]) -> Vec<Dependency> {
    packages
        .iter()
        .filter_map(|package| {
            Dependency::try_from(package)
                .inspect_err(|e| warn!("Skipping dependency: {}", e))
                .ok()
        })
        .collect()
}
