//! Registry implementations for fetching package versions

pub mod cli;
pub mod http;
pub mod npmrc;
pub mod process;

pub use cli::CliRegistry;
pub use http::HttpRegistry;
pub use npmrc::{Registries, select_registry};

use indexmap::IndexMap;
use serde::Deserialize;
use serde::de::IgnoredAny;

/// `versions` field of a package document.
///
/// The registry answers with a map keyed by version, `npm info --json`
/// with an array. Both keep listing order.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum VersionListing {
    List(Vec<String>),
    Map(IndexMap<String, IgnoredAny>),
}

impl VersionListing {
    pub(crate) fn into_versions(self) -> Vec<String> {
        match self {
            VersionListing::List(versions) => versions,
            VersionListing::Map(map) => map.into_keys().collect(),
        }
    }
}

/// Package document; only the version listing matters
#[derive(Debug, Deserialize)]
pub(crate) struct PackageDocument {
    #[serde(default)]
    pub(crate) versions: Option<VersionListing>,
}
