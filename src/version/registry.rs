//! Registry trait for fetching package metadata

#[cfg(test)]
use mockall::automock;

use crate::version::error::RegistryError;

/// Raw result of one registry fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMetadata {
    /// Version strings in registry listing order
    pub versions: Vec<String>,
    /// Registry origin that answered the request
    pub registry: String,
}

/// Trait for fetching package versions from a registry
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    /// Fetches every published version of a package
    ///
    /// # Arguments
    /// * `package_name` - The package name, scope included (e.g., "@types/node")
    /// * `endpoint` - Registry endpoint already selected for this package
    ///
    /// # Returns
    /// * `Ok(RawMetadata)` - Listing as reported by the registry, unfiltered
    /// * `Err(RegistryError)` - Network, process, parse or empty-result failure
    async fn fetch(&self, package_name: &str, endpoint: &str)
    -> Result<RawMetadata, RegistryError>;
}
