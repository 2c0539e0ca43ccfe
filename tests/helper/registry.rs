//! Registry test utilities

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use npm_outdated_lsp::version::cache::{PackageCache, PackageRecord, PackageStore};
use npm_outdated_lsp::version::error::RegistryError;
use npm_outdated_lsp::version::registry::{RawMetadata, Registry};

/// Mock registry for testing
#[derive(Default)]
pub struct MockRegistry {
    versions: HashMap<String, Vec<String>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_versions(mut self, package: &str, versions: Vec<&str>) -> Self {
        self.versions.insert(
            package.to_string(),
            versions.into_iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    /// Answer every fetch after `delay`
    #[allow(dead_code)]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of fetches served so far
    #[allow(dead_code)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Registry for MockRegistry {
    async fn fetch(&self, package_name: &str, endpoint: &str) -> Result<RawMetadata, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.versions.get(package_name) {
            Some(versions) => Ok(RawMetadata {
                versions: versions.clone(),
                registry: endpoint.to_string(),
            }),
            None => Err(RegistryError::NotFound(package_name.to_string())),
        }
    }
}

/// Create a test cache with pre-populated versions
pub fn create_test_cache(versions: &[(&str, Vec<&str>)]) -> (TempDir, Arc<PackageCache>) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let cache = PackageCache::open(&db_path, "test").unwrap();

    for (package_name, package_versions) in versions {
        cache
            .put(Arc::new(PackageRecord::new(
                *package_name,
                package_versions.iter().map(|v| v.to_string()).collect(),
                "https://registry.npmjs.org",
            )))
            .unwrap();
    }

    (temp_dir, Arc::new(cache))
}
