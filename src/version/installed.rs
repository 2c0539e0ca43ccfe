//! Lookup of the version installed on disk

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{INSTALL_DIR, MANIFEST_FILE};

#[derive(Debug, Deserialize)]
struct InstalledManifest {
    version: Option<String>,
}

/// Version declared by `<project_root>/node_modules/<name>/package.json`.
///
/// Any failure (not installed, unreadable, malformed) yields None,
/// meaning the installed version is unknown.
pub async fn read_installed_version(project_root: &Path, package_name: &str) -> Option<String> {
    let path = project_root
        .join(INSTALL_DIR)
        .join(package_name)
        .join(MANIFEST_FILE);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => {
            debug!("No installed manifest for {} at {:?}: {}", package_name, path, e);
            return None;
        }
    };

    match serde_json::from_str::<InstalledManifest>(&content) {
        Ok(manifest) => manifest.version,
        Err(e) => {
            warn!("Failed to parse installed manifest {:?}: {}", path, e);
            None
        }
    }
}
