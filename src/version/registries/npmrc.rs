//! Registry endpoint selection from npmrc files

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::DEFAULT_REGISTRY_URL;

/// Default and per-scope registry endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registries {
    pub default: String,
    /// Keyed by scope including the `@`, e.g. `@company`
    pub scoped: HashMap<String, String>,
}

impl Default for Registries {
    fn default() -> Self {
        Self {
            default: DEFAULT_REGISTRY_URL.to_string(),
            scoped: HashMap::new(),
        }
    }
}

impl Registries {
    /// Parse `registry=<url>` and `@scope:registry=<url>` lines.
    /// Comments and unrelated keys are ignored.
    pub fn parse(content: &str) -> Self {
        let mut registries = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            if value.is_empty() {
                continue;
            }

            if key == "registry" {
                registries.default = value.to_string();
            } else if let Some(scope) = key.strip_suffix(":registry")
                && scope.starts_with('@')
            {
                registries.scoped.insert(scope.to_string(), value.to_string());
            }
        }

        registries
    }

    /// Read an npmrc file; a missing or unreadable file gives the defaults
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                debug!("Loaded registry overrides from {:?}", path);
                Self::parse(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!("Failed to read {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Replace the default endpoint when an explicit one is configured
    pub fn with_default(mut self, default: Option<&str>) -> Self {
        if let Some(default) = default.filter(|d| !d.is_empty()) {
            self.default = default.to_string();
        }
        self
    }
}

/// Endpoint for a package: its scope's registry if configured, else the default
pub fn select_registry<'a>(registries: &'a Registries, package_name: &str) -> &'a str {
    package_name
        .starts_with('@')
        .then(|| package_name.split('/').next())
        .flatten()
        .and_then(|scope| registries.scoped.get(scope))
        .unwrap_or(&registries.default)
}
