//! npm registry HTTP implementation

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::FETCH_TIMEOUT_MS;
use crate::version::error::RegistryError;
use crate::version::registries::PackageDocument;
use crate::version::registry::{RawMetadata, Registry};

/// Abbreviated metadata is enough for version listings and much smaller
const ACCEPT_HEADER: &str = "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8";

/// Registry implementation talking to the registry over HTTP
pub struct HttpRegistry {
    client: reqwest::Client,
}

impl HttpRegistry {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!(
                    env!("CARGO_PKG_NAME"),
                    "/",
                    env!("CARGO_PKG_VERSION")
                ))
                .timeout(Duration::from_millis(FETCH_TIMEOUT_MS))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Encode package name for URL (handles scoped packages)
    fn encode_package_name(package_name: &str) -> String {
        if package_name.starts_with('@') {
            // Scoped package: @scope/name -> @scope%2Fname
            package_name.replace('/', "%2F")
        } else {
            package_name.to_string()
        }
    }
}

impl Default for HttpRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Registry for HttpRegistry {
    async fn fetch(
        &self,
        package_name: &str,
        endpoint: &str,
    ) -> Result<RawMetadata, RegistryError> {
        let endpoint = endpoint.trim_end_matches('/');
        let url = format!("{}/{}", endpoint, Self::encode_package_name(package_name));
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(package_name.to_string()));
        }

        if !status.is_success() {
            warn!("npm registry returned status {}: {}", status, url);
            return Err(RegistryError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let document: PackageDocument = response.json().await.map_err(|e| {
            warn!("Failed to parse npm registry response: {}", e);
            RegistryError::InvalidResponse(e.to_string())
        })?;

        let versions = document
            .versions
            .ok_or_else(|| RegistryError::Empty(package_name.to_string()))?
            .into_versions();

        Ok(RawMetadata {
            versions,
            registry: endpoint.to_string(),
        })
    }
}
