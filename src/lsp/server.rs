//! LSP server initialization and lifecycle

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tower_lsp::{LspService, Server};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::{CACHE_NAMESPACE, LOG_FILE_NAME, db_path, log_dir};
use crate::lsp::backend::Backend;
use crate::version::cache::{PackageCache, PackageStore};

/// Log to a daily rotated file; stdout carries the protocol
fn init_file_logging() -> WorkerGuard {
    let appender = tracing_appender::rolling::daily(log_dir(), LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();

    guard
}

/// Open the persistent cache, falling back to an in-memory one
pub fn open_cache() -> anyhow::Result<PackageCache> {
    let path = db_path();
    match PackageCache::open(&path, CACHE_NAMESPACE) {
        Ok(cache) => {
            info!("Cache initialized at {:?}", path);
            Ok(cache)
        }
        Err(e) => {
            warn!("Failed to open cache at {:?}: {}; using memory", path, e);
            PackageCache::in_memory(CACHE_NAMESPACE).context("failed to create in-memory cache")
        }
    }
}

/// Clear the persistent cache at `path`. Unlike [`open_cache`] there is no
/// fallback: a cache that cannot be opened is an error.
pub fn clean_cache(path: &Path) -> anyhow::Result<()> {
    let cache = PackageCache::open(path, CACHE_NAMESPACE)
        .with_context(|| format!("failed to open cache at {}", path.display()))?;
    cache.clear().context("failed to clear cache")?;
    info!("Cleared cache at {:?}", path);
    Ok(())
}

/// Start the LSP server on stdin/stdout.
pub async fn run_server() -> anyhow::Result<()> {
    let _guard = init_file_logging();
    let store = Arc::new(open_cache()?);

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(|client| Backend::new(client, store));
    Server::new(stdin, stdout, socket).serve(service).await;

    info!("LSP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::cache::PackageRecord;

    #[test]
    fn clean_cache_empties_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let cache = PackageCache::open(&path, CACHE_NAMESPACE).unwrap();
        cache
            .put(Arc::new(PackageRecord::new(
                "lodash",
                vec!["4.17.21".to_string()],
                "https://registry.npmjs.org",
            )))
            .unwrap();
        drop(cache);

        clean_cache(&path).unwrap();

        let reopened = PackageCache::open(&path, CACHE_NAMESPACE).unwrap();
        assert!(reopened.get("lodash").unwrap().is_none());
    }

    #[test]
    fn clean_cache_reports_unopenable_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let result = clean_cache(&blocker.join("cache.db"));

        assert!(result.is_err());
    }
}
