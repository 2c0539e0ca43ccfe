use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Corrupt cache row for {package}: {reason}")]
    Corrupt { package: String, reason: String },

    #[error("Failed to create cache directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single registry fetch
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Package not found: {0}")]
    NotFound(String),

    #[error("Process exited with {code:?}: {stderr}")]
    Process { code: Option<i32>, stderr: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Registry returned no versions for {0}")]
    Empty(String),

    #[error("Request for {0} was dropped before completing")]
    Dropped(String),
}
