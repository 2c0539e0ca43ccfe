use serde::Deserialize;
use std::path::PathBuf;

// =============================================================================
// Time-related constants
// =============================================================================

/// Default cache refresh frequency in minutes
pub const DEFAULT_REFRESH_FREQUENCY_MINUTES: u64 = 60;

/// Lower bound accepted for the cache refresh frequency (minutes)
pub const MIN_REFRESH_FREQUENCY_MINUTES: u64 = 10;

/// Upper bound accepted for the cache refresh frequency (minutes, one day)
pub const MAX_REFRESH_FREQUENCY_MINUTES: u64 = 1440;

/// Timeout for fetch operations in milliseconds (30 seconds)
pub const FETCH_TIMEOUT_MS: u64 = 30_000;

/// Timeout for package installs in milliseconds (5 minutes)
pub const INSTALL_TIMEOUT_MS: u64 = 300_000;

// =============================================================================
// Registry-related constants
// =============================================================================

/// Default number of registry requests allowed in flight at once
pub const DEFAULT_REQUEST_POOL_SIZE: usize = 10;

/// Default npm registry endpoint
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";

/// Base of the package pages linked from dependency names
pub const NPM_PACKAGE_PAGE_URL: &str = "https://www.npmjs.com/package";

/// Directory holding installed packages, relative to the project root
pub const INSTALL_DIR: &str = "node_modules";

/// Manifest file name, both for the edited file and installed packages
pub const MANIFEST_FILE: &str = "package.json";

/// Name of the cache namespace used by this server
pub const CACHE_NAMESPACE: &str = env!("CARGO_PKG_NAME");

/// LSP configuration structure
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LspConfig {
    /// Highest prerelease level considered when looking for new versions
    pub prerelease: PrereleaseLevel,
    /// Display informational diagnostics
    pub info: bool,
    /// Compare the declared range with the copy installed in node_modules
    pub check_installed: bool,
    /// Package manager used for installs and CLI registry queries
    pub npm_client: NpmClient,
    /// How registry metadata is fetched
    pub registry_client: RegistryClientKind,
    /// Cache refresh frequency in minutes
    pub cache_refresh_frequency: u64,
    /// Maximum concurrent registry requests (0 = unbounded)
    pub request_pool_size: usize,
    /// Publish diagnostics as each dependency resolves
    pub stream_reporting: bool,
    /// Path of the npmrc file, relative to the project root
    pub npmrc: String,
    /// Explicit default registry, takes precedence over the npmrc file
    pub registry: Option<String>,
}

impl Default for LspConfig {
    fn default() -> Self {
        Self {
            prerelease: PrereleaseLevel::default(),
            info: false,
            check_installed: true,
            npm_client: NpmClient::default(),
            registry_client: RegistryClientKind::default(),
            cache_refresh_frequency: DEFAULT_REFRESH_FREQUENCY_MINUTES,
            request_pool_size: DEFAULT_REQUEST_POOL_SIZE,
            stream_reporting: true,
            npmrc: ".npmrc".to_string(),
            registry: None,
        }
    }
}

impl LspConfig {
    /// Refresh frequency clamped to the supported bounds
    pub fn refresh_frequency_minutes(&self) -> u64 {
        self.cache_refresh_frequency.clamp(
            MIN_REFRESH_FREQUENCY_MINUTES,
            MAX_REFRESH_FREQUENCY_MINUTES,
        )
    }
}

/// Prerelease ceiling, ordered from the most to the least stable level.
///
/// Selecting a level allows every level before it: `beta` accepts stable,
/// `rc` and `beta` versions.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PrereleaseLevel {
    #[default]
    Stable,
    Rc,
    Beta,
    Alpha,
    Dev,
}

impl PrereleaseLevel {
    const ALL: [PrereleaseLevel; 5] = [
        PrereleaseLevel::Stable,
        PrereleaseLevel::Rc,
        PrereleaseLevel::Beta,
        PrereleaseLevel::Alpha,
        PrereleaseLevel::Dev,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PrereleaseLevel::Stable => "stable",
            PrereleaseLevel::Rc => "rc",
            PrereleaseLevel::Beta => "beta",
            PrereleaseLevel::Alpha => "alpha",
            PrereleaseLevel::Dev => "dev",
        }
    }

    /// Tags allowed by this ceiling, in stability order
    pub fn allowed_tags(&self) -> Vec<String> {
        Self::ALL
            .iter()
            .filter(|level| *level <= self)
            .map(|level| level.as_str().to_string())
            .collect()
    }
}

/// Package manager client
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NpmClient {
    #[default]
    Npm,
    Yarn,
}

impl NpmClient {
    pub fn program(&self) -> &'static str {
        match self {
            NpmClient::Npm => "npm",
            NpmClient::Yarn => "yarn",
        }
    }
}

/// Strategy used to reach the registry
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistryClientKind {
    /// Direct HTTP requests to the registry
    #[default]
    Http,
    /// `npm info` / `yarn info` subprocess
    Cli,
}

/// Returns the path to the data directory for npm-outdated-lsp.
/// Uses $XDG_DATA_HOME/npm-outdated-lsp if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/npm-outdated-lsp,
/// or ./npm-outdated-lsp if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the database file.
pub fn db_path() -> PathBuf {
    data_dir().join("cache.db")
}

/// Prefix of the daily log files
pub const LOG_FILE_NAME: &str = "npm-outdated-lsp.log";

/// Returns the directory receiving log files.
pub fn log_dir() -> PathBuf {
    data_dir()
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("npm-outdated-lsp")
}
