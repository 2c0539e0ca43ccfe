//! Dependency resolution
//!
//! Drives cache, scheduler, registry and policy for each declared dependency
//! and produces one [`ResolutionResult`] per resolvable dependency.
//!
//! Stale cache entries are served immediately while a background refresh
//! replaces them. Concurrent lookups of the same package share one fetch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared, join_all, ready};
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use tracing::{debug, warn};

use crate::config::{LspConfig, NpmClient};
use crate::parser::types::Dependency;
use crate::version::cache::{PackageRecord, PackageStore, is_stale};
use crate::version::error::RegistryError;
use crate::version::installed::read_installed_version;
use crate::version::policy::{
    can_range_be_ignored, extract_version_prefix, filter_by_policy, latest, latest_stable,
    range_is_valid, satisfies,
};
use crate::version::registries::{Registries, select_registry};
use crate::version::scheduler::RequestScheduler;
use crate::version::semver::parse_version;

type FetchResult = Result<Arc<PackageRecord>, Arc<RegistryError>>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Immutable per-check settings
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// `stable` plus every prerelease tag accepted
    pub allowed_prerelease_tags: Vec<String>,
    pub check_installed: bool,
    pub refresh_frequency_minutes: u64,
    pub npm_client: NpmClient,
    /// Directory holding the manifest and its install directory
    pub project_root: Option<PathBuf>,
    pub registries: Arc<Registries>,
}

impl ResolveOptions {
    pub fn from_config(
        config: &LspConfig,
        project_root: Option<PathBuf>,
        registries: Registries,
    ) -> Self {
        Self {
            allowed_prerelease_tags: config.prerelease.allowed_tags(),
            check_installed: config.check_installed,
            refresh_frequency_minutes: config.refresh_frequency_minutes(),
            npm_client: config.npm_client,
            project_root,
            registries: Arc::new(registries.with_default(config.registry.as_deref())),
        }
    }
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self::from_config(&LspConfig::default(), None, Registries::default())
    }
}

/// Terminal state of one dependency check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    RangeInvalid,
    NoUpgrade,
    UpgradeAvailable,
    PackageNotFound,
}

/// Verdict for one dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionResult {
    pub name: String,
    pub declared_range: String,
    /// Ascending, filtered by the prerelease policy
    pub candidate_versions: Vec<String>,
    pub outcome: Outcome,
    pub installed_version: Option<String>,
    pub latest: Option<String>,
    pub latest_stable: Option<String>,
    /// Version the range should point at (the latest candidate)
    pub recommended_version: Option<String>,
    /// Replacement range keeping the declared prefix style, e.g. `^1.0.0`
    pub suggested_range: Option<String>,
    /// The latest stable version differs from the latest and is out of range too
    pub stable_head_out_of_range: bool,
    /// Range is satisfied but loose enough that pinning to latest is worth noting
    pub can_be_updated: bool,
    /// Installed copy is out of range or behind the latest candidate
    pub installed_outdated: bool,
    /// Registry the listing came from
    pub registry: Option<String>,
}

impl ResolutionResult {
    fn unresolved(dependency: &Dependency, outcome: Outcome, installed: Option<String>) -> Self {
        Self {
            name: dependency.name.clone(),
            declared_range: dependency.declared_range.clone(),
            candidate_versions: Vec::new(),
            outcome,
            installed_version: installed,
            latest: None,
            latest_stable: None,
            recommended_version: None,
            suggested_range: None,
            stable_head_out_of_range: false,
            can_be_updated: false,
            installed_outdated: false,
            registry: None,
        }
    }
}

/// Replacement range: the declared operator followed by `version`.
/// Compound ranges fall back to the bare version.
pub fn suggest_range(declared_range: &str, version: &str) -> String {
    let declared = declared_range.trim();
    let prefix = extract_version_prefix(declared);
    let tail = &declared[prefix.len()..];
    if tail.contains(char::is_whitespace) || tail.contains('|') {
        return version.to_string();
    }
    match prefix.trim_end() {
        operator @ ("" | "^" | "~" | ">=" | "=" | "v") => format!("{operator}{version}"),
        _ => version.to_string(),
    }
}

/// Compute the verdict for a dependency whose range is valid
pub fn assess(
    dependency: &Dependency,
    record: Option<&PackageRecord>,
    installed: Option<String>,
    options: &ResolveOptions,
) -> ResolutionResult {
    let range = dependency.declared_range.as_str();
    let candidates = record
        .map(|r| filter_by_policy(&r.versions, &options.allowed_prerelease_tags))
        .unwrap_or_default();

    let installed_out_of_range = options.check_installed
        && installed
            .as_deref()
            .is_some_and(|v| parse_version(v).is_some() && !satisfies(v, range));

    let Some(latest_version) = latest(&candidates).cloned() else {
        let mut result = ResolutionResult::unresolved(dependency, Outcome::PackageNotFound, installed);
        result.installed_outdated = installed_out_of_range;
        return result;
    };
    let latest_stable_version = latest_stable(&candidates).cloned();

    let mut stable_head_out_of_range = false;
    let mut can_be_updated = false;
    let outcome = if !satisfies(&latest_version, range) {
        stable_head_out_of_range = latest_stable_version
            .as_deref()
            .is_some_and(|s| s != latest_version && !satisfies(s, range));
        Outcome::UpgradeAvailable
    } else {
        // A range still matching the previous candidate could be tightened
        can_be_updated = candidates.len() > 1
            && candidates
                .get(candidates.len() - 2)
                .is_some_and(|previous| satisfies(previous, range));
        Outcome::NoUpgrade
    };

    let installed_behind = options.check_installed
        && installed
            .as_deref()
            .and_then(parse_version)
            .zip(parse_version(&latest_version))
            .is_some_and(|(installed, latest)| installed < latest);

    ResolutionResult {
        name: dependency.name.clone(),
        declared_range: dependency.declared_range.clone(),
        outcome,
        installed_version: installed,
        suggested_range: Some(suggest_range(range, &latest_version)),
        recommended_version: Some(latest_version.clone()),
        latest: Some(latest_version),
        latest_stable: latest_stable_version,
        stable_head_out_of_range,
        can_be_updated,
        installed_outdated: installed_out_of_range || installed_behind,
        registry: record.map(|r| r.registry.clone()),
        candidate_versions: candidates,
    }
}

pub struct DependencyResolver<S: PackageStore + 'static> {
    store: Arc<S>,
    scheduler: Arc<RequestScheduler>,
    in_flight: Arc<Mutex<HashMap<String, SharedFetch>>>,
}

enum Lookup {
    Cached(Arc<PackageRecord>),
    Pending(SharedFetch),
}

impl<S: PackageStore + 'static> DependencyResolver<S> {
    pub fn new(store: Arc<S>, scheduler: Arc<RequestScheduler>) -> Self {
        Self {
            store,
            scheduler,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, SharedFetch>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached(&self, package_name: &str) -> Option<Arc<PackageRecord>> {
        self.store
            .get(package_name)
            .inspect_err(|e| warn!("Failed to read cache for {}: {}", package_name, e))
            .ok()
            .flatten()
    }

    /// Join the fetch already running for a package or start one.
    ///
    /// With `reuse_cached`, a record stored while the caller was looking is
    /// returned instead: the fetch puts its record before leaving the map.
    fn join_or_start(&self, package_name: &str, endpoint: &str, reuse_cached: bool) -> Lookup {
        let mut in_flight = self.lock_in_flight();

        if let Some(pending) = in_flight.get(package_name) {
            return Lookup::Pending(pending.clone());
        }

        if reuse_cached && let Some(record) = self.cached(package_name) {
            return Lookup::Cached(record);
        }

        // Queued now, so requests are serviced in lookup order
        let request = self.scheduler.submit(package_name, endpoint);
        let store = Arc::clone(&self.store);
        let map = Arc::clone(&self.in_flight);
        let name = package_name.to_string();
        let endpoint = endpoint.to_string();

        let fetch = async move {
            let result = match request.await {
                Ok(raw) => {
                    let record = Arc::new(PackageRecord::new(&name, raw.versions, raw.registry));
                    if let Err(e) = store.put(Arc::clone(&record)) {
                        warn!("Failed to cache {}: {}", name, e);
                    }
                    Ok(record)
                }
                Err(e) => {
                    warn!("Failed to fetch {} from {}: {}", name, endpoint, e);
                    Err(Arc::new(e))
                }
            };
            map.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&name);
            result
        }
        .boxed()
        .shared();

        in_flight.insert(package_name.to_string(), fetch.clone());
        // Runs to completion even when every waiter goes away
        tokio::spawn(fetch.clone());
        Lookup::Pending(fetch)
    }

    /// Record for a package: cached (refreshed in the background when stale)
    /// or freshly fetched. None when the fetch fails.
    async fn lookup(&self, package_name: &str, options: &ResolveOptions) -> Option<Arc<PackageRecord>> {
        let endpoint = select_registry(&options.registries, package_name);

        if let Some(record) = self.cached(package_name) {
            if is_stale(&record, options.refresh_frequency_minutes, Utc::now()) {
                debug!("Refreshing stale record for {}", package_name);
                self.join_or_start(package_name, endpoint, false);
            }
            return Some(record);
        }

        match self.join_or_start(package_name, endpoint, true) {
            Lookup::Cached(record) => Some(record),
            Lookup::Pending(fetch) => fetch.await.ok(),
        }
    }

    async fn installed_version(&self, dependency: &Dependency, options: &ResolveOptions) -> Option<String> {
        if dependency.installed_version.is_some() {
            return dependency.installed_version.clone();
        }
        match (&options.project_root, options.check_installed) {
            (Some(root), true) => read_installed_version(root, &dependency.name).await,
            _ => None,
        }
    }

    /// Resolve one dependency. None when its range does not refer to the
    /// registry (git, url, path, workspace references).
    pub async fn resolve(
        &self,
        dependency: &Dependency,
        options: &ResolveOptions,
    ) -> Option<ResolutionResult> {
        let range = dependency.declared_range.as_str();
        if can_range_be_ignored(range) {
            debug!("Ignoring {} ({})", dependency.name, range);
            return None;
        }

        if !range_is_valid(range) {
            debug!("Invalid range for {}: {}", dependency.name, range);
            return Some(ResolutionResult::unresolved(
                dependency,
                Outcome::RangeInvalid,
                dependency.installed_version.clone(),
            ));
        }

        let (record, installed) = tokio::join!(
            self.lookup(&dependency.name, options),
            self.installed_version(dependency, options)
        );

        Some(assess(dependency, record.as_deref(), installed, options))
    }

    /// Resolve every dependency concurrently, yielding results as they complete
    pub fn check_streaming<'a>(
        &'a self,
        dependencies: Vec<Dependency>,
        options: &'a ResolveOptions,
    ) -> impl Stream<Item = ResolutionResult> + 'a {
        dependencies
            .into_iter()
            .map(|dependency| async move { self.resolve(&dependency, options).await })
            .collect::<FuturesUnordered<_>>()
            .filter_map(ready)
    }

    /// Resolve every dependency concurrently; results keep manifest order
    pub async fn check(
        &self,
        dependencies: &[Dependency],
        options: &ResolveOptions,
    ) -> Vec<ResolutionResult> {
        join_all(dependencies.iter().map(|d| self.resolve(d, options)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Versions offered for completion, newest last. None if the package
    /// cannot be found.
    pub async fn candidates(&self, package_name: &str, options: &ResolveOptions) -> Option<Vec<String>> {
        let record = self.lookup(package_name, options).await?;
        Some(filter_by_policy(
            &record.versions,
            &options.allowed_prerelease_tags,
        ))
    }

    /// Wait until every fetch started so far, background refreshes
    /// included, has stored its result
    pub async fn settle(&self) {
        loop {
            let pending: Vec<SharedFetch> = self.lock_in_flight().values().cloned().collect();
            if pending.is_empty() {
                return;
            }
            join_all(pending).await;
        }
    }

    /// Drop every cached record
    pub fn clear_cache(&self) -> Result<(), crate::version::error::CacheError> {
        self.store.clear()
    }
}

/// Per-document check generations, so results of superseded checks can be
/// discarded
#[derive(Debug, Default)]
pub struct GenerationTracker {
    generations: Mutex<HashMap<String, u64>>,
}

impl GenerationTracker {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new check for `key`, superseding earlier ones
    pub fn begin(&self, key: &str) -> u64 {
        let mut generations = self.lock();
        let generation = generations.entry(key.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    /// True while no newer check has begun and the key was not forgotten
    pub fn is_current(&self, key: &str, generation: u64) -> bool {
        self.lock().get(key) == Some(&generation)
    }

    /// Invalidate every running check for `key`
    pub fn forget(&self, key: &str) {
        self.lock().remove(key);
    }
}
