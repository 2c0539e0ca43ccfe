//! Version management layer for npm dependency checking
//!
//! This module fetches, caches and evaluates package version listings for the
//! ranges declared in a manifest.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Resolver   │────▶│    Cache    │     │   Policy    │
//! │ (orchestr.) │     │  (storage)  │     │(range, pre) │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                                       ▲
//!        ▼                                       │
//! ┌─────────────┐     ┌─────────────┐            │
//! │  Scheduler  │────▶│  Registry   │     verdict per dependency
//! │ (bounded)   │     │ (http, cli) │
//! └─────────────┘     └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: In-memory cache over SQLite persistence
//! - [`error`]: Error types for cache and registry operations
//! - [`installed`]: Version installed on disk
//! - [`policy`]: Prerelease filtering, range checks, ignorable ranges
//! - [`range`]: npm range grammar
//! - [`registry`]: Registry trait for fetching version listings
//! - [`registries`]: Concrete registry clients and endpoint selection
//! - [`resolver`]: Dependency resolution and check fan-out
//! - [`scheduler`]: Bounded request pool
//! - [`semver`]: Shared semver utilities

pub mod cache;
pub mod error;
pub mod installed;
pub mod policy;
pub mod range;
pub mod registries;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod semver;
