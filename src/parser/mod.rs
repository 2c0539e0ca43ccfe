//! Parser layer
//! - error.rs: ParseError
//! - types.rs: Common types (PackageInfo, Dependency)
//! - package_json.rs: package.json parser

pub mod error;
pub mod package_json;
pub mod types;

pub use error::ParseError;
pub use package_json::PackageJsonParser;
pub use types::{Dependency, PackageInfo, is_manifest};
