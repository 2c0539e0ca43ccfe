//! Version selection policy
//!
//! Pure functions over registry version listings: stability classification,
//! prerelease filtering, range checks and the heuristics deciding whether a
//! declared range refers to the registry at all.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;

use crate::version::range::VersionSpec;
use crate::version::semver::{parse_version, prerelease_tag};

/// Label used for versions without a prerelease identifier
pub const STABLE_LABEL: &str = "stable";

static GIT_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^git(\+(ssh|https?|file)://)?").expect("valid git range pattern")
});
static URL_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.+://").expect("valid url range pattern"));
static PATH_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".+/.+").expect("valid path range pattern"));

/// Protocols of local or workspace dependencies
const LOCAL_PROTOCOLS: &[&str] = &["file:", "workspace:", "link:", "portal:"];

/// True iff the version carries no prerelease identifier.
/// Unparsable versions are not stable.
pub fn is_stable(version: &str) -> bool {
    parse_version(version).is_some_and(|v| v.pre.is_empty())
}

/// Stability label of a version: `stable` or its prerelease tag
pub fn stability_label(version: &Version) -> &str {
    prerelease_tag(version).unwrap_or(STABLE_LABEL)
}

/// Semver precedence, ignoring build metadata
fn precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

/// Keep stable versions and prereleases whose tag is allowed, sorted ascending.
///
/// The sort is stable: versions of equal precedence keep the registry listing
/// order. Versions that do not parse are dropped.
pub fn filter_by_policy(versions: &[String], allowed_prerelease_tags: &[String]) -> Vec<String> {
    let mut kept: Vec<(&String, Version)> = versions
        .iter()
        .filter_map(|raw| parse_version(raw).map(|parsed| (raw, parsed)))
        .filter(|(_, parsed)| match prerelease_tag(parsed) {
            None => true,
            Some(tag) => allowed_prerelease_tags.iter().any(|allowed| allowed == tag),
        })
        .collect();

    kept.sort_by(|(_, a), (_, b)| precedence(a, b));

    kept.into_iter().map(|(raw, _)| raw.clone()).collect()
}

/// Most recent candidate
pub fn latest(candidates: &[String]) -> Option<&String> {
    candidates.last()
}

/// Most recent stable candidate
pub fn latest_stable(candidates: &[String]) -> Option<&String> {
    candidates.iter().rev().find(|v| is_stable(v))
}

/// True iff the range parses under the npm range grammar
pub fn range_is_valid(range: &str) -> bool {
    VersionSpec::parse(range).is_some()
}

/// Range membership; false when either side does not parse
pub fn satisfies(version: &str, range: &str) -> bool {
    let (Some(version), Some(spec)) = (parse_version(version), VersionSpec::parse(range)) else {
        return false;
    };
    spec.satisfies(&version)
}

/// True when the range does not point at the registry at all:
/// git references, URLs, local paths and workspace protocols.
pub fn can_range_be_ignored(range: &str) -> bool {
    let range = range.trim();
    GIT_RANGE.is_match(range)
        || URL_RANGE.is_match(range)
        || LOCAL_PROTOCOLS.iter().any(|p| range.starts_with(p))
        || PATH_RANGE.is_match(range)
}

/// Extract the version prefix (operator) from a version range.
///
/// Anything before the first digit is kept, so `^1.0.0` gives `^`,
/// `>= 1.0.0` gives `>= ` and `1.0.0` gives an empty prefix.
pub fn extract_version_prefix(range: &str) -> &str {
    let end = range
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(range.len());
    &range[..end]
}
