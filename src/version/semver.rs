use semver::Version;

/// Parse a complete version string into a semver::Version.
///
/// Accepts the leading `v` or `=` that npm tolerates on published versions.
/// Partial versions ("1", "1.2") are not versions and yield None.
///
/// Examples:
/// - "1.2.3" -> Version(1, 2, 3)
/// - "v1.2.3-beta.1" -> Version(1, 2, 3, pre = "beta.1")
/// - "1.2" -> None
pub fn parse_version(version: &str) -> Option<Version> {
    let trimmed = version.trim();
    let trimmed = trimmed
        .strip_prefix('=')
        .unwrap_or(trimmed)
        .trim_start();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).ok()
}

/// First identifier of the prerelease part, e.g. "beta" for "2.0.0-beta.3".
///
/// Returns None for stable versions.
pub fn prerelease_tag(version: &Version) -> Option<&str> {
    if version.pre.is_empty() {
        return None;
    }
    version.pre.as_str().split('.').next()
}
