//! npm version range grammar
//!
//! Supports npm semver range specifications:
//! - `1.2.3`, `=1.2.3`, `v1.2.3` - exact match
//! - `^1.2.3` - compatible with version (>=1.2.3 <2.0.0)
//! - `~1.2.3`, `~>1.2.3` - approximately equivalent (>=1.2.3 <1.3.0)
//! - `>=1.2.3`, `>1.2.3`, `<=1.2.3`, `<1.2.3` - comparison operators
//! - `1.2.x`, `1.x`, `1`, `*`, `x`, `""` - wildcards and partial versions
//! - `1.0.0 - 2.0.0` - hyphen ranges
//! - `>=1.0.0 <2.0.0` - AND (space separated)
//! - `^1.0.0 || ^2.0.0` - OR
//!
//! Prerelease versions only satisfy a comparator set when one of its
//! comparators carries a prerelease on the same `major.minor.patch`.

use semver::{Prerelease, Version};

/// Parsed range: an OR of comparator sets, each set an AND of comparators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpec {
    sets: Vec<Vec<Comparator>>,
}

impl VersionSpec {
    /// Parse a version specification string, None if it is not a valid range
    pub fn parse(spec: &str) -> Option<Self> {
        let sets = spec
            .split("||")
            .map(parse_comparator_set)
            .collect::<Option<Vec<_>>>()?;
        Some(Self { sets })
    }

    /// Check if a version satisfies this spec
    pub fn satisfies(&self, version: &Version) -> bool {
        self.sets.iter().any(|set| set_satisfies(set, version))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn new(op: Op, version: Version) -> Self {
        Self { op, version }
    }

    fn matches(&self, version: &Version) -> bool {
        match self.op {
            Op::Eq => version == &self.version,
            Op::Gt => version > &self.version,
            Op::Gte => version >= &self.version,
            Op::Lt => version < &self.version,
            Op::Lte => version <= &self.version,
        }
    }
}

fn set_satisfies(set: &[Comparator], version: &Version) -> bool {
    if !set.iter().all(|c| c.matches(version)) {
        return false;
    }

    if version.pre.is_empty() {
        return true;
    }

    set.iter().any(|c| {
        !c.version.pre.is_empty()
            && c.version.major == version.major
            && c.version.minor == version.minor
            && c.version.patch == version.patch
    })
}

/// Parse one `||` branch into its AND-ed comparators
fn parse_comparator_set(part: &str) -> Option<Vec<Comparator>> {
    let part = part.trim();
    if part.is_empty() {
        return Some(Vec::new());
    }

    if let Some(range) = VersionRange::parse_hyphen(part) {
        return Some(range.comparators());
    }

    let mut comparators = Vec::new();
    for token in join_operator_tokens(part) {
        comparators.extend(VersionRange::parse(&token)?.comparators());
    }
    Some(comparators)
}

/// Split on whitespace, re-attaching dangling operators: `>= 1.2.3` -> `>=1.2.3`
fn join_operator_tokens(part: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_operator: Option<&str> = None;

    for word in part.split_whitespace() {
        let is_operator = word.chars().all(|c| matches!(c, '<' | '>' | '=' | '^' | '~'));
        match pending_operator.take() {
            Some(op) => tokens.push(format!("{op}{word}")),
            None if is_operator => pending_operator = Some(word),
            None => tokens.push(word.to_string()),
        }
    }

    if let Some(op) = pending_operator {
        tokens.push(op.to_string());
    }
    tokens
}

/// A version with optional (wildcard) components, e.g. `1.2`, `1.x`, `*`
#[derive(Debug, Clone, PartialEq, Eq)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Prerelease,
}

impl Partial {
    fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let input = input.strip_prefix('=').unwrap_or(input);
        let input = input.strip_prefix('v').unwrap_or(input);
        if input.is_empty() {
            return None;
        }

        // Build metadata never affects matching
        let input = input.split('+').next().unwrap_or(input);

        let (core, pre) = match input.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (input, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 {
            return None;
        }

        let mut numbers = [None; 3];
        let mut wildcard_seen = false;
        for (slot, part) in numbers.iter_mut().zip(parts.iter()) {
            if matches!(*part, "x" | "X" | "*") {
                wildcard_seen = true;
                continue;
            }
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            if !wildcard_seen {
                *slot = Some(part.parse::<u64>().ok()?);
            }
        }

        let pre = match pre {
            Some(pre) => {
                // Prerelease tags only make sense on a complete version
                if numbers.iter().any(Option::is_none) {
                    return None;
                }
                Prerelease::new(pre).ok()?
            }
            None => Prerelease::EMPTY,
        };

        Some(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre,
        })
    }

    fn is_any(&self) -> bool {
        self.major.is_none()
    }

    fn is_complete(&self) -> bool {
        self.patch.is_some()
    }

    /// Missing components filled with zeros
    fn floor(&self) -> Version {
        let mut version = Version::new(
            self.major.unwrap_or(0),
            self.minor.unwrap_or(0),
            self.patch.unwrap_or(0),
        );
        version.pre = self.pre.clone();
        version
    }

    /// Smallest version above every version matched by this partial
    fn ceiling(&self) -> Option<Version> {
        match (self.major, self.minor, self.patch) {
            (Some(major), None, _) => Some(lowest(major.saturating_add(1), 0, 0)),
            (Some(major), Some(minor), None) => Some(lowest(major, minor.saturating_add(1), 0)),
            _ => None,
        }
    }
}

/// `major.minor.patch-0`, the lowest version of a release line
fn lowest(major: u64, minor: u64, patch: u64) -> Version {
    let mut version = Version::new(major, minor, patch);
    version.pre = Prerelease::new("0").unwrap_or_default();
    version
}

/// Comparator that no version satisfies
fn nothing() -> Vec<Comparator> {
    vec![Comparator::new(Op::Lt, lowest(0, 0, 0))]
}

/// Represents a single npm range token
#[derive(Debug)]
enum VersionRange {
    /// Bare or `=` version, possibly partial: 1.2.3, 1.2, 1.x, *
    Exact(Partial),
    /// Caret range: ^1.2.3 means >=1.2.3 <2.0.0 (or special cases for 0.x)
    Caret(Partial),
    /// Tilde range: ~1.2.3 means >=1.2.3 <1.3.0
    Tilde(Partial),
    /// Greater than or equal
    Gte(Partial),
    /// Greater than
    Gt(Partial),
    /// Less than or equal
    Lte(Partial),
    /// Less than
    Lt(Partial),
    /// Hyphen range: 1.0.0 - 2.0.0 means >=1.0.0 <=2.0.0
    Hyphen { from: Partial, to: Partial },
}

impl VersionRange {
    /// Parse a single whitespace-free token
    fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();

        if let Some(rest) = spec.strip_prefix(">=") {
            Partial::parse(rest).map(VersionRange::Gte)
        } else if let Some(rest) = spec.strip_prefix("<=") {
            Partial::parse(rest).map(VersionRange::Lte)
        } else if let Some(rest) = spec.strip_prefix('>') {
            Partial::parse(rest).map(VersionRange::Gt)
        } else if let Some(rest) = spec.strip_prefix('<') {
            Partial::parse(rest).map(VersionRange::Lt)
        } else if let Some(rest) = spec.strip_prefix('^') {
            Partial::parse(rest).map(VersionRange::Caret)
        } else if let Some(rest) = spec.strip_prefix("~>") {
            Partial::parse(rest).map(VersionRange::Tilde)
        } else if let Some(rest) = spec.strip_prefix('~') {
            Partial::parse(rest).map(VersionRange::Tilde)
        } else {
            Partial::parse(spec).map(VersionRange::Exact)
        }
    }

    /// Parse hyphen range like "1.0.0 - 2.0.0"
    fn parse_hyphen(spec: &str) -> Option<Self> {
        let parts: Vec<&str> = spec.split(" - ").collect();
        if parts.len() != 2 {
            return None;
        }

        let from = Partial::parse(parts[0])?;
        let to = Partial::parse(parts[1])?;

        Some(VersionRange::Hyphen { from, to })
    }

    /// Desugar into primitive comparators (empty means any version)
    fn comparators(&self) -> Vec<Comparator> {
        match self {
            VersionRange::Exact(p) => {
                if p.is_complete() {
                    vec![Comparator::new(Op::Eq, p.floor())]
                } else {
                    Self::partial_bounds(p)
                }
            }
            VersionRange::Caret(p) => {
                let (Some(major), minor, patch) = (p.major, p.minor, p.patch) else {
                    return Vec::new();
                };
                let upper = match (major, minor, patch) {
                    (0, Some(0), Some(patch)) => lowest(0, 0, patch.saturating_add(1)),
                    (0, Some(minor), _) => lowest(0, minor.saturating_add(1), 0),
                    _ => lowest(major.saturating_add(1), 0, 0),
                };
                vec![
                    Comparator::new(Op::Gte, p.floor()),
                    Comparator::new(Op::Lt, upper),
                ]
            }
            VersionRange::Tilde(p) => {
                let Some(major) = p.major else {
                    return Vec::new();
                };
                let upper = match p.minor {
                    Some(minor) => lowest(major, minor.saturating_add(1), 0),
                    None => lowest(major.saturating_add(1), 0, 0),
                };
                vec![
                    Comparator::new(Op::Gte, p.floor()),
                    Comparator::new(Op::Lt, upper),
                ]
            }
            VersionRange::Gte(p) => {
                if p.is_any() {
                    return Vec::new();
                }
                vec![Comparator::new(Op::Gte, p.floor())]
            }
            VersionRange::Gt(p) => {
                if p.is_any() {
                    return nothing();
                }
                match p.ceiling() {
                    Some(ceiling) => vec![Comparator::new(Op::Gte, release(ceiling))],
                    None => vec![Comparator::new(Op::Gt, p.floor())],
                }
            }
            VersionRange::Lte(p) => {
                if p.is_any() {
                    return Vec::new();
                }
                match p.ceiling() {
                    Some(ceiling) => vec![Comparator::new(Op::Lt, ceiling)],
                    None => vec![Comparator::new(Op::Lte, p.floor())],
                }
            }
            VersionRange::Lt(p) => {
                if p.is_any() {
                    return nothing();
                }
                let bound = if p.is_complete() {
                    p.floor()
                } else {
                    let floor = p.floor();
                    lowest(floor.major, floor.minor, floor.patch)
                };
                vec![Comparator::new(Op::Lt, bound)]
            }
            VersionRange::Hyphen { from, to } => {
                let mut comparators = Vec::new();
                if !from.is_any() {
                    comparators.push(Comparator::new(Op::Gte, from.floor()));
                }
                if !to.is_any() {
                    match to.ceiling() {
                        Some(ceiling) => comparators.push(Comparator::new(Op::Lt, ceiling)),
                        None => comparators.push(Comparator::new(Op::Lte, to.floor())),
                    }
                }
                comparators
            }
        }
    }

    /// Bounds of an x-range: 1.x -> >=1.0.0 <2.0.0-0
    fn partial_bounds(p: &Partial) -> Vec<Comparator> {
        match p.ceiling() {
            Some(ceiling) => vec![
                Comparator::new(Op::Gte, p.floor()),
                Comparator::new(Op::Lt, ceiling),
            ],
            None => Vec::new(),
        }
    }
}

/// Drop the `-0` marker of a synthetic lower bound
fn release(mut version: Version) -> Version {
    version.pre = Prerelease::EMPTY;
    version
}
