//! Diagnostics generation for resolution results

use std::collections::HashMap;

use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticRelatedInformation, DiagnosticSeverity, Location, Position, Range, Url,
};

use crate::parser::types::PackageInfo;
use crate::version::policy::satisfies;
use crate::version::resolver::{Outcome, ResolutionResult};

const PACKAGE_NAME: &str = env!("CARGO_PKG_NAME");

/// Range covering the version string of a dependency
pub fn version_range(package: &PackageInfo) -> Range {
    Range {
        start: Position {
            line: package.line as u32,
            character: package.column as u32,
        },
        end: Position {
            line: package.line as u32,
            character: (package.column + package.end_offset - package.start_offset) as u32,
        },
    }
}

/// Generate diagnostics for every result whose dependency is located in the document.
///
/// Informational diagnostics are only produced when `show_info` is set.
pub fn generate_diagnostics(
    uri: &Url,
    packages: &[PackageInfo],
    results: &[ResolutionResult],
    show_info: bool,
) -> Vec<Diagnostic> {
    let by_name: HashMap<&str, &PackageInfo> =
        packages.iter().map(|p| (p.name.as_str(), p)).collect();

    results
        .iter()
        .filter_map(|result| {
            let package = by_name.get(result.name.as_str())?;
            create_diagnostic(uri, package, result, show_info)
        })
        .collect()
}

/// Create a diagnostic from package info and resolution result
/// Returns None if nothing is worth reporting
fn create_diagnostic(
    uri: &Url,
    package: &PackageInfo,
    result: &ResolutionResult,
    show_info: bool,
) -> Option<Diagnostic> {
    let range = version_range(package);
    let name = &result.name;

    let outcome = match result.outcome {
        Outcome::UpgradeAvailable => {
            let latest = result.latest.as_deref().unwrap_or("unknown");
            let related_information = result
                .stable_head_out_of_range
                .then(|| result.latest_stable.as_deref())
                .flatten()
                .map(|stable| {
                    vec![DiagnosticRelatedInformation {
                        location: Location {
                            uri: uri.clone(),
                            range,
                        },
                        message: format!("The latest stable version is {stable}"),
                    }]
                });
            Some((
                DiagnosticSeverity::WARNING,
                format!("The package {name} should be upgraded to {latest}"),
                related_information,
            ))
        }
        Outcome::NoUpgrade if result.can_be_updated && show_info => {
            result.suggested_range.as_deref().map(|suggested| {
                (
                    DiagnosticSeverity::INFORMATION,
                    format!("The package {name} can be updated to {suggested}"),
                    None,
                )
            })
        }
        Outcome::NoUpgrade => None,
        Outcome::RangeInvalid => Some((
            DiagnosticSeverity::ERROR,
            format!("The package {name} has an invalid range version"),
            None,
        )),
        Outcome::PackageNotFound => Some((
            DiagnosticSeverity::ERROR,
            format!("The package {name} is not found"),
            None,
        )),
    };

    let (severity, message, related_information) =
        outcome.or_else(|| installed_diagnostic(result, show_info))?;

    Some(Diagnostic {
        range,
        severity: Some(severity),
        message,
        source: Some(PACKAGE_NAME.to_string()),
        related_information,
        ..Default::default()
    })
}

type DiagnosticParts = (
    DiagnosticSeverity,
    String,
    Option<Vec<DiagnosticRelatedInformation>>,
);

fn installed_diagnostic(result: &ResolutionResult, show_info: bool) -> Option<DiagnosticParts> {
    if !result.installed_outdated {
        return None;
    }
    let installed = result.installed_version.as_deref()?;
    let name = &result.name;

    if !satisfies(installed, &result.declared_range) {
        return Some((
            DiagnosticSeverity::WARNING,
            format!(
                "The installed version {installed} of {name} does not satisfy {}",
                result.declared_range
            ),
            None,
        ));
    }

    let latest = result.latest.as_deref()?;
    show_info.then(|| {
        (
            DiagnosticSeverity::INFORMATION,
            format!("The package {name} can be installed in version {latest}"),
            None,
        )
    })
}
