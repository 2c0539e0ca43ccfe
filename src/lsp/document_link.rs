//! Links from dependency names to their npm package page

use tower_lsp::lsp_types::{DocumentLink, Position, Range, Url};
use tracing::warn;

use crate::config::NPM_PACKAGE_PAGE_URL;
use crate::parser::types::PackageInfo;

/// Package page of `name`; the scope separator is encoded as `%2f`
pub fn package_page_url(name: &str) -> String {
    format!(
        "{}/{}",
        NPM_PACKAGE_PAGE_URL.trim_end_matches('/'),
        name.replacen('/', "%2f", 1)
    )
}

/// One link per dependency, spanning its key. Aliased dependencies link to
/// the package they resolve to.
pub fn generate_document_links(packages: &[PackageInfo]) -> Vec<DocumentLink> {
    packages
        .iter()
        .filter_map(|package| {
            let target = Url::parse(&package_page_url(&package.name))
                .inspect_err(|e| warn!("Invalid package page for {}: {}", package.name, e))
                .ok()?;
            let line = package.key_line as u32;
            let start = package.key_column as u32;
            Some(DocumentLink {
                range: Range {
                    start: Position::new(line, start),
                    end: Position::new(line, start + package.key_length as u32),
                },
                target: Some(target),
                tooltip: Some(format!("Open {} on npm", package.name)),
                data: None,
            })
        })
        .collect()
}
