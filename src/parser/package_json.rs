//! package.json parser

use indexmap::IndexMap;
use tracing::warn;

use crate::parser::error::ParseError;
use crate::parser::types::PackageInfo;

/// Parser for package.json files
pub struct PackageJsonParser;

impl PackageJsonParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PackageJsonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageJsonParser {
    /// Parse the manifest and return every declared dependency with the
    /// location of its version string.
    ///
    /// Every top-level key containing `dependencies` (any case) contributes.
    /// When a package is declared in several sections the last one wins.
    pub fn parse(&self, content: &str) -> Result<Vec<PackageInfo>, ParseError> {
        let mut parser = tree_sitter::Parser::new();
        let language = tree_sitter_json::LANGUAGE;
        parser.set_language(&language.into()).map_err(|e| {
            warn!("Failed to set JSON language for tree-sitter: {}", e);
            ParseError::TreeSitter(e.to_string())
        })?;

        let tree = parser.parse(content, None).ok_or_else(|| {
            warn!("Failed to parse JSON content");
            ParseError::ParseFailed("Failed to parse JSON".to_string())
        })?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(ParseError::InvalidSyntax(
                "package.json is not valid JSON".to_string(),
            ));
        }

        let mut results = IndexMap::new();

        // Find the root object
        if let Some(document) = root.child(0)
            && document.kind() == "object"
        {
            self.extract_dependencies(document, content, &mut results);
        }

        Ok(results.into_values().collect())
    }

    fn is_dependency_field(key: &str) -> bool {
        key.to_ascii_lowercase().contains("dependencies")
    }

    /// Parse npm alias format: npm:package@version or npm:@scope/package@version
    /// Returns (actual_package_name, version); None for non-alias values
    /// and aliases without a version.
    fn parse_npm_alias(value: &str) -> Option<(&str, &str)> {
        let rest = value.strip_prefix("npm:")?;

        // Scoped names start with '@', so the separator is the next '@'
        let search_from = usize::from(rest.starts_with('@'));
        let at_pos = rest[search_from..].find('@')? + search_from;

        let package_name = &rest[..at_pos];
        let version = &rest[at_pos + 1..];
        if package_name.is_empty() || version.is_empty() {
            return None;
        }
        Some((package_name, version))
    }

    /// Extract dependencies from the root object
    fn extract_dependencies(
        &self,
        object_node: tree_sitter::Node,
        content: &str,
        results: &mut IndexMap<String, PackageInfo>,
    ) {
        let mut cursor = object_node.walk();

        for child in object_node.children(&mut cursor) {
            if child.kind() != "pair" {
                continue;
            }

            let Some(key_node) = child.child_by_field_name("key") else {
                continue;
            };

            let key_text = self.get_string_value(key_node, content);

            if !Self::is_dependency_field(key_text) {
                continue;
            }

            let Some(value_node) = child.child_by_field_name("value") else {
                continue;
            };

            if value_node.kind() == "object" {
                self.extract_packages_from_object(value_node, content, results);
            }
        }
    }

    /// Extract packages from a dependency object (e.g., "dependencies": { ... })
    fn extract_packages_from_object(
        &self,
        object_node: tree_sitter::Node,
        content: &str,
        results: &mut IndexMap<String, PackageInfo>,
    ) {
        let mut cursor = object_node.walk();

        for child in object_node.children(&mut cursor) {
            if child.kind() != "pair" {
                continue;
            }

            let Some(key_node) = child.child_by_field_name("key") else {
                continue;
            };

            let Some(value_node) = child.child_by_field_name("value") else {
                continue;
            };

            if value_node.kind() != "string" {
                continue;
            }

            let key_name = self.get_string_value(key_node, content);
            let raw_version = self.get_string_value(value_node, content);

            let (package_name, version) = if raw_version.starts_with("npm:") {
                match Self::parse_npm_alias(raw_version) {
                    Some(alias) => alias,
                    None => continue,
                }
            } else {
                (key_name, raw_version)
            };

            if package_name.is_empty() {
                continue;
            }

            let start_point = value_node.start_position();
            let key_point = key_node.start_position();

            // The version is the tail of the string value, right before the closing quote
            let version_end_offset = value_node.end_byte() - 1;
            let version_start_offset = version_end_offset - version.len();
            let skipped = version_start_offset - value_node.start_byte();

            let info = PackageInfo {
                name: package_name.to_string(),
                version: version.to_string(),
                start_offset: version_start_offset,
                end_offset: version_end_offset,
                line: start_point.row,
                column: start_point.column + skipped,
                key_line: key_point.row,
                key_column: key_point.column + 1,
                key_length: key_name.len(),
            };

            // Later sections win: move the entry to its latest declaration
            results.shift_remove(&info.name);
            results.insert(info.name.clone(), info);
        }
    }

    /// Get the string value from a string node (removes quotes)
    fn get_string_value<'a>(&self, node: tree_sitter::Node, content: &'a str) -> &'a str {
        let text = &content[node.byte_range()];
        // Remove surrounding quotes
        let text = text.trim();
        let text = text.strip_prefix('"').unwrap_or(text);
        text.strip_suffix('"').unwrap_or(text)
    }
}
