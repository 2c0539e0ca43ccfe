//! Version completion inside dependency values

use std::sync::LazyLock;

use regex::Regex;
use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, CompletionTextEdit, Position, Range, TextEdit,
};

use crate::version::policy::{extract_version_prefix, stability_label};
use crate::version::semver::parse_version;

/// `"<name>": "<partial>` up to the cursor
static VALUE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"\s*:\s*"([^"]*)$"#).expect("valid regex"));

/// Text of the cursor's line before the cursor. `position.character` counts
/// UTF-16 code units.
pub fn line_prefix(content: &str, position: Position) -> Option<&str> {
    let line = content.lines().nth(position.line as usize)?;

    let mut units = 0;
    for (offset, ch) in line.char_indices() {
        if units >= position.character as usize {
            return Some(&line[..offset]);
        }
        units += ch.len_utf16();
    }
    Some(line)
}

/// Package name and partially typed range when the cursor sits inside a
/// dependency value string
pub fn completion_context(line_prefix: &str) -> Option<(&str, &str)> {
    let captures = VALUE_PREFIX.captures(line_prefix)?;
    let name = captures.get(1)?.as_str();
    let partial = captures.get(2)?.as_str();
    Some((name, partial))
}

/// Completion items for `candidates` (ascending), newest first.
///
/// Labels keep the operator typed so far; each item replaces the partial.
pub fn completion_items(
    partial: &str,
    candidates: &[String],
    position: Position,
) -> Vec<CompletionItem> {
    let prefix = extract_version_prefix(partial);
    let partial_units = partial.encode_utf16().count() as u32;
    let range = Range {
        start: Position {
            line: position.line,
            character: position.character.saturating_sub(partial_units),
        },
        end: position,
    };

    candidates
        .iter()
        .rev()
        .enumerate()
        .map(|(rank, version)| {
            let label = format!("{prefix}{version}");
            let detail = parse_version(version)
                .map(|v| stability_label(&v).to_string())
                .unwrap_or_default();
            CompletionItem {
                label: label.clone(),
                kind: Some(CompletionItemKind::VALUE),
                detail: Some(detail),
                sort_text: Some(format!("{rank:05}")),
                filter_text: Some(label.clone()),
                text_edit: Some(CompletionTextEdit::Edit(TextEdit {
                    range,
                    new_text: label,
                })),
                ..Default::default()
            }
        })
        .collect()
}
