//! Code action generation for range updates and installs

use std::collections::HashMap;

use tower_lsp::lsp_types::{
    CodeAction, CodeActionKind, CodeActionOrCommand, Command, Position, TextEdit, Url,
    WorkspaceEdit,
};
use tracing::warn;

use crate::lsp::diagnostics::version_range;
use crate::lsp::install::{INSTALL_COMMAND, InstallArguments};
use crate::parser::types::PackageInfo;
use crate::version::resolver::{Outcome, ResolutionResult};

/// Index of packages grouped by line number for efficient lookup
pub struct PackageIndex<'a> {
    by_line: HashMap<u32, Vec<&'a PackageInfo>>,
}

impl<'a> PackageIndex<'a> {
    /// Build an index from a slice of packages
    pub fn new(packages: &'a [PackageInfo]) -> Self {
        let mut by_line: HashMap<u32, Vec<&'a PackageInfo>> = HashMap::new();
        for pkg in packages {
            by_line.entry(pkg.line as u32).or_default().push(pkg);
        }
        Self { by_line }
    }

    /// Find the package whose version string contains the cursor.
    /// A cursor right after the last character still counts.
    pub fn find_at_position(&self, position: Position) -> Option<&'a PackageInfo> {
        let packages_on_line = self.by_line.get(&position.line)?;

        packages_on_line.iter().find_map(|&pkg| {
            let range = version_range(pkg);
            (position.character >= range.start.character
                && position.character <= range.end.character)
                .then_some(pkg)
        })
    }
}

/// Code actions for the dependency under the cursor
///
/// - "Update" rewrites the declared range when a newer version is out of
///   range or the range is loose enough to be tightened.
/// - "Install" runs the package manager when the installed copy is outdated.
pub fn generate_code_actions(
    package: &PackageInfo,
    result: &ResolutionResult,
    uri: &Url,
) -> Vec<CodeActionOrCommand> {
    let mut actions = Vec::new();

    let wants_update = match result.outcome {
        Outcome::UpgradeAvailable => true,
        Outcome::NoUpgrade => result.can_be_updated,
        Outcome::RangeInvalid | Outcome::PackageNotFound => false,
    };
    if wants_update
        && let Some(suggested) = result.suggested_range.as_deref()
        && suggested != package.version
    {
        actions.push(CodeActionOrCommand::CodeAction(create_update_action(
            &result.name,
            suggested,
            package,
            uri,
        )));
    }

    if result.installed_outdated
        && let Some(version) = result.recommended_version.as_deref()
        && let Some(action) = create_install_action(&result.name, version, uri)
    {
        actions.push(CodeActionOrCommand::CodeAction(action));
    }

    actions
}

fn create_update_action(
    name: &str,
    new_version: &str,
    package: &PackageInfo,
    uri: &Url,
) -> CodeAction {
    let text_edit = TextEdit {
        range: version_range(package),
        new_text: new_version.to_string(),
    };

    let mut changes = HashMap::new();
    changes.insert(uri.clone(), vec![text_edit]);

    CodeAction {
        title: format!("Update {name} to {new_version}"),
        kind: Some(CodeActionKind::QUICKFIX),
        edit: Some(WorkspaceEdit {
            changes: Some(changes),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn create_install_action(name: &str, version: &str, uri: &Url) -> Option<CodeAction> {
    let spec = format!("{name}@{version}");
    let arguments = InstallArguments {
        uri: uri.clone(),
        packages: vec![spec.clone()],
    };
    let argument = serde_json::to_value(&arguments)
        .inspect_err(|e| warn!("Failed to encode install arguments: {}", e))
        .ok()?;
    let title = format!("Install {spec}");

    Some(CodeAction {
        title: title.clone(),
        kind: Some(CodeActionKind::QUICKFIX),
        command: Some(Command {
            title,
            command: INSTALL_COMMAND.to_string(),
            arguments: Some(vec![argument]),
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tower_lsp::lsp_types::Range;

    fn make_package(name: &str, version: &str, line: u32, column: u32) -> PackageInfo {
        PackageInfo {
            name: name.to_string(),
            version: version.to_string(),
            start_offset: 0,
            end_offset: version.len(),
            line: line as usize,
            column: column as usize,
            key_line: line as usize,
            key_column: 5,
            key_length: name.len(),
        }
    }

    fn make_result(name: &str, range: &str, outcome: Outcome) -> ResolutionResult {
        ResolutionResult {
            name: name.to_string(),
            declared_range: range.to_string(),
            candidate_versions: vec!["4.17.19".to_string(), "4.17.21".to_string()],
            outcome,
            installed_version: None,
            latest: Some("4.17.21".to_string()),
            latest_stable: Some("4.17.21".to_string()),
            recommended_version: Some("4.17.21".to_string()),
            suggested_range: Some("^4.17.21".to_string()),
            stable_head_out_of_range: false,
            can_be_updated: false,
            installed_outdated: false,
            registry: None,
        }
    }

    fn uri() -> Url {
        Url::parse("file:///test/package.json").unwrap()
    }

    fn titles(actions: &[CodeActionOrCommand]) -> Vec<&str> {
        actions
            .iter()
            .map(|action| match action {
                CodeActionOrCommand::CodeAction(action) => action.title.as_str(),
                CodeActionOrCommand::Command(command) => command.title.as_str(),
            })
            .collect()
    }

    #[rstest]
    #[case(
        Position { line: 3, character: 17 }, // cursor within version range
        vec![make_package("lodash", "4.17.21", 3, 15)],
        Some("lodash")
    )]
    #[case(
        Position { line: 3, character: 22 }, // cursor right after the version
        vec![make_package("lodash", "4.17.21", 3, 15)],
        Some("lodash")
    )]
    #[case(
        Position { line: 3, character: 10 }, // cursor before version range
        vec![make_package("lodash", "4.17.21", 3, 15)],
        None
    )]
    #[case(
        Position { line: 3, character: 25 }, // cursor after version range
        vec![make_package("lodash", "4.17.21", 3, 15)],
        None
    )]
    #[case(
        Position { line: 2, character: 17 }, // wrong line
        vec![make_package("lodash", "4.17.21", 3, 15)],
        None
    )]
    #[case(
        Position { line: 5, character: 12 }, // multiple packages, cursor on second
        vec![
            make_package("lodash", "4.17.21", 3, 15),
            make_package("react", "18.2.0", 5, 10),
        ],
        Some("react")
    )]
    fn package_index_find_at_position(
        #[case] position: Position,
        #[case] packages: Vec<PackageInfo>,
        #[case] expected_name: Option<&str>,
    ) {
        let index = PackageIndex::new(&packages);
        let result = index.find_at_position(position);
        assert_eq!(result.map(|p| p.name.as_str()), expected_name);
    }

    #[test]
    fn generate_code_actions_offers_update_for_out_of_range_latest() {
        let package = make_package("lodash", "^3.0.0", 3, 15);
        let mut result = make_result("lodash", "^3.0.0", Outcome::UpgradeAvailable);
        result.suggested_range = Some("^4.17.21".to_string());

        let actions = generate_code_actions(&package, &result, &uri());

        assert_eq!(titles(&actions), vec!["Update lodash to ^4.17.21"]);
        let CodeActionOrCommand::CodeAction(action) = &actions[0] else {
            panic!("expected a code action");
        };
        let edits = &action.edit.as_ref().unwrap().changes.as_ref().unwrap()[&uri()];
        assert_eq!(
            edits[0],
            TextEdit {
                range: Range {
                    start: Position {
                        line: 3,
                        character: 15
                    },
                    end: Position {
                        line: 3,
                        character: 21
                    },
                },
                new_text: "^4.17.21".to_string(),
            }
        );
    }

    #[rstest]
    #[case(true, vec!["Update lodash to ^4.17.21"])]
    #[case(false, vec![])]
    fn generate_code_actions_offers_update_for_loose_range(
        #[case] can_be_updated: bool,
        #[case] expected: Vec<&str>,
    ) {
        let package = make_package("lodash", "^4.17.19", 3, 15);
        let mut result = make_result("lodash", "^4.17.19", Outcome::NoUpgrade);
        result.can_be_updated = can_be_updated;

        let actions = generate_code_actions(&package, &result, &uri());

        assert_eq!(titles(&actions), expected);
    }

    #[rstest]
    #[case(Outcome::RangeInvalid)]
    #[case(Outcome::PackageNotFound)]
    fn generate_code_actions_returns_empty_without_versions(#[case] outcome: Outcome) {
        let package = make_package("lodash", "nope", 3, 15);
        let result = make_result("lodash", "nope", outcome);

        let actions = generate_code_actions(&package, &result, &uri());

        assert!(actions.is_empty());
    }

    #[test]
    fn generate_code_actions_offers_install_for_outdated_copy() {
        let package = make_package("lodash", "^4.17.21", 3, 15);
        let mut result = make_result("lodash", "^4.17.21", Outcome::NoUpgrade);
        result.installed_version = Some("4.17.19".to_string());
        result.installed_outdated = true;

        let actions = generate_code_actions(&package, &result, &uri());

        assert_eq!(titles(&actions), vec!["Install lodash@4.17.21"]);
        let CodeActionOrCommand::CodeAction(action) = &actions[0] else {
            panic!("expected a code action");
        };
        let command = action.command.as_ref().unwrap();
        assert_eq!(command.command, INSTALL_COMMAND);
        let arguments: InstallArguments =
            serde_json::from_value(command.arguments.as_ref().unwrap()[0].clone()).unwrap();
        assert_eq!(arguments.uri, uri());
        assert_eq!(arguments.packages, vec!["lodash@4.17.21"]);
    }
}
