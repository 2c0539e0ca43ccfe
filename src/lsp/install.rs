//! Workspace commands: package installation and cache cleaning

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::Url;
use tracing::info;

use crate::config::{INSTALL_TIMEOUT_MS, NpmClient};
use crate::version::registries::process::{ProcessOutput, run_process};

/// Install the given `name@version` specs in the manifest's project
pub const INSTALL_COMMAND: &str = "npm-outdated.install";

/// Drop every cached package record
pub const CLEAN_CACHE_COMMAND: &str = "npm-outdated.cleanCache";

/// Argument of [`INSTALL_COMMAND`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallArguments {
    /// Manifest whose directory receives the install
    pub uri: Url,
    /// `name@version` specs
    pub packages: Vec<String>,
}

/// Command line adding `specs` with the given client
pub fn install_args(client: NpmClient, specs: &[String]) -> Vec<String> {
    let subcommand = match client {
        NpmClient::Npm => "install",
        NpmClient::Yarn => "add",
    };
    std::iter::once(subcommand.to_string())
        .chain(specs.iter().cloned())
        .collect()
}

/// Run the client's install command in `project_root`
pub async fn install_packages(
    client: NpmClient,
    specs: &[String],
    project_root: &Path,
) -> std::io::Result<ProcessOutput> {
    run_install(client.program(), &install_args(client, specs), project_root).await
}

async fn run_install(
    program: &str,
    args: &[String],
    project_root: &Path,
) -> std::io::Result<ProcessOutput> {
    info!("Installing in {:?}: {} {}", project_root, program, args.join(" "));
    run_process(
        program,
        args,
        Some(project_root),
        Duration::from_millis(INSTALL_TIMEOUT_MS),
    )
    .await
}
