//! Registry access through the package manager's `info` command

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::{FETCH_TIMEOUT_MS, NpmClient};
use crate::version::error::RegistryError;
use crate::version::registries::PackageDocument;
use crate::version::registries::process::{ProcessOutput, run_process};
use crate::version::registry::{RawMetadata, Registry};

static NPM_REQUEST_LOG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"http (?:fetch GET \d{3}|request GET) (\S+)").expect("valid npm log pattern")
});
static YARN_REQUEST_LOG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Performing "GET" request to "([^"]+)""#).expect("valid yarn log pattern")
});

/// Registry implementation that shells out to `npm info` / `yarn info`
pub struct CliRegistry {
    client: NpmClient,
    program: String,
    working_dir: Option<PathBuf>,
}

impl CliRegistry {
    pub fn new(client: NpmClient, working_dir: Option<PathBuf>) -> Self {
        Self {
            client,
            program: client.program().to_string(),
            working_dir,
        }
    }

    /// Use another executable speaking the same protocol as `client`
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn info_args(&self, package_name: &str, endpoint: &str) -> Vec<String> {
        let verbose = match self.client {
            NpmClient::Npm => "-d",
            NpmClient::Yarn => "--verbose",
        };
        vec![
            "info".to_string(),
            package_name.to_string(),
            "--json".to_string(),
            verbose.to_string(),
            "--registry".to_string(),
            endpoint.to_string(),
        ]
    }
}

#[async_trait::async_trait]
impl Registry for CliRegistry {
    async fn fetch(
        &self,
        package_name: &str,
        endpoint: &str,
    ) -> Result<RawMetadata, RegistryError> {
        let output = run_process(
            &self.program,
            &self.info_args(package_name, endpoint),
            self.working_dir.as_deref(),
            Duration::from_millis(FETCH_TIMEOUT_MS),
        )
        .await
        .map_err(|e| {
            warn!("Failed to run {} info {}: {}", self.program, package_name, e);
            RegistryError::Process {
                code: None,
                stderr: e.to_string(),
            }
        })?;

        parse_info_output(self.client, &output, package_name, endpoint)
    }
}

/// Map the output of `<client> info <name> --json` to registry metadata
pub fn parse_info_output(
    client: NpmClient,
    output: &ProcessOutput,
    package_name: &str,
    endpoint: &str,
) -> Result<RawMetadata, RegistryError> {
    if !output.success() {
        if output.stderr.contains("E404") || output.stderr.contains("Not found") {
            return Err(RegistryError::NotFound(package_name.to_string()));
        }
        warn!(
            "{} info {} exited with {:?}",
            client.program(),
            package_name,
            output.code
        );
        return Err(RegistryError::Process {
            code: output.code,
            stderr: output.stderr.clone(),
        });
    }

    let stdout = output.stdout.trim();
    if stdout.is_empty() {
        return Err(RegistryError::Empty(package_name.to_string()));
    }

    let mut value: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|e| RegistryError::InvalidResponse(format!("{}: {}", package_name, e)))?;

    if client == NpmClient::Yarn {
        let data = value.get_mut("data").map(serde_json::Value::take);
        value = data.ok_or_else(|| RegistryError::Empty(package_name.to_string()))?;
    }

    let document: PackageDocument = serde_json::from_value(value)
        .map_err(|e| RegistryError::InvalidResponse(format!("{}: {}", package_name, e)))?;

    let versions = document
        .versions
        .ok_or_else(|| RegistryError::Empty(package_name.to_string()))?
        .into_versions();

    let registry =
        registry_from_log(client, &output.stderr).unwrap_or_else(|| endpoint.to_string());
    debug!("{} answered for {}", registry, package_name);

    Ok(RawMetadata { versions, registry })
}

/// Registry origin of the first GET request in a verbose client log
pub fn registry_from_log(client: NpmClient, log: &str) -> Option<String> {
    let pattern = match client {
        NpmClient::Npm => &*NPM_REQUEST_LOG,
        NpmClient::Yarn => &*YARN_REQUEST_LOG,
    };

    let url = pattern.captures(log)?.get(1)?.as_str();
    let end = url.rfind('/')?;
    Some(url[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn output(code: i32, stdout: &str, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn parse_info_output_reads_npm_version_array() {
        let out = output(
            0,
            r#"{"name": "left-pad", "versions": ["1.0.0", "1.0.1", "1.3.0"]}"#,
            "npm http fetch GET 200 https://registry.npmjs.org/left-pad 52ms (cache revalidated)",
        );

        let result =
            parse_info_output(NpmClient::Npm, &out, "left-pad", "https://fallback.test").unwrap();

        assert_eq!(result.versions, vec!["1.0.0", "1.0.1", "1.3.0"]);
        assert_eq!(result.registry, "https://registry.npmjs.org");
    }

    #[test]
    fn parse_info_output_unwraps_yarn_data() {
        let out = output(
            0,
            r#"{"type": "inspect", "data": {"name": "foo", "versions": ["0.9.0", "1.0.0"]}}"#,
            r#"verbose 0.2 Performing "GET" request to "https://registry.yarnpkg.com/foo"."#,
        );

        let result = parse_info_output(NpmClient::Yarn, &out, "foo", "https://fallback.test").unwrap();

        assert_eq!(result.versions, vec!["0.9.0", "1.0.0"]);
        assert_eq!(result.registry, "https://registry.yarnpkg.com");
    }

    #[test]
    fn parse_info_output_falls_back_to_endpoint_without_log() {
        let out = output(0, r#"{"versions": {"1.0.0": {}}}"#, "");

        let result = parse_info_output(NpmClient::Npm, &out, "x", "https://fallback.test").unwrap();

        assert_eq!(result.registry, "https://fallback.test");
    }

    #[test]
    fn parse_info_output_maps_non_zero_exit_to_process_error() {
        let out = output(1, "", "npm ERR! network request failed");

        let result = parse_info_output(NpmClient::Npm, &out, "x", "https://fallback.test");

        assert!(matches!(
            result,
            Err(RegistryError::Process { code: Some(1), .. })
        ));
    }

    #[test]
    fn parse_info_output_maps_e404_to_not_found() {
        let out = output(1, "", "npm ERR! code E404\nnpm ERR! 404 Not Found - GET https://registry.npmjs.org/doesnotexist");

        let result = parse_info_output(NpmClient::Npm, &out, "doesnotexist", "https://fallback.test");

        assert!(matches!(result, Err(RegistryError::NotFound(name)) if name == "doesnotexist"));
    }

    #[rstest]
    #[case(NpmClient::Npm, "")]
    #[case(NpmClient::Npm, "{}")]
    #[case(NpmClient::Yarn, r#"{"type": "inspect"}"#)]
    fn parse_info_output_maps_missing_versions_to_empty(
        #[case] client: NpmClient,
        #[case] stdout: &str,
    ) {
        let out = output(0, stdout, "");

        let result = parse_info_output(client, &out, "ghost", "https://fallback.test");

        assert!(matches!(result, Err(RegistryError::Empty(_))));
    }

    #[test]
    fn parse_info_output_maps_garbage_to_invalid_response() {
        let out = output(0, "this is not json", "");

        let result = parse_info_output(NpmClient::Npm, &out, "x", "https://fallback.test");

        assert!(matches!(result, Err(RegistryError::InvalidResponse(_))));
    }

    #[rstest]
    #[case(
        NpmClient::Npm,
        "npm http fetch GET 200 https://registry.npmjs.org/lodash 12ms",
        Some("https://registry.npmjs.org")
    )]
    #[case(
        NpmClient::Npm,
        "npm verb\nnpm http request GET https://npm.example.com/@scope%2fpkg\n",
        Some("https://npm.example.com")
    )]
    #[case(
        NpmClient::Yarn,
        r#"verbose 0.1 Performing "GET" request to "https://registry.yarnpkg.com/react"."#,
        Some("https://registry.yarnpkg.com")
    )]
    #[case(NpmClient::Npm, "nothing interesting here", None)]
    #[case(
        NpmClient::Yarn,
        "npm http fetch GET 200 https://registry.npmjs.org/lodash",
        None
    )]
    fn registry_from_log_returns_expected(
        #[case] client: NpmClient,
        #[case] log: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(registry_from_log(client, log).as_deref(), expected);
    }

    #[test]
    fn info_args_include_registry_and_verbosity() {
        let registry = CliRegistry::new(NpmClient::Yarn, None);

        assert_eq!(
            registry.info_args("react", "https://r.test"),
            vec!["info", "react", "--json", "--verbose", "--registry", "https://r.test"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fetch_runs_the_configured_program() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("fake-npm");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"versions\": [\"1.0.0\", \"2.0.0\"]}'\necho \"npm http fetch GET 200 $6/$2\" >&2\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let registry = CliRegistry::new(NpmClient::Npm, Some(dir.path().to_path_buf()))
            .with_program(script.to_string_lossy());
        let result = registry.fetch("demo", "https://r.test").await.unwrap();

        assert_eq!(result.versions, vec!["1.0.0", "2.0.0"]);
        assert_eq!(result.registry, "https://r.test");
    }
}
