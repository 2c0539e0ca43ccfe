use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tower_lsp::jsonrpc::{Error, Result};
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};
use tracing::{debug, error, info, warn};

use crate::config::{LspConfig, RegistryClientKind};
use crate::lsp::code_action::{PackageIndex, generate_code_actions};
use crate::lsp::completion::{completion_context, completion_items, line_prefix};
use crate::lsp::diagnostics::generate_diagnostics;
use crate::lsp::document_link::generate_document_links;
use crate::lsp::install::{
    CLEAN_CACHE_COMMAND, INSTALL_COMMAND, InstallArguments, install_packages,
};
use crate::parser::package_json::PackageJsonParser;
use crate::parser::types::{PackageInfo, is_manifest, to_dependencies};
use crate::version::cache::PackageStore;
use crate::version::registries::{CliRegistry, HttpRegistry, Registries};
use crate::version::registry::Registry;
use crate::version::resolver::{
    DependencyResolver, GenerationTracker, ResolutionResult, ResolveOptions,
};
use crate::version::scheduler::RequestScheduler;

/// Section of `workspace/didChangeConfiguration` settings holding our options
const SETTINGS_SECTION: &str = "npmOutdated";

/// Last known state of an open manifest
#[derive(Debug, Clone, Default)]
struct Document {
    content: String,
    packages: Vec<PackageInfo>,
    results: Vec<ResolutionResult>,
}

type Documents = Arc<Mutex<HashMap<Url, Document>>>;

pub struct Backend<S: PackageStore + 'static> {
    client: Client,
    store: Arc<S>,
    /// Registry used regardless of configuration, when set
    registry: Option<Arc<dyn Registry>>,
    parser: PackageJsonParser,
    config: RwLock<LspConfig>,
    workspace_root: RwLock<Option<PathBuf>>,
    resolver: RwLock<Arc<DependencyResolver<S>>>,
    documents: Documents,
    generations: Arc<GenerationTracker>,
}

impl<S: PackageStore + 'static> Backend<S> {
    /// Backend choosing its registry client from the configuration
    pub fn new(client: Client, store: Arc<S>) -> Self {
        Self::with_registry(client, store, None)
    }

    /// Build a Backend with a fixed registry
    pub fn build(client: Client, store: Arc<S>, registry: Arc<dyn Registry>) -> Self {
        Self::with_registry(client, store, Some(registry))
    }

    fn with_registry(client: Client, store: Arc<S>, registry: Option<Arc<dyn Registry>>) -> Self {
        let config = LspConfig::default();
        let resolver = Self::build_resolver(&store, registry.as_ref(), &config, None);
        Self {
            client,
            store,
            registry,
            parser: PackageJsonParser::new(),
            config: RwLock::new(config),
            workspace_root: RwLock::new(None),
            resolver: RwLock::new(resolver),
            documents: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(GenerationTracker::default()),
        }
    }

    fn build_resolver(
        store: &Arc<S>,
        registry: Option<&Arc<dyn Registry>>,
        config: &LspConfig,
        workspace_root: Option<PathBuf>,
    ) -> Arc<DependencyResolver<S>> {
        let registry = registry.cloned().unwrap_or_else(|| match config.registry_client {
            RegistryClientKind::Http => Arc::new(HttpRegistry::new()) as Arc<dyn Registry>,
            RegistryClientKind::Cli => {
                Arc::new(CliRegistry::new(config.npm_client, workspace_root))
            }
        });
        let scheduler = Arc::new(RequestScheduler::new(registry, config.request_pool_size));
        Arc::new(DependencyResolver::new(Arc::clone(store), scheduler))
    }

    pub fn server_capabilities() -> ServerCapabilities {
        ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Options(
                TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::FULL),
                    save: Some(TextDocumentSyncSaveOptions::Supported(true)),
                    ..Default::default()
                },
            )),
            completion_provider: Some(CompletionOptions {
                trigger_characters: Some(vec!["\"".to_string(), "^".to_string(), "~".to_string()]),
                ..Default::default()
            }),
            code_action_provider: Some(CodeActionProviderCapability::Simple(true)),
            document_link_provider: Some(DocumentLinkOptions {
                resolve_provider: Some(false),
                work_done_progress_options: Default::default(),
            }),
            execute_command_provider: Some(ExecuteCommandOptions {
                commands: vec![INSTALL_COMMAND.to_string(), CLEAN_CACHE_COMMAND.to_string()],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Replace the configuration and rebuild the resolver with it
    async fn apply_config(&self, config: LspConfig) {
        let workspace_root = self.workspace_root.read().await.clone();
        let resolver =
            Self::build_resolver(&self.store, self.registry.as_ref(), &config, workspace_root);
        info!("Applying configuration: {:?}", config);
        *self.config.write().await = config;
        *self.resolver.write().await = resolver;
    }

    /// Parse the document and start a check; diagnostics are published by
    /// the spawned task as results come in
    async fn check_and_publish_diagnostics(&self, uri: Url, content: String) {
        if !is_manifest(uri.as_str()) {
            return;
        }

        let packages = match self.parser.parse(&content) {
            Ok(packages) => packages,
            Err(e) => {
                warn!("Failed to parse {}: {}", uri, e);
                self.client
                    .log_message(MessageType::WARNING, format!("Failed to parse {uri}: {e}"))
                    .await;
                Vec::new()
            }
        };

        self.documents.lock().await.insert(
            uri.clone(),
            Document {
                content,
                packages: packages.clone(),
                results: Vec::new(),
            },
        );

        let generation = self.generations.begin(uri.as_str());
        let task = CheckTask {
            client: self.client.clone(),
            resolver: Arc::clone(&*self.resolver.read().await),
            config: self.config.read().await.clone(),
            documents: Arc::clone(&self.documents),
            generations: Arc::clone(&self.generations),
        };

        tokio::spawn(task.run(uri, packages, generation));
    }

    /// Re-check every open manifest, e.g. after a configuration change
    async fn recheck_open_documents(&self) {
        let documents: Vec<(Url, String)> = self
            .documents
            .lock()
            .await
            .iter()
            .map(|(uri, document)| (uri.clone(), document.content.clone()))
            .collect();

        for (uri, content) in documents {
            self.check_and_publish_diagnostics(uri, content).await;
        }
    }

    async fn install(&self, arguments: Vec<serde_json::Value>) -> Result<Option<serde_json::Value>> {
        let Some(argument) = arguments.into_iter().next() else {
            return Err(Error::invalid_params("missing install arguments"));
        };
        let arguments: InstallArguments = serde_json::from_value(argument)
            .map_err(|e| Error::invalid_params(format!("invalid install arguments: {e}")))?;
        let Some(root) = project_root(&arguments.uri) else {
            return Err(Error::invalid_params(format!(
                "{} is not a local file",
                arguments.uri
            )));
        };

        let client = self.config.read().await.npm_client;
        let specs = arguments.packages.join(" ");
        match install_packages(client, &arguments.packages, &root).await {
            Ok(output) if output.success() => {
                self.client
                    .show_message(MessageType::INFO, format!("Installed {specs}"))
                    .await;
            }
            Ok(output) => {
                error!("Install of {} failed: {}", specs, output.stderr);
                self.client
                    .show_message(
                        MessageType::ERROR,
                        format!("Failed to install {specs}: {}", output.stderr.trim()),
                    )
                    .await;
            }
            Err(e) => {
                error!("Failed to run install of {}: {}", specs, e);
                self.client
                    .show_message(MessageType::ERROR, format!("Failed to install {specs}: {e}"))
                    .await;
            }
        }

        let content = self
            .documents
            .lock()
            .await
            .get(&arguments.uri)
            .map(|document| document.content.clone());
        if let Some(content) = content {
            self.check_and_publish_diagnostics(arguments.uri, content)
                .await;
        }
        Ok(None)
    }

    async fn clean_cache(&self) -> Result<Option<serde_json::Value>> {
        let resolver = Arc::clone(&*self.resolver.read().await);
        match resolver.clear_cache() {
            Ok(()) => {
                info!("Cache cleared");
                self.client
                    .show_message(MessageType::INFO, "Package cache cleared")
                    .await;
            }
            Err(e) => {
                error!("Failed to clear cache: {}", e);
                self.client
                    .show_message(MessageType::ERROR, format!("Failed to clear cache: {e}"))
                    .await;
            }
        }
        Ok(None)
    }
}

/// Directory holding the manifest
fn project_root(uri: &Url) -> Option<PathBuf> {
    uri.to_file_path()
        .ok()?
        .parent()
        .map(Path::to_path_buf)
}

/// Snapshot the configuration into per-check options, reading the npmrc file
/// of the manifest's project
async fn resolve_options(config: &LspConfig, uri: &Url) -> ResolveOptions {
    let root = project_root(uri);
    let registries = match &root {
        Some(root) => Registries::load(&root.join(&config.npmrc)).await,
        None => Registries::default(),
    };
    ResolveOptions::from_config(config, root, registries)
}

/// One check of one document
struct CheckTask<S: PackageStore + 'static> {
    client: Client,
    resolver: Arc<DependencyResolver<S>>,
    config: LspConfig,
    documents: Documents,
    generations: Arc<GenerationTracker>,
}

impl<S: PackageStore + 'static> CheckTask<S> {
    async fn run(self, uri: Url, packages: Vec<PackageInfo>, generation: u64) {
        let options = resolve_options(&self.config, &uri).await;
        let dependencies = to_dependencies(&packages);

        let results = if self.config.stream_reporting {
            let mut results = Vec::new();
            let mut stream = pin!(self.resolver.check_streaming(dependencies, &options));
            while let Some(result) = stream.next().await {
                if !self.is_current(&uri, generation) {
                    debug!("Dropping superseded check of {}", uri);
                    return;
                }
                results.push(result);
                self.publish(&uri, &packages, &results).await;
            }
            results
        } else {
            self.resolver.check(&dependencies, &options).await
        };

        if !self.is_current(&uri, generation) {
            debug!("Dropping superseded check of {}", uri);
            return;
        }

        if let Some(document) = self.documents.lock().await.get_mut(&uri) {
            document.results = results.clone();
        }

        self.publish(&uri, &packages, &results).await;
    }

    fn is_current(&self, uri: &Url, generation: u64) -> bool {
        self.generations.is_current(uri.as_str(), generation)
    }

    async fn publish(&self, uri: &Url, packages: &[PackageInfo], results: &[ResolutionResult]) {
        let diagnostics = generate_diagnostics(uri, packages, results, self.config.info);

        self.client
            .log_message(
                MessageType::LOG,
                format!("Publishing {} diagnostics for {}", diagnostics.len(), uri),
            )
            .await;

        self.client
            .publish_diagnostics(uri.clone(), diagnostics, None)
            .await;
    }
}

#[tower_lsp::async_trait]
impl<S: PackageStore + 'static> LanguageServer for Backend<S> {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        self.client
            .log_message(MessageType::INFO, "LSP server initializing")
            .await;

        #[allow(deprecated)]
        let root_uri = params
            .workspace_folders
            .as_ref()
            .and_then(|folders| folders.first())
            .map(|folder| folder.uri.clone())
            .or(params.root_uri);
        *self.workspace_root.write().await = root_uri.and_then(|uri| uri.to_file_path().ok());

        let config = match params.initialization_options {
            Some(options) => serde_json::from_value(options)
                .inspect_err(|e| warn!("Invalid initialization options: {}", e))
                .unwrap_or_default(),
            None => LspConfig::default(),
        };
        self.apply_config(config).await;

        Ok(InitializeResult {
            capabilities: Self::server_capabilities(),
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "LSP server initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        self.client
            .log_message(MessageType::INFO, "LSP server shutting down")
            .await;
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        self.client
            .log_message(
                MessageType::LOG,
                format!("Document opened: {}", params.text_document.uri),
            )
            .await;

        self.check_and_publish_diagnostics(params.text_document.uri, params.text_document.text)
            .await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        // With FULL sync mode, the last content change contains the full document text
        let Some(content) = params.content_changes.into_iter().last().map(|c| c.text) else {
            return;
        };

        self.client
            .log_message(
                MessageType::LOG,
                format!("Document changed: {}", params.text_document.uri),
            )
            .await;

        self.check_and_publish_diagnostics(params.text_document.uri, content)
            .await;
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;
        let content = match params.text {
            Some(text) => Some(text),
            None => self
                .documents
                .lock()
                .await
                .get(&uri)
                .map(|document| document.content.clone()),
        };

        if let Some(content) = content {
            self.check_and_publish_diagnostics(uri, content).await;
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.generations.forget(uri.as_str());
        if self.documents.lock().await.remove(&uri).is_some() {
            self.client.publish_diagnostics(uri, Vec::new(), None).await;
        }
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        let mut settings = params.settings;
        if let Some(section) = settings
            .get_mut(SETTINGS_SECTION)
            .map(serde_json::Value::take)
        {
            settings = section;
        }

        match serde_json::from_value::<LspConfig>(settings) {
            Ok(config) => {
                self.apply_config(config).await;
                self.recheck_open_documents().await;
            }
            Err(e) => {
                warn!("Ignoring invalid configuration: {}", e);
                self.client
                    .log_message(MessageType::WARNING, format!("Invalid configuration: {e}"))
                    .await;
            }
        }
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;

        let Some(document) = self.documents.lock().await.get(&uri).cloned() else {
            return Ok(None);
        };
        let Some(prefix) = line_prefix(&document.content, position) else {
            return Ok(None);
        };
        let Some((name, partial)) = completion_context(prefix) else {
            return Ok(None);
        };
        if !document.packages.iter().any(|package| package.name == name) {
            return Ok(None);
        }

        let config = self.config.read().await.clone();
        let options = resolve_options(&config, &uri).await;
        let resolver = Arc::clone(&*self.resolver.read().await);
        let Some(candidates) = resolver.candidates(name, &options).await else {
            return Ok(None);
        };

        Ok(Some(CompletionResponse::Array(completion_items(
            partial,
            &candidates,
            position,
        ))))
    }

    async fn code_action(&self, params: CodeActionParams) -> Result<Option<CodeActionResponse>> {
        let uri = params.text_document.uri;
        let documents = self.documents.lock().await;
        let Some(document) = documents.get(&uri) else {
            return Ok(None);
        };

        let index = PackageIndex::new(&document.packages);
        let Some(package) = index.find_at_position(params.range.start) else {
            return Ok(None);
        };
        let Some(result) = document.results.iter().find(|r| r.name == package.name) else {
            return Ok(None);
        };

        let actions = generate_code_actions(package, result, &uri);
        if actions.is_empty() {
            Ok(None)
        } else {
            Ok(Some(actions))
        }
    }

    async fn document_link(&self, params: DocumentLinkParams) -> Result<Option<Vec<DocumentLink>>> {
        let documents = self.documents.lock().await;
        let Some(document) = documents.get(&params.text_document.uri) else {
            return Ok(None);
        };
        Ok(Some(generate_document_links(&document.packages)))
    }

    async fn execute_command(
        &self,
        params: ExecuteCommandParams,
    ) -> Result<Option<serde_json::Value>> {
        match params.command.as_str() {
            INSTALL_COMMAND => self.install(params.arguments).await,
            CLEAN_CACHE_COMMAND => self.clean_cache().await,
            other => Err(Error::invalid_params(format!("unknown command: {other}"))),
        }
    }
}
