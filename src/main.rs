use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use npm_outdated_lsp::config::{CACHE_NAMESPACE, LspConfig, db_path};
use npm_outdated_lsp::lsp::server::{clean_cache, open_cache};
use npm_outdated_lsp::parser::package_json::PackageJsonParser;
use npm_outdated_lsp::parser::types::to_dependencies;
use npm_outdated_lsp::version::cache::PackageCache;
use npm_outdated_lsp::version::registries::{HttpRegistry, Registries};
use npm_outdated_lsp::version::resolver::{DependencyResolver, ResolveOptions};
use npm_outdated_lsp::version::scheduler::RequestScheduler;

#[derive(Parser)]
#[command(name = "npm-outdated-lsp")]
#[command(version, about = "Language Server reporting outdated npm dependencies")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the language server on stdin/stdout (default)
    Serve,
    /// Resolve the dependencies of a package.json and print one line per package
    Check {
        /// Path of the package.json
        path: PathBuf,
    },
    /// Delete every cached package record
    CleanCache,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        None | Some(Command::Serve) => {
            runtime.block_on(npm_outdated_lsp::lsp::server::run_server())
        }
        Some(Command::Check { path }) => {
            init_stderr_logging();
            runtime.block_on(check(&path))
        }
        Some(Command::CleanCache) => {
            init_stderr_logging();
            clean_cache(&db_path())?;
            println!("Cleared cache namespace {CACHE_NAMESPACE}");
            Ok(())
        }
    }
}

fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn check(path: &Path) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let packages = PackageJsonParser::new()
        .parse(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let dependencies = to_dependencies(&packages);

    let config = LspConfig::default();
    let root = path
        .canonicalize()?
        .parent()
        .map(Path::to_path_buf);
    let registries = match &root {
        Some(root) => Registries::load(&root.join(&config.npmrc)).await,
        None => Registries::default(),
    };
    let options = ResolveOptions::from_config(&config, root, registries);

    let store: Arc<PackageCache> = Arc::new(open_cache()?);
    let scheduler = Arc::new(RequestScheduler::new(
        Arc::new(HttpRegistry::new()),
        config.request_pool_size,
    ));
    let resolver = DependencyResolver::new(store, scheduler);

    for result in resolver.check(&dependencies, &options).await {
        println!(
            "{:<32} {:<16} {:<18} {}",
            result.name,
            result.declared_range,
            format!("{:?}", result.outcome),
            result.latest.as_deref().unwrap_or("-"),
        );
    }

    // Stale records were served; let their refreshes land before exiting
    resolver.settle().await;
    Ok(())
}
