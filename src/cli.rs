///
/// This module implements the CLI interface for tree-sync: command parsing, argument
/// validation, and the async entrypoint used by `main` and the integration tests.
///
/// All engine logic (tree model, cache, reconciler, retries) lives in the
/// [`tree-sync-core`] crate. This module wires configuration, the content loader and
/// the HTTP remote together and reports the outcome.
///
/// ## Features
/// - Entry struct [`Cli`] with the `sync` subcommand.
/// - Per-collection cache files under the configured `cache_dir`.
/// - A one-line summary per collection; failures are listed and make the run fail.
///
/// ## How To Use
/// - Command line: `tree-sync sync --config tree-sync.yaml [--mode force] [--dry-run]`.
/// - Programmatic: call [`run`] with a constructed [`Cli`].
///
/// [`tree-sync-core`]: ../../tree_sync_core/
use crate::content::load_collection;
use crate::load_config::{load_config, CliConfig, CollectionSection};
use crate::remote::{NotionClient, NotionConfig};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tree_sync_core::cache::CacheStore;
use tree_sync_core::client::RemoteClient;
use tree_sync_core::contract::{RemoteRef, RemoteStore};
use tree_sync_core::synchronise::{synchronise, SyncMode, SyncOptions};
use tree_sync_core::throttle::RateLimiter;

/// CLI for tree-sync: mirror local content trees into a remote document store.
#[derive(Parser)]
#[clap(
    name = "tree-sync",
    version,
    about = "Mirror local folders, documents and tables into a hierarchical document store"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synchronize the configured collections to the remote
    Sync(SyncArgs),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Only write what changed since the last run
    #[default]
    Diff,
    /// Rewrite every document and dataset
    Force,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Diff => SyncMode::Diff,
            ModeArg::Force => SyncMode::Force,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct SyncArgs {
    /// Path to the YAML config file
    #[clap(long)]
    pub config: PathBuf,
    #[clap(long, value_enum, default_value_t = ModeArg::Diff)]
    pub mode: ModeArg,
    /// Decide and report without writing to the remote or the cache
    #[clap(long)]
    pub dry_run: bool,
    /// Only sync paths containing this text (case-insensitive)
    #[clap(long)]
    pub filter: Option<String>,
    /// Only sync the named collection
    #[clap(long)]
    pub collection: Option<String>,
    /// Archive the collection's remote root and forget its cache before syncing
    #[clap(long)]
    pub clean: bool,
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync(args) => {
            let config = load_config(&args.config)?;
            tracing::info!(command = "sync", mode = ?args.mode, dry_run = args.dry_run, "Starting synchronisation process");
            let remote = NotionClient::new(NotionConfig {
                api_base_url: config.remote.api_base_url.clone(),
                api_version: config.remote.api_version.clone(),
                token: config.secrets.api_key.clone(),
                timeout: Duration::from_secs(config.remote.timeout_secs),
            })?;
            let client = RemoteClient::new(
                remote,
                RateLimiter::per_second(config.remote.requests_per_second),
                config.retry.policy(),
            );
            sync_collections(&client, &config, &args).await
        }
    }
}

fn select_collections<'c>(
    config: &'c CliConfig,
    only: Option<&str>,
) -> Result<Vec<&'c CollectionSection>> {
    match only {
        None => Ok(config.collections.iter().collect()),
        Some(name) => {
            let selected: Vec<_> = config
                .collections
                .iter()
                .filter(|c| c.name == name)
                .collect();
            if selected.is_empty() {
                anyhow::bail!("No collection named '{name}' in the config");
            }
            Ok(selected)
        }
    }
}

/// Sync every selected collection with `remote`, printing one summary line
/// per collection. Fails if any node failed.
pub async fn sync_collections<R: RemoteStore>(
    remote: &R,
    config: &CliConfig,
    args: &SyncArgs,
) -> Result<()> {
    let root = RemoteRef::new(config.secrets.root_page_id.clone());
    let options = SyncOptions {
        mode: args.mode.into(),
        dry_run: args.dry_run,
        clean: args.clean,
        concurrency: config.concurrency,
    };

    let mut failed = 0;
    for collection in select_collections(config, args.collection.as_deref())? {
        let tree = load_collection(&collection.name, &collection.source_dir)?;
        let tree = match &args.filter {
            None => tree,
            Some(filter) => match tree.filtered(filter) {
                Some(tree) => tree,
                None => {
                    tracing::info!(collection = %collection.name, filter = %filter, "Nothing matches filter, skipping collection");
                    continue;
                }
            },
        };

        let cache_file = config.cache_dir.join(format!("{}.json", collection.name));
        let mut cache = CacheStore::load(&cache_file)
            .with_context(|| format!("Failed to load cache {}", cache_file.display()))?;

        let report = synchronise(remote, &root, &tree, &mut cache, &options)
            .await
            .with_context(|| format!("Failed to save cache {}", cache_file.display()))?;

        let summary = report.summary();
        let marker = if report.dry_run { " (dry run)" } else { "" };
        println!("{}{marker}: {summary}", collection.name);
        for failure in report.failures() {
            let reason = failure
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            println!("  failed {}: {reason}", failure.path);
        }
        failed += summary.failed;
    }

    if failed > 0 {
        tracing::error!(command = "sync", failed, "Synchronisation finished with failures");
        anyhow::bail!("{failed} node(s) failed to sync");
    }
    tracing::info!(command = "sync", "Synchronisation complete");
    Ok(())
}
