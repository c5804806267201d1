use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use ringstore_core::core_cache::SnapshotCache;
use ringstore_core::core_import::ImportService;
use ringstore_core::core_keyring::{KeyringRecord, RingType};
use ringstore_core::core_ops::{
    CancelToken, OperationResult, ProgressReporter, ResultPayload, TracingProgress,
};
use ringstore_core::core_store::RingFilter;
use ringstore_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use ringstore_core::metrics::init_metrics;
use ringstore_core::{Config, RingstoreContext, StoreStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

mod input;

use input::{PassphraseInput, MASTER_PASSPHRASE_ENV, NEW_PASSPHRASE_ENV};

#[derive(Parser, Debug)]
#[command(name = "ringstore")]
#[command(author, version, about = "Keyring store maintenance", long_about = None)]
struct Args {
    /// Directory holding the keyring database, preferences and caches
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// TOML configuration file; environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show row counts, preference flags and pending caches
    Status,
    /// Rebuild the keyring database from snapshot caches
    Consolidate,
    /// Finish an interrupted consolidation
    Recover,
    /// Move secret keyrings under a master passphrase
    Migrate,
    /// Restore secret keyrings from the migration snapshot
    RevertMigration,
    /// Move secret keyrings back to a per-key passphrase
    MigrateBack,
    /// Write keyrings to a cache file
    Export {
        output: String,
        /// Include secret keyrings
        #[arg(long)]
        secret: bool,
    },
    /// Import keyrings from a cache file written by `export`
    Import {
        #[arg(required_unless_present = "pending")]
        input: Option<String>,
        /// Only queue the file for a later `import --pending`
        #[arg(long, conflicts_with = "pending")]
        queue: bool,
        /// Import the queued file from the cache directory
        #[arg(long)]
        pending: bool,
    },
}

impl Command {
    fn resumes_consolidation(&self) -> bool {
        !matches!(self, Command::Recover | Command::Status)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let mut log_config = LogConfig::from_config(&config.logging)?;
    if args.json_logs {
        log_config = log_config.json_format(true);
    }
    init_logging_with_config(log_config)?;
    init_metrics();

    info!(data_dir = %config.store.data_dir.display(), "ringstore started");
    let context = Arc::new(RingstoreContext::open(&config)?);

    if args.command.resumes_consolidation() {
        let engine = context.consolidation();
        let resumed = tokio::task::spawn_blocking(move || {
            engine.resume_if_interrupted(&TracingProgress)
        })
        .await?;
        if let Some(result) = resumed {
            warn!("Resumed an interrupted consolidation");
            report(&result, args.json)?;
            if !result.is_ok() {
                bail!("interrupted consolidation could not be completed");
            }
        }
    }

    match args.command {
        Command::Status => print_status(&context.status()?, args.json)?,
        Command::Consolidate => {
            let engine = context.consolidation();
            let result = tokio::task::spawn_blocking(move || engine.consolidate(&TracingProgress)).await?;
            finish(&result, args.json)?;
        }
        Command::Recover => {
            let engine = context.consolidation();
            let result = tokio::task::spawn_blocking(move || engine.recover(&TracingProgress)).await?;
            finish(&result, args.json)?;
        }
        Command::Migrate => {
            let cancel = cancel_on_ctrl_c();
            let ctx = context.clone();
            let results = tokio::task::spawn_blocking(move || run_migration(&ctx, &cancel)).await??;
            for result in &results {
                report(result, args.json)?;
            }
            if let Some(last) = results.last() {
                check(last)?;
            }
        }
        Command::RevertMigration => {
            let engine = context.migration();
            let result = tokio::task::spawn_blocking(move || engine.revert(&TracingProgress)).await?;
            finish(&result, args.json)?;
        }
        Command::MigrateBack => {
            let engine = context.migration();
            let result = tokio::task::spawn_blocking(move || -> Result<OperationResult> {
                let mut input = PassphraseInput::stdin();
                let master = input
                    .read_or_env(MASTER_PASSPHRASE_ENV, "Master passphrase")?
                    .ok_or_else(|| anyhow!("no master passphrase given"))?;
                let new = input
                    .read_or_env(NEW_PASSPHRASE_ENV, "New passphrase for every key")?
                    .ok_or_else(|| anyhow!("no new passphrase given"))?;
                Ok(engine.migrate_back(&TracingProgress, &master, &new))
            })
            .await??;
            finish(&result, args.json)?;
        }
        Command::Export { output, secret } => {
            let path = expand_path(&output);
            let written = export(&context, &path, secret)?;
            if args.json {
                println!("{}", serde_json::json!({ "exported": written, "path": path }));
            } else {
                println!("Exported {} keyrings to {}", written, path.display());
            }
        }
        Command::Import {
            input,
            queue,
            pending,
        } => {
            let cache_dir = context.config().cache_dir();
            let result = if pending {
                let service = context.import_service();
                let cancel = cancel_on_ctrl_c();
                tokio::task::spawn_blocking(move || {
                    service.import_from_cache(&cache_dir, &TracingProgress, Some(&cancel))
                })
                .await??
            } else {
                let path = expand_path(input.as_deref().unwrap_or_default());
                let records = read_records(&path)?;
                if queue {
                    let queued = ImportService::queue_for_import(&cache_dir, &records)?;
                    println!("Queued {} keyrings for import", queued);
                    return Ok(());
                }
                let progress: Arc<dyn ProgressReporter> = Arc::new(TracingProgress);
                context
                    .import_service()
                    .parallel_import(records, progress, cancel_on_ctrl_c())
                    .await
            };
            finish(&OperationResult::from(result), args.json)?;
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(expand_path(path))
            .with_context(|| format!("loading configuration from {}", path))?,
        None => Config::from_env()?,
    };

    if let Some(dir) = &args.data_dir {
        config.store.data_dir = expand_path(dir);
    }
    if let Some(level) = &args.log_level {
        match LogLevel::parse(level) {
            Some(parsed) => config.logging.level = parsed.as_str().to_string(),
            None => eprintln!("Invalid log level '{}', keeping '{}'", level, config.logging.level),
        }
    }
    config.validate()?;
    Ok(config)
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Cancel token tripped by the first Ctrl-C
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

/// Consolidate, snapshot, collect passphrases, then rewrite.
///
/// A store that is already partially migrated skips consolidation and
/// continues from its snapshot. Returns the result of every step run.
fn run_migration(context: &RingstoreContext, cancel: &CancelToken) -> Result<Vec<OperationResult>> {
    let engine = context.migration();
    let mut results = Vec::new();

    if context.preferences().partially_migrated()? {
        info!("Store is partially migrated, continuing without consolidation");
    } else {
        let consolidated = context.consolidation().consolidate(&TracingProgress);
        let ok = consolidated.is_ok();
        results.push(consolidated);
        if !ok {
            error!("Consolidation failed, not migrating");
            return Ok(results);
        }
    }

    if engine.has_cache() {
        info!("Reusing secret keyring snapshot from an earlier run");
    } else {
        let snapshot = engine.create_secret_keyring_cache(&TracingProgress);
        let ok = snapshot.is_ok();
        results.push(snapshot);
        if !ok {
            return Ok(results);
        }
    }

    let mut input = PassphraseInput::stdin();
    let master = input
        .read_or_env(MASTER_PASSPHRASE_ENV, "New master passphrase")?
        .ok_or_else(|| anyhow!("no master passphrase given"))?;

    let collection = engine.collect_passphrases(&mut input, &master);
    if !collection.is_complete() {
        error!(status = %collection.status, "Passphrase collection did not complete");
        results.push(OperationResult {
            status: collection.status,
            log: collection.log,
            payload: ResultPayload::None,
        });
        return Ok(results);
    }

    results.push(engine.migrate(
        &TracingProgress,
        &collection.passphrases,
        &master,
        Some(cancel),
    ));
    Ok(results)
}

fn export(context: &RingstoreContext, path: &Path, secret: bool) -> Result<usize> {
    let store = context.store();
    let mut records = store.query(RingType::Public, RingFilter::All)?;
    if secret {
        records.extend(store.query(RingType::Secret, RingFilter::All)?);
    }

    let (dir, name) = split_cache_path(path)?;
    std::fs::create_dir_all(&dir)?;
    let written = SnapshotCache::<KeyringRecord>::new(&dir, &name).write_cache(records.len(), &records)?;
    info!(written, path = %path.display(), "Export finished");
    Ok(written)
}

fn read_records(path: &Path) -> Result<Vec<KeyringRecord>> {
    let (dir, name) = split_cache_path(path)?;
    let records = SnapshotCache::<KeyringRecord>::new(&dir, &name)
        .read_cache(false)
        .with_context(|| format!("opening {}", path.display()))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

fn split_cache_path(path: &Path) -> Result<(PathBuf, String)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("{} is not a file path", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name.to_string()))
}

fn report(result: &OperationResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        print!("{}", result.log);
        println!("status: {}", result.status);
    }
    Ok(())
}

fn check(result: &OperationResult) -> Result<()> {
    if !result.is_ok() {
        bail!("operation finished with status {}", result.status);
    }
    Ok(())
}

fn finish(result: &OperationResult, json: bool) -> Result<()> {
    report(result, json)?;
    check(result)
}

fn print_status(status: &StoreStatus, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(status)?);
        return Ok(());
    }
    println!("public keyrings:        {}", status.public_rows);
    println!("secret keyrings:        {} ({} usable)", status.secret_rows, status.usable_secret_rows);
    println!("master passphrase:      {}", status.flags.has_master_passphrase);
    println!("partially migrated:     {}", status.flags.partially_migrated);
    println!("consolidation pending:  {}", status.flags.cached_consolidate);
    println!("import queued:          {}", status.pending_import);
    println!("migration snapshot:     {}", status.pending_migration_cache);
    Ok(())
}
