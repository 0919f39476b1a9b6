//! Command-line interface.
//!
//! `run` takes the caller's migration registry so downstream binaries can
//! compile their generated migrations in and still reuse this dispatch.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use crate::config::{load_config, ProjectConfig};
use crate::ingest::batch::IngestTracker;
use crate::ingest::parsers::{parse_file, FileFormat};
use crate::ingest::remote::{fetch_remote, FetchOptions, FetcherRegistry, FileCache, RemoteSource};
use crate::ingest::validate::{validate, ColumnRule, DataSchema};
use crate::ir::hash::hash_snapshot;
use crate::ir::parse_models;
use crate::ledger::Ledger;
use crate::migrate::engine::MigrationEngine;
use crate::migrate::operations::NoClient;
use crate::migrate::registry::MigrationRegistry;
use crate::scaffold;
use crate::verify::verify_project;

#[derive(Parser)]
#[clap(author, version, about = "Schema migration manager for graph databases")]
struct Cli {
    #[clap(short, long, global = true)]
    log_level: Option<String>,
    /// Project root; discovered by walking up from the current directory
    /// when omitted.
    #[clap(long, global = true)]
    project: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project: config file, models and migrations directories
    Init {
        #[clap(short, long, default_value = "my-graph")]
        name: String,
        #[clap(long, default_value = ".")]
        path: PathBuf,
    },
    /// Scaffold a node model manifest
    CreateNode {
        class_name: String,
        #[clap(long)]
        kgid: Option<String>,
    },
    /// Scaffold a relationship model manifest
    CreateRelationship {
        class_name: String,
        #[clap(long)]
        rel_type: Option<String>,
        #[clap(long)]
        kgid: Option<String>,
    },
    /// Generate a migration file from the current model manifests
    CreateMigration {
        description: String,
        /// Skip the schema snapshot and diff; bodies are left empty
        #[clap(long)]
        no_snapshot: bool,
        /// Mark the migration as not safe to roll back
        #[clap(long = "unsafe")]
        unsafe_rollback: bool,
    },
    /// Apply pending migrations
    Upgrade {
        /// Stop after this revision id
        #[clap(long)]
        target: Option<String>,
        #[clap(long)]
        dry_run: bool,
    },
    /// Roll back applied migrations (one step without a target)
    Downgrade {
        /// Roll back until this revision id is the head (it stays applied)
        #[clap(long)]
        target: Option<String>,
        #[clap(long)]
        dry_run: bool,
    },
    /// Show chain head, applied and pending migrations, and recent batches
    Status,
    /// Run consistency checks across models, registry, and ledger
    Verify,
    /// Parse a dataset file, preview rows, and record an ingest batch
    LoadData {
        path: PathBuf,
        #[clap(long)]
        format: Option<String>,
        /// Rows to preview
        #[clap(long, default_value = "5")]
        head: usize,
        /// Parse and preview only; do not record a batch
        #[clap(long)]
        validate_only: bool,
    },
    /// Validate a dataset file against ad-hoc rules
    ValidateData {
        path: PathBuf,
        #[clap(long)]
        format: Option<String>,
        /// Columns that must be present and non-null
        #[clap(long)]
        require: Vec<String>,
        /// Columns whose values must be unique
        #[clap(long)]
        unique: Vec<String>,
        #[clap(long)]
        min_rows: Option<usize>,
        #[clap(long)]
        max_rows: Option<usize>,
        /// Reject columns not named by --require or --unique
        #[clap(long)]
        strict: bool,
    },
    /// Download a remote dataset into the project, via the cache
    FetchData {
        uri: String,
        /// Expected SHA-256 hex digest
        #[clap(long)]
        checksum: Option<String>,
        #[clap(long)]
        filename: Option<String>,
        /// Destination directory, default `data/` under the project root
        #[clap(long)]
        dest: Option<PathBuf>,
        #[clap(long)]
        no_cache: bool,
    },
    /// Delete the download cache
    CacheClear {
        #[clap(short, long)]
        yes: bool,
    },
    /// Re-verify cached downloads, evicting corrupted entries
    CacheVerify,
}

pub async fn run(registry: MigrationRegistry) -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    match cli.command {
        Commands::Init { name, path } => init_project(&name, &path),
        Commands::CreateNode { class_name, kgid } => {
            let config = load_config(cli.project.as_deref())?;
            let path = scaffold::scaffold_node(&config.models_dir(), &class_name, kgid.as_deref())?;
            println!("Created {}", path.display());
            Ok(())
        }
        Commands::CreateRelationship {
            class_name,
            rel_type,
            kgid,
        } => {
            let config = load_config(cli.project.as_deref())?;
            let path = scaffold::scaffold_relationship(
                &config.models_dir(),
                &class_name,
                rel_type.as_deref(),
                kgid.as_deref(),
            )?;
            println!("Created {}", path.display());
            Ok(())
        }
        Commands::CreateMigration {
            description,
            no_snapshot,
            unsafe_rollback,
        } => {
            let config = load_config(cli.project.as_deref())?;
            let ledger = Ledger::open(&config.ledger_file()).await?;
            let engine = MigrationEngine::new(&config, &ledger, &registry);
            let snapshot = if no_snapshot {
                None
            } else {
                Some(parse_models(&config.models_dir())?)
            };
            let path = engine
                .create_migration(&description, snapshot, !unsafe_rollback)
                .await?;
            println!("Created {}", path.display());
            println!("Register its migration() in your registry before upgrading.");
            Ok(())
        }
        Commands::Upgrade { target, dry_run } => {
            let config = load_config(cli.project.as_deref())?;
            let ledger = Ledger::open(&config.ledger_file()).await?;
            let engine = MigrationEngine::new(&config, &ledger, &registry);
            let applied = engine
                .upgrade(target.as_deref(), None::<&mut NoClient>, dry_run)
                .await?;
            if applied.is_empty() {
                println!("Nothing to apply.");
            } else {
                for revision in &applied {
                    println!("{} {}", if dry_run { "would apply" } else { "applied" }, revision);
                }
            }
            Ok(())
        }
        Commands::Downgrade { target, dry_run } => {
            let config = load_config(cli.project.as_deref())?;
            let ledger = Ledger::open(&config.ledger_file()).await?;
            let engine = MigrationEngine::new(&config, &ledger, &registry);
            let rolled_back = engine
                .downgrade(target.as_deref(), None::<&mut NoClient>, dry_run)
                .await?;
            if rolled_back.is_empty() {
                println!("Nothing to roll back.");
            } else {
                for revision in &rolled_back {
                    println!(
                        "{} {}",
                        if dry_run { "would roll back" } else { "rolled back" },
                        revision
                    );
                }
            }
            Ok(())
        }
        Commands::Status => {
            let config = load_config(cli.project.as_deref())?;
            let ledger = Ledger::open(&config.ledger_file()).await?;
            let engine = MigrationEngine::new(&config, &ledger, &registry);
            let status = engine.status().await?;
            println!("Project: {}", config.project_name);
            println!("Head:    {}", status.head.as_deref().unwrap_or("(none)"));
            println!("Applied: {}", status.applied.len());
            if status.pending.is_empty() {
                println!("Pending: none");
            } else {
                println!("Pending: {}", status.pending.len());
                for revision in &status.pending {
                    println!("  {revision}");
                }
            }
            let batches = ledger.get_batches(None).await?;
            if !batches.is_empty() {
                println!("Recent batches:");
                for batch in batches.iter().take(5) {
                    println!(
                        "  {} {} ({} records)",
                        batch.batch_id,
                        batch.source_file,
                        batch
                            .record_count
                            .map(|n| n.to_string())
                            .unwrap_or_else(|| "?".to_string())
                    );
                }
            }
            Ok(())
        }
        Commands::Verify => {
            let config = load_config(cli.project.as_deref())?;
            let ledger = Ledger::open(&config.ledger_file()).await?;
            let report = verify_project(&config, &ledger, &registry, None).await?;
            println!("{}", report.summary());
            if !report.passed() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::LoadData {
            path,
            format,
            head,
            validate_only,
        } => {
            let config = load_config(cli.project.as_deref())?;
            let format = parse_format(format.as_deref())?;
            let result = parse_file(&path, format)?;
            println!(
                "{}: {} rows, columns: {}",
                path.display(),
                result.row_count,
                result.column_names.join(", ")
            );
            for record in result.records.iter().take(head) {
                println!("{}", json!(record));
            }
            if !validate_only {
                let ledger = Ledger::open(&config.ledger_file()).await?;
                let tracker = IngestTracker::new(&ledger);
                let batch_id = tracker
                    .register_batch(&path, None, Some(result.row_count as i64))
                    .await?;
                println!("Recorded batch {batch_id}");
            }
            Ok(())
        }
        Commands::ValidateData {
            path,
            format,
            require,
            unique,
            min_rows,
            max_rows,
            strict,
        } => {
            let format = parse_format(format.as_deref())?;
            let result = parse_file(&path, format)?;
            let mut schema = DataSchema::new();
            for column in &require {
                schema = schema.column(ColumnRule::new(column).required());
            }
            for column in &unique {
                if !require.contains(column) {
                    schema = schema.column(ColumnRule::new(column));
                }
                schema = schema.unique(column);
            }
            if let Some(min) = min_rows {
                schema = schema.min_rows(min);
            }
            if let Some(max) = max_rows {
                schema = schema.max_rows(max);
            }
            if strict {
                schema = schema.strict();
            }
            let outcome = validate(&result.records, &schema);
            println!("{}", outcome.summary());
            if !outcome.is_valid() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::FetchData {
            uri,
            checksum,
            filename,
            dest,
            no_cache,
        } => {
            let config = load_config(cli.project.as_deref())?;
            let mut source = RemoteSource::new(&uri);
            if let Some(checksum) = &checksum {
                source = source.with_checksum(checksum);
            }
            if let Some(filename) = &filename {
                source = source.with_filename(filename);
            }
            let options = FetchOptions {
                dest_dir: dest.unwrap_or_else(|| config.project_root.join("data")),
                cache_dir: Some(config.cache_dir()),
                use_cache: !no_cache,
            };
            let fetchers = FetcherRegistry::new();
            let result = fetch_remote(&source, &fetchers, &options).await?;
            println!(
                "Fetched {} -> {} ({} bytes{})",
                result.uri,
                result.local_path.display(),
                result.size,
                if result.from_cache { ", from cache" } else { "" }
            );

            let ledger = Ledger::open(&config.ledger_file()).await?;
            let tracker = IngestTracker::new(&ledger);
            let batch_id = tracker
                .register_remote_batch(&result.uri, &result.checksum, None, None)
                .await?;
            println!("Recorded batch {batch_id}");
            Ok(())
        }
        Commands::CacheClear { yes } => {
            if !yes {
                bail!("Pass --yes to confirm clearing the download cache");
            }
            let config = load_config(cli.project.as_deref())?;
            FileCache::new(&config.cache_dir()).clear()?;
            println!("Cache cleared.");
            Ok(())
        }
        Commands::CacheVerify => {
            let config = load_config(cli.project.as_deref())?;
            let (kept, evicted) = FileCache::new(&config.cache_dir()).verify_all()?;
            println!("{kept} entries verified, {evicted} evicted.");
            Ok(())
        }
    }
}

fn parse_format(raw: Option<&str>) -> Result<Option<FileFormat>> {
    raw.map(FileFormat::from_str)
        .transpose()
        .context("invalid --format")
}

fn init_project(name: &str, path: &Path) -> Result<()> {
    let config = ProjectConfig::new(name, path);
    let config_path = config.save()?;
    std::fs::create_dir_all(config.models_dir())?;
    std::fs::create_dir_all(config.migrations_dir())?;
    info!("Initialized project '{}'", name);
    println!("Created {}", config_path.display());
    println!("Models:     {}", config.models_dir().display());
    println!("Migrations: {}", config.migrations_dir().display());

    // Baseline snapshot of the (empty) models directory, for reference.
    let snapshot = parse_models(&config.models_dir())?;
    let hashed = hash_snapshot(snapshot).context("hash baseline snapshot")?;
    info!("Baseline schema hash {}", hashed.schema_hash);
    Ok(())
}

fn setup_logging(log_level: &Option<String>) {
    let log_level = match log_level
        .as_ref()
        .unwrap_or(&"info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!(
            "handlebars=off,sqlx=warn,{}",
            log_level
        )))
        .without_time()
        .init();
}
