//! Thin CLI front-end for the migration engine.
//!
//! Mirrors the teacher's entry point (`examples/lacodda-kasl/src/main.rs`):
//! env-gated `tracing_subscriber` init, then delegate to a `clap` derive
//! command enum. `init`/`generate` are intentionally not implemented —
//! migrations in this engine are compiled Rust values registered with a
//! [`MigrationRegistry`], not files a CLI can scaffold (see `chain::discovery`
//! module docs); an embedding application builds its own registry and wires
//! these same command handlers into its own binary.

use std::env;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use dbee_migrate::chain::{Chain, MigrationRegistry};
use dbee_migrate::config::EngineConfig;
use dbee_migrate::db::MongoBackend;
use dbee_migrate::history::HistoryStore;
use dbee_migrate::{applier::Applier, catchup::CatchupEngine, validator};

#[derive(Debug, Parser)]
#[command(name = "migradoc", about = "Schema-aware migration engine for MongoDB-family databases")]
struct Cli {
    /// Path to the engine configuration file (TOML). Falls back to defaults
    /// if absent.
    #[arg(long, default_value = "migradoc.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate the migration chain offline: schema-change guards,
    /// reversibility proofs, leaf-vs-project schema match. Touches no
    /// database.
    Check,

    /// Apply pending migrations in chain order.
    Migrate {
        /// Validate and report what would run without applying anything.
        #[arg(long)]
        dry_run: bool,
        /// Apply even if a pending migration is marked irreversible.
        #[arg(long)]
        force: bool,
    },

    /// Roll back the most recently applied migration.
    Rollback {
        /// Roll back even if the migration is marked irreversible.
        #[arg(long)]
        force: bool,
    },

    /// Show the current status of every migration in the chain.
    Status {
        #[arg(long)]
        verbose: bool,
        #[arg(long)]
        history: bool,
    },

    /// Print the append-only history log.
    History {
        #[arg(long)]
        migration_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if env::var("MIGRADOC_DEBUG").is_ok() || env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "dbee_migrate=info".into()))
            .init();
    }

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    // This binary ships with no migrations of its own; an embedding
    // application registers its migrations here instead. The empty registry
    // still exercises the full check/status/history surface against whatever
    // history already exists in the target database.
    let registry = MigrationRegistry::new();
    let chain = registry.build_chain().context("failed to build migration chain")?;

    match cli.command {
        Commands::Check => run_check(&chain),
        Commands::Migrate { dry_run, force } => run_migrate(&config, &chain, dry_run, force).await,
        Commands::Rollback { force } => run_rollback(&config, &chain, force).await,
        Commands::Status { verbose, history } => run_status(&config, &chain, verbose, history).await,
        Commands::History { migration_id } => run_history(&config, migration_id).await,
    }
}

fn load_config(path: &str) -> Result<EngineConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => EngineConfig::from_toml_str(&contents).map_err(Into::into),
        Err(_) => {
            tracing::debug!(path, "no configuration file found, using defaults");
            Ok(EngineConfig::default())
        }
    }
}

fn run_check(chain: &Chain) -> Result<()> {
    validator::validate_chain(chain.migrations()).context("chain validation failed")?;
    println!("chain is valid: {} migration(s)", chain.migrations().len());
    Ok(())
}

async fn run_migrate(config: &EngineConfig, chain: &Chain, dry_run: bool, force: bool) -> Result<()> {
    validator::validate_chain(chain.migrations()).context("chain validation failed")?;

    let backend = MongoBackend::connect(config).await?;
    let history = HistoryStore::new(&backend);
    let applied = history.applied_ids().await?;
    let pending: Vec<_> = chain.migrations().iter().filter(|m| !applied.contains(&m.id)).collect();

    if dry_run {
        println!("{} migration(s) pending:", pending.len());
        for m in &pending {
            println!("  {} — {}", m.id, m.name);
        }
        return Ok(());
    }

    let applier = Applier::new(&backend);
    for migration in pending {
        let compiled = migration.compile()?;
        if compiled.is_irreversible() && !force {
            tracing::warn!(migration_id = %migration.id, "migration is irreversible");
        }
        applier.apply_migration(migration).await.with_context(|| format!("applying {}", migration.id))?;
        println!("applied {} — {}", migration.id, migration.name);
    }

    CatchupEngine::new(&backend).run(chain, &history.applied_ids().await?).await.context("catch-up pass failed")?;
    Ok(())
}

async fn run_rollback(config: &EngineConfig, chain: &Chain, force: bool) -> Result<()> {
    let backend = MongoBackend::connect(config).await?;
    let history = HistoryStore::new(&backend);
    let Some(last) = history.last_applied().await? else {
        println!("nothing to roll back");
        return Ok(());
    };
    let Some(migration) = chain.get(&last.migration_id) else {
        anyhow::bail!("applied migration {} is not present in the current chain", last.migration_id);
    };

    let applier = Applier::new(&backend);
    applier.rollback_migration(migration, force).await.with_context(|| format!("rolling back {}", migration.id))?;
    println!("rolled back {} — {}", migration.id, migration.name);
    Ok(())
}

async fn run_status(config: &EngineConfig, chain: &Chain, verbose: bool, show_history: bool) -> Result<()> {
    let backend = MongoBackend::connect(config).await?;
    let history = HistoryStore::new(&backend);

    for migration in chain.migrations() {
        let status = history.current_status_of(&migration.id).await?;
        println!("{:<24} {:?}", migration.id, status);
        if verbose {
            println!("    name: {}", migration.name);
        }
        if show_history {
            for record in history.history_of(&migration.id).await? {
                println!("    {:?} {:?} at {}", record.operation, record.status, record.executed_at);
            }
        }
    }
    Ok(())
}

async fn run_history(config: &EngineConfig, migration_id: Option<String>) -> Result<()> {
    let backend = MongoBackend::connect(config).await?;
    let history = HistoryStore::new(&backend);
    let records = match migration_id {
        Some(id) => history.history_of(&id).await?,
        None => history.all().await?,
    };
    for record in records {
        println!(
            "{} {:?} {:?} {} ({}ms){}",
            record.executed_at,
            record.operation,
            record.status,
            record.migration_id,
            record.duration_ms.unwrap_or_default(),
            record.error.map(|e| format!(" error={e}")).unwrap_or_default(),
        );
    }
    Ok(())
}
