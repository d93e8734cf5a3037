//! roostctl: operator commands for the Roost ingestion engine.
//!
//! Configuration comes from the environment (see `IngestConfig::from_env`).
//! Without `DATABASE_URL` the repositories live in memory: `migrate-legacy`
//! then treats every entity under the legacy root as existing, and session
//! state is gone when the process exits.

use clap::{Parser, Subcommand};
use roost_cli::{print_json, Engine};
use roost_core::Config;
use roost_infra::{init_telemetry, shutdown_signal, shutdown_telemetry};
use roost_worker::{JobProgress, JobRegistry};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "roostctl", about = "Roost image ingestion tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate a legacy image directory into permanent storage
    MigrateLegacy {
        /// Legacy root laid out as {entity_type}/{entity_id}/{category}/{file}
        #[arg(long)]
        root: Option<PathBuf>,
        /// Continue an earlier session instead of starting a new one
        #[arg(long)]
        resume: Option<Uuid>,
    },
    /// Show one bulk migration session, or the most recent ones
    MigrationStatus {
        /// Session UUID
        id: Option<Uuid>,
        /// Maximum number of sessions to list
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Cancel a stored bulk migration session
    CancelMigration {
        /// Session UUID
        id: Uuid,
    },
    /// Delete everything a bulk migration session moved into permanent storage
    RollbackMigration {
        /// Session UUID
        id: Uuid,
    },
    /// Evict expired staging sessions and delete old staged objects
    SweepStaging {
        /// Keep sweeping on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
    },
}

/// Run a bulk job to the end. Ctrl+C pauses it at the next batch boundary.
async fn drive(registry: &JobRegistry, id: Uuid) -> anyhow::Result<()> {
    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!(migration.id = %id, "Pausing bulk migration");
            if let Err(e) = registry.pause(id) {
                tracing::warn!(error = %e, "Bulk migration already stopped");
            }
        }
        _ = until_stopped(registry, id) => {}
    }

    let session = registry.wait(id).await?;
    print_json(&JobProgress::from(&session))
}

async fn until_stopped(registry: &JobRegistry, id: Uuid) {
    while registry.is_running(id) {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_telemetry(config.log_json())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let result = run(cli.command, config).await;
    shutdown_telemetry().await;
    result
}

async fn run(command: Commands, config: Config) -> anyhow::Result<()> {
    match command {
        Commands::MigrateLegacy { root, resume } => {
            let engine = Engine::from_config(config).await?;
            let root = engine.legacy_root(root)?;
            let seeded = engine.seed_entities(&root).await?;
            if !engine.is_persistent() {
                tracing::warn!(entities = seeded, "Entities assumed to exist; image records are lost on exit");
            }
            let registry = engine.registry(root);
            let id = match resume {
                Some(id) => {
                    registry.resume(id).await?;
                    id
                }
                None => registry.start().await?,
            };
            tracing::info!(migration.id = %id, "Bulk migration running");
            drive(&registry, id).await?;
        }
        Commands::MigrationStatus { id, limit } => {
            let engine = Engine::from_config(config).await?;
            match id {
                Some(id) => {
                    let session = engine
                        .store
                        .get(id)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("Migration session {} not found", id))?;
                    print_json(&JobProgress::from(&session))?;
                }
                None => {
                    let sessions = engine.store.list_recent(limit).await?;
                    let progress: Vec<JobProgress> =
                        sessions.iter().map(JobProgress::from).collect();
                    print_json(&progress)?;
                }
            }
        }
        Commands::CancelMigration { id } => {
            let engine = Engine::from_config(config).await?;
            let registry = engine.registry(engine.legacy_root(None).unwrap_or_default());
            registry.cancel(id).await?;
            print_json(&registry.progress(id).await?)?;
        }
        Commands::RollbackMigration { id } => {
            let engine = Engine::from_config(config).await?;
            let registry = engine.registry(engine.legacy_root(None).unwrap_or_default());
            let report = registry.rollback(id).await?;
            print_json(&report)?;
        }
        Commands::SweepStaging { watch } => {
            let engine = Engine::in_memory(config).await?;
            let cleanup = engine.cleanup();
            if watch {
                let handle = cleanup.start();
                shutdown_signal().await;
                handle.abort();
            } else {
                print_json(&cleanup.run_once().await?)?;
            }
        }
    }
    Ok(())
}
