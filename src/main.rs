use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use gallery_migrator::config;
use gallery_migrator::db::{self, SqliteStore};
use gallery_migrator::migration::{Migration, MigrationSettings};
use gallery_migrator::worker;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print the migration status and exit without activating
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/gallery.db", cfg.app.resolved_data_dir()));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let store = Arc::new(SqliteStore::new(pool).with_site_offset(cfg.site.offset()));
    let migration = Arc::new(Migration::new(
        store.clone(),
        store.clone(),
        store,
        MigrationSettings::from_config(&cfg),
    ));

    if args.status {
        let status = migration.status().await?;
        info!(
            state = ?status.state,
            remaining = status.remaining,
            pending = status.pending.len(),
            "migration status"
        );
        for p in status.pending {
            info!(id = p.id, size = p.args.size, offset = p.args.offset, due_at = %p.due_at, "pending batch");
        }
        return Ok(());
    }

    let state = migration.on_activate().await?;
    info!(?state, "migration activated");

    // Single worker; batch steps never overlap.
    let worker_migration = migration.clone();
    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    let worker = tokio::spawn(async move {
        loop {
            match worker::process_due(&worker_migration, Utc::now()).await {
                Ok(started) => {
                    if started == 0 {
                        tokio::time::sleep(poll_sleep).await;
                    }
                }
                Err(err) => {
                    error!(?err, "batch worker error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    worker.abort();

    let removed = migration.on_deactivate().await?;
    info!(removed, "migration deactivated");
    Ok(())
}
