use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use twincore::config::Config;
use twincore::error::Result;
use twincore::store::{calculate_next_backup, recover, BackupManager, Database};

/// This binary is a thin lifecycle host for the embeddable core: it brings
/// up the Control Store (with corruption recovery) and the backup
/// scheduler, then idles until shutdown. Ingestion and querying are library
/// APIs (see `twincore::orchestrator`, `twincore::query`) driven by whatever
/// embeds this crate together with a concrete `SourceAdapter` — the binary
/// itself has no adapter, no HTTP surface, and no CLI harness to run.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = Config::from_env();

    tracing::info!(path = %config.control_store.db_path, "opening control store");
    let database = open_control_store(&config).await?;

    let cancel_token = CancellationToken::new();

    if config.backup.enabled {
        tracing::info!(
            directory = %config.backup.directory,
            retention = config.backup.retention_count,
            "starting backup scheduler"
        );
        spawn_backup_loop(&config, database, cancel_token.child_token());
    }

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, cancelling background tasks");
    cancel_token.cancel();

    Ok(())
}

fn init_logging() {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "twincore=info".into());

    let json_format = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    if json_format {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn db_file_path(config: &Config) -> String {
    config.control_store.db_path.trim_start_matches("file:").to_string()
}

async fn open_control_store(config: &Config) -> Result<Arc<Database>> {
    match Database::new(&config.control_store).await {
        Ok(db) => Ok(Arc::new(db)),
        Err(error) => {
            tracing::error!(error = %error, "control store failed to open, attempting recovery");
            let outcome = recover(db_file_path(config), None).await?;
            tracing::warn!(?outcome, "control store recovered, reopening");
            Ok(Arc::new(Database::new(&config.control_store).await?))
        }
    }
}

fn spawn_backup_loop(config: &Config, database: Arc<Database>, token: CancellationToken) {
    let manager = BackupManager::new(db_file_path(config), config.backup.directory.clone(), config.backup.retention_count);

    tokio::spawn(async move {
        if manager.needs_catch_up(chrono::Utc::now()) {
            tracing::info!("no recent backup found past 02:00, running catch-up backup");
            match manager.run_backup(&database).await {
                Ok(info) => tracing::info!(path = %info.path, valid = info.valid, "catch-up backup completed"),
                Err(error) => tracing::error!(error = %error, "catch-up backup failed"),
            }
        }

        loop {
            let now = chrono::Utc::now();
            let next_backup = calculate_next_backup(now);
            let sleep_secs = (next_backup - now).num_seconds().max(1) as u64;

            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("backup scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(tokio::time::Duration::from_secs(sleep_secs)) => {
                    match manager.run_backup(&database).await {
                        Ok(info) => tracing::info!(path = %info.path, valid = info.valid, "backup completed"),
                        Err(error) => tracing::error!(error = %error, "backup run failed"),
                    }
                }
            }
        }
    });
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
