mod address;
mod api;
mod auth;
mod cli;
mod config;
mod db;
mod google;
mod merge;
mod models;
mod normalize;
mod queries;
mod relevance;
mod source;
mod sync;
mod writer;

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use config::Config;
use google::GoogleWorkspaceSource;
use models::SyncRunRecord;
use source::MailSource;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub runs: Arc<RwLock<HashMap<String, SyncRunRecord>>>,
    pub queue_tx: mpsc::Sender<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relationship_intel_api=info,tower_http=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if cli::maybe_run_from_cli(&args).await? {
        return Ok(());
    }

    let config = Config::from_env()?;
    db::open(&config.db_path).context("Failed to initialize database")?;
    if config.accounts.is_empty() {
        warn!("RELINTEL_ACCOUNTS is empty; sync runs will only read the calendar");
    }

    let source: Arc<dyn MailSource> = Arc::new(
        GoogleWorkspaceSource::new(config.http_timeout_seconds)
            .context("Failed to build Google client")?,
    );

    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
    let state = AppState {
        config: config.clone(),
        runs: Arc::new(RwLock::new(HashMap::new())),
        queue_tx,
    };

    sync::spawn_sync_worker(state.clone(), source, queue_rx);
    sync::spawn_cleanup_worker(state.clone());

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(
        db = %config.db_path.display(),
        token_dir = %config.token_dir.display(),
        project = %config.project_id,
        "relationship-intel-api listening on {}",
        config.bind_addr
    );
    axum::serve(listener, app).await?;
    Ok(())
}
