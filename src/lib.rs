pub mod commands;
pub mod config;
pub mod context;
pub mod errors;
pub mod identity;
pub mod remote;
pub mod storage;
pub mod sync;

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::context::AppContext;
use crate::errors::GuildSyncResult;
use crate::sync::notify::SyncEvent;
use crate::sync::scheduler::spawn_scheduler;

/// Starts the service: loads config, opens storage, and runs the sync
/// scheduler until Ctrl-C.
pub async fn run() -> GuildSyncResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let config = config::load_config()?;
    let (ctx, notifier) = AppContext::from_config(config)?;
    let ctx = Arc::new(ctx);
    tracing::info!(
        experience_records = ctx.experience.count()?,
        links = ctx.links.count()?,
        "storage ready"
    );

    let mut events = notifier.subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "sync event logger lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = spawn_scheduler(
        ctx.orchestrator.clone(),
        ctx.config.sync.interval(),
        ctx.config.sync.skip_first_tick,
        shutdown_rx,
    );
    tracing::info!("guildsync running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.await {
        tracing::error!(error = %e, "scheduler task ended abnormally");
    }
    event_logger.abort();
    if let Some(summary) = ctx.orchestrator.last_summary() {
        tracing::info!(
            run_id = %summary.run_id,
            outcome = ?summary.outcome,
            members_synced = summary.members_synced,
            "last sync run before shutdown"
        );
    }
    Ok(())
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::StaffAlert { .. } => tracing::error!(?event, "staff alert"),
        other => tracing::info!(event = ?other, "sync event"),
    }
}
