use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::errors::GuildSyncError;
use crate::sync::orchestrator::SyncOrchestrator;
use crate::sync::state::Trigger;

/// Spawns the periodic sync loop. The first firing happens immediately and
/// is dropped when `skip_first` is set; ticks missed while a run is still
/// going are skipped, not replayed. Exits once `shutdown` flips to `true`
/// or its sender is dropped.
pub fn spawn_scheduler(
    orchestrator: Arc<SyncOrchestrator>,
    period: Duration,
    skip_first: bool,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut skip_next = skip_first;
        tracing::info!(period_secs = period.as_secs(), skip_first, "sync scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if skip_next {
                skip_next = false;
                tracing::debug!("skipping first scheduled sync");
                continue;
            }

            match orchestrator.trigger(Trigger::Scheduled).await {
                Ok(summary) if summary.succeeded() => tracing::debug!(
                    run_id = %summary.run_id,
                    members_synced = summary.members_synced,
                    "scheduled sync complete"
                ),
                Ok(summary) => tracing::warn!(
                    run_id = %summary.run_id,
                    outcome = ?summary.outcome,
                    "scheduled sync failed"
                ),
                Err(GuildSyncError::AlreadyRunning) => {}
                Err(e) => tracing::error!(error = %e, "scheduled sync could not run"),
            }
        }
        tracing::info!("sync scheduler stopped");
    })
}
