use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, Transaction};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::errors::{GuildSyncError, GuildSyncResult};
use crate::identity::normalizer::normalize;
use crate::remote::types::{GuildData, GuildMember};
use crate::remote::GuildSource;
use crate::storage::experience::{parse_date, upsert_in};
use crate::storage::{run_blocking, Database};
use crate::sync::guard::RunGuard;
use crate::sync::notify::Notifier;
use crate::sync::state::{ReconcileStats, RunOutcome, RunSummary, SyncRun, SyncState, Trigger};

/// Reconciliation policy. The HTTP timeout lives on the guild client, so a
/// rate-limit wait inside a fetch is never cancelled here.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub ignore_before: Option<NaiveDate>,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            ignore_before: cfg.ignore_before,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

/// Coordinates fetch → reconcile → commit → notify for one run at a time.
///
/// Scheduled and manual triggers both enter through [`SyncOrchestrator::trigger`];
/// a trigger that arrives while a run is in flight is rejected, never queued.
pub struct SyncOrchestrator {
    db: Arc<Database>,
    source: Arc<dyn GuildSource>,
    notifier: Arc<dyn Notifier>,
    settings: SyncSettings,
    guard: RunGuard,
    state_tx: watch::Sender<SyncState>,
    last_summary: Mutex<Option<RunSummary>>,
}

impl SyncOrchestrator {
    pub fn new(
        db: Arc<Database>,
        source: Arc<dyn GuildSource>,
        notifier: Arc<dyn Notifier>,
        settings: SyncSettings,
    ) -> Self {
        let (state_tx, _state_rx) = watch::channel(SyncState::Idle);
        Self {
            db,
            source,
            notifier,
            settings,
            guard: RunGuard::new(),
            state_tx,
            last_summary: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    pub fn last_summary(&self) -> Option<RunSummary> {
        match self.last_summary.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Runs one sync to completion. A failed run is still `Ok` with a
    /// `Failed` outcome; only `AlreadyRunning` is returned as an error.
    pub async fn trigger(&self, trigger: Trigger) -> GuildSyncResult<RunSummary> {
        let Some(_permit) = self.guard.try_acquire() else {
            match &trigger {
                Trigger::Scheduled => {
                    tracing::debug!("scheduled sync skipped: a run is already in progress")
                }
                Trigger::Manual { requested_by } => tracing::info!(
                    requested_by,
                    "manual sync rejected: a run is already in progress"
                ),
            }
            return Err(GuildSyncError::AlreadyRunning);
        };

        let mut run = SyncRun::start(trigger);
        self.state_tx.send_replace(SyncState::Running { run_id: run.run_id });
        let _running = RunningState {
            tx: &self.state_tx,
            run_id: run.run_id,
        };
        tracing::info!(run_id = %run.run_id, trigger = ?run.trigger, "sync run started");

        if let Err(e) = self.notifier.sync_started(&run).await {
            tracing::warn!(run_id = %run.run_id, error = %e, "sync-started notification failed");
        }

        let guild = match self.fetch().await {
            Ok(guild) => guild,
            Err(reason) => return Ok(self.fail(run, 0, reason).await),
        };

        let members_total = guild.members.len();
        let db = self.db.clone();
        let ignore_before = self.settings.ignore_before;
        let run_id = run.run_id;
        let observed_at = Utc::now();
        let reconciled = run_blocking(move || {
            db.with_transaction(|tx| {
                reconcile_members(tx, run_id, &guild.members, ignore_before, observed_at)
            })
        })
        .await;

        let stats = match reconciled {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(run_id = %run.run_id, error = %e, "sync transaction rolled back");
                return Ok(self
                    .fail(run, members_total, format!("commit failed: {e}"))
                    .await);
            }
        };

        run.finish(stats.members_synced);
        tracing::info!(
            run_id = %run.run_id,
            members_total = stats.members_total,
            members_synced = stats.members_synced,
            records_written = stats.records_written,
            dates_skipped = stats.dates_skipped,
            "sync run finished"
        );
        if let Err(e) = self.notifier.sync_finished(&run).await {
            tracing::warn!(run_id = %run.run_id, error = %e, "sync-finished notification failed");
        }

        let summary = RunSummary {
            run_id: run.run_id,
            started_at: run.started_at,
            ended_at: run.ended_at.unwrap_or_else(Utc::now),
            members_total: stats.members_total,
            members_synced: stats.members_synced,
            records_written: stats.records_written,
            outcome: RunOutcome::Succeeded,
        };
        self.state_tx.send_replace(SyncState::Succeeded {
            run_id: run.run_id,
            members_synced: stats.members_synced,
        });
        Ok(self.settle(summary))
    }

    async fn fetch(&self) -> Result<GuildData, String> {
        match self.source.fetch_guild_data().await {
            Ok(Some(guild)) => Ok(guild),
            Ok(None) => Err("remote reported an unsuccessful response".into()),
            Err(e) => Err(format!("fetch failed: {e}")),
        }
    }

    async fn fail(&self, mut run: SyncRun, members_total: usize, reason: String) -> RunSummary {
        tracing::error!(run_id = %run.run_id, reason = %reason, "sync run failed");
        run.finish(0);
        if let Err(e) = self.notifier.sync_finished(&run).await {
            tracing::warn!(run_id = %run.run_id, error = %e, "sync-finished notification failed");
        }
        if let Err(e) = self.notifier.staff_alert(run.run_id, &reason).await {
            tracing::warn!(run_id = %run.run_id, error = %e, "unable to alert staff of sync error");
        }
        self.state_tx.send_replace(SyncState::Failed {
            run_id: run.run_id,
            reason: reason.clone(),
        });
        self.settle(RunSummary {
            run_id: run.run_id,
            started_at: run.started_at,
            ended_at: run.ended_at.unwrap_or_else(Utc::now),
            members_total,
            members_synced: 0,
            records_written: 0,
            outcome: RunOutcome::Failed { reason },
        })
    }

    fn settle(&self, summary: RunSummary) -> RunSummary {
        match self.last_summary.lock() {
            Ok(mut guard) => *guard = Some(summary.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(summary.clone()),
        }
        self.state_tx.send_replace(SyncState::Idle);
        summary
    }
}

/// Puts the state back to `Idle` if a trigger future is dropped while its
/// run is still marked `Running`.
struct RunningState<'a> {
    tx: &'a watch::Sender<SyncState>,
    run_id: Uuid,
}

impl Drop for RunningState<'_> {
    fn drop(&mut self) {
        let run_id = self.run_id;
        self.tx.send_if_modified(|state| match state {
            SyncState::Running { run_id: current } if *current == run_id => {
                tracing::warn!(run_id = %run_id, "sync run abandoned before completion");
                *state = SyncState::Idle;
                true
            }
            _ => false,
        });
    }
}

/// Applies every member inside the run's transaction. Each member gets its
/// own savepoint, so a failing member leaves no partial rows and the batch
/// carries on.
pub fn reconcile_members(
    tx: &mut Transaction<'_>,
    run_id: Uuid,
    members: &[GuildMember],
    ignore_before: Option<NaiveDate>,
    observed_at: DateTime<Utc>,
) -> GuildSyncResult<ReconcileStats> {
    let mut stats = ReconcileStats {
        members_total: members.len(),
        ..ReconcileStats::default()
    };
    for member in members {
        let sp = tx.savepoint()?;
        match sync_member(&sp, member, ignore_before, observed_at) {
            Ok((written, skipped)) => {
                sp.commit()?;
                stats.members_synced += 1;
                stats.records_written += written;
                stats.dates_skipped += skipped;
            }
            Err(e) => {
                // savepoint rolls back on drop
                tracing::error!(
                    run_id = %run_id,
                    member = %member.uuid,
                    error = %e,
                    "failed to sync member experience history"
                );
            }
        }
    }
    Ok(stats)
}

fn sync_member(
    conn: &Connection,
    member: &GuildMember,
    ignore_before: Option<NaiveDate>,
    observed_at: DateTime<Utc>,
) -> GuildSyncResult<(usize, usize)> {
    let id = normalize(&member.uuid)?;
    let mut written = 0;
    let mut skipped = 0;
    for (raw_date, raw_amount) in &member.exp_history {
        let date = parse_date(raw_date)?;
        if ignore_before.is_some_and(|cutoff| date < cutoff) {
            skipped += 1;
            continue;
        }
        let amount = raw_amount.as_i64().ok_or_else(|| {
            GuildSyncError::InvalidInput(format!("non-integer amount {raw_amount} for {raw_date}"))
        })?;
        if upsert_in(conn, &id, date, amount, observed_at)?.wrote() {
            written += 1;
        }
    }
    Ok((written, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::normalizer::PlayerId;
    use crate::storage::experience::ExperienceStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    struct StaticSource(Option<GuildData>);

    #[async_trait]
    impl GuildSource for StaticSource {
        async fn fetch_guild_data(&self) -> GuildSyncResult<Option<GuildData>> {
            Ok(self.0.clone())
        }
    }

    /// Sleeps through a long rate-limit window before answering.
    struct BackoffSource(Duration, GuildData);

    #[async_trait]
    impl GuildSource for BackoffSource {
        async fn fetch_guild_data(&self) -> GuildSyncResult<Option<GuildData>> {
            tokio::time::sleep(self.0).await;
            Ok(Some(self.1.clone()))
        }
    }

    struct HungSource;

    #[async_trait]
    impl GuildSource for HungSource {
        async fn fetch_guild_data(&self) -> GuildSyncResult<Option<GuildData>> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        started: AtomicUsize,
        finished: AtomicUsize,
        alerts: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn sync_started(&self, _run: &SyncRun) -> GuildSyncResult<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Err(GuildSyncError::Sync("chat unreachable".into()))
        }
        async fn sync_finished(&self, _run: &SyncRun) -> GuildSyncResult<()> {
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn staff_alert(&self, _run_id: Uuid, _reason: &str) -> GuildSyncResult<()> {
            self.alerts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn guild(members: Vec<GuildMember>) -> GuildData {
        GuildData {
            members,
            ..GuildData::default()
        }
    }

    fn orchestrator(
        source: Arc<dyn GuildSource>,
        settings: SyncSettings,
    ) -> (SyncOrchestrator, Arc<Database>, Arc<CountingNotifier>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let notifier = Arc::new(CountingNotifier::default());
        (
            SyncOrchestrator::new(db.clone(), source, notifier.clone(), settings),
            db,
            notifier,
        )
    }

    fn id(s: &str) -> PlayerId {
        normalize(s).unwrap()
    }

    fn day(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[tokio::test]
    async fn successful_run_writes_and_reports() {
        let source = Arc::new(StaticSource(Some(guild(vec![
            GuildMember::new(A, &[("2024-01-01", 10), ("2024-01-02", 20)]),
            GuildMember::new(B, &[("2024-01-01", 5)]),
        ]))));
        let (orch, db, notifier) = orchestrator(source, SyncSettings::default());

        let summary = orch.trigger(Trigger::Scheduled).await.unwrap();
        assert!(summary.succeeded());
        assert_eq!(summary.members_synced, 2);
        assert_eq!(summary.records_written, 3);
        assert_eq!(orch.state(), SyncState::Idle);
        assert!(!orch.is_running());
        // a failing start notification does not abort the run
        assert_eq!(notifier.started.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.finished.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.alerts.load(Ordering::SeqCst), 0);

        let store = ExperienceStore::new(db);
        assert_eq!(store.get(&id(A), day("2024-01-02")).unwrap(), Some(20));

        let again = orch.trigger(Trigger::Scheduled).await.unwrap();
        assert_eq!(again.members_synced, 2);
        assert_eq!(again.records_written, 0);
        assert_eq!(orch.last_summary().unwrap().run_id, again.run_id);
    }

    #[tokio::test]
    async fn bad_member_is_counted_and_rolled_back_alone() {
        let mut bad_amount = GuildMember::new(B, &[("2024-01-01", 1)]);
        bad_amount
            .exp_history
            .insert("2024-01-02".into(), serde_json::json!("lots"));
        let source = Arc::new(StaticSource(Some(guild(vec![
            GuildMember::new(A, &[("2024-01-01", 10)]),
            bad_amount,
            GuildMember::new("garbage", &[("2024-01-01", 3)]),
        ]))));
        let (orch, db, notifier) = orchestrator(source, SyncSettings::default());

        let summary = orch.trigger(Trigger::Scheduled).await.unwrap();
        assert!(summary.succeeded());
        assert_eq!(summary.members_total, 3);
        assert_eq!(summary.members_synced, 1);
        assert_eq!(summary.members_failed(), 2);
        assert_eq!(notifier.alerts.load(Ordering::SeqCst), 0);

        let store = ExperienceStore::new(db);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get(&id(B), day("2024-01-01")).unwrap(), None);
    }

    #[tokio::test]
    async fn null_fetch_fails_run_and_alerts_staff() {
        let (orch, db, notifier) =
            orchestrator(Arc::new(StaticSource(None)), SyncSettings::default());
        let mut states = orch.subscribe_state();

        let summary = orch.trigger(Trigger::Manual { requested_by: 9 }).await.unwrap();
        assert!(!summary.succeeded());
        assert_eq!(summary.members_synced, 0);
        assert_eq!(notifier.finished.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.alerts.load(Ordering::SeqCst), 1);
        assert_eq!(ExperienceStore::new(db).count().unwrap(), 0);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn long_rate_limit_wait_is_not_cut_short() {
        let wait = Duration::from_secs(SyncConfig::default().fetch_timeout_secs * 3);
        let source = BackoffSource(wait, guild(vec![GuildMember::new(A, &[("2024-01-01", 10)])]));
        let (orch, db, notifier) = orchestrator(Arc::new(source), SyncSettings::default());

        let started = tokio::time::Instant::now();
        let summary = orch.trigger(Trigger::Scheduled).await.unwrap();
        assert!(started.elapsed() >= wait);
        assert_eq!(summary.outcome, RunOutcome::Succeeded);
        assert_eq!(summary.members_synced, 1);
        assert_eq!(notifier.alerts.load(Ordering::SeqCst), 0);
        assert_eq!(ExperienceStore::new(db).count().unwrap(), 1);
    }

    #[tokio::test]
    async fn transport_error_fails_run_and_alerts_staff() {
        struct Unreachable;

        #[async_trait]
        impl GuildSource for Unreachable {
            async fn fetch_guild_data(&self) -> GuildSyncResult<Option<GuildData>> {
                Err(GuildSyncError::Sync("connection refused".into()))
            }
        }

        let (orch, _db, notifier) = orchestrator(Arc::new(Unreachable), SyncSettings::default());
        let summary = orch.trigger(Trigger::Scheduled).await.unwrap();
        match summary.outcome {
            RunOutcome::Failed { reason } => assert!(reason.contains("connection refused")),
            RunOutcome::Succeeded => panic!("expected fetch failure"),
        }
        assert_eq!(notifier.alerts.load(Ordering::SeqCst), 1);
        assert!(!orch.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trigger_returns_state_to_idle() {
        let (orch, _db, _notifier) = orchestrator(Arc::new(HungSource), SyncSettings::default());
        let mut states = orch.subscribe_state();

        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), orch.trigger(Trigger::Scheduled)).await;
        assert!(abandoned.is_err());
        assert!(!orch.is_running());
        assert_eq!(*states.borrow_and_update(), SyncState::Idle);
        assert_eq!(orch.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn dates_before_cutoff_are_skipped() {
        let source = Arc::new(StaticSource(Some(guild(vec![GuildMember::new(
            A,
            &[("2022-12-31", 99), ("2023-01-01", 10)],
        )]))));
        let settings = SyncSettings {
            ignore_before: Some(day("2023-01-01")),
            ..SyncSettings::default()
        };
        let (orch, db, _notifier) = orchestrator(source, settings);
        let summary = orch.trigger(Trigger::Scheduled).await.unwrap();
        assert_eq!(summary.records_written, 1);
        let store = ExperienceStore::new(db);
        assert_eq!(store.get(&id(A), day("2022-12-31")).unwrap(), None);
        assert_eq!(store.get(&id(A), day("2023-01-01")).unwrap(), Some(10));
    }

    #[test]
    fn reconcile_is_all_or_nothing_when_transaction_is_abandoned() {
        let db = Database::open_in_memory().unwrap();
        let members = vec![GuildMember::new(A, &[("2024-01-01", 10)])];
        let result: GuildSyncResult<()> = db.with_transaction(|tx| {
            let stats = reconcile_members(tx, Uuid::new_v4(), &members, None, Utc::now())?;
            assert_eq!(stats.members_synced, 1);
            Err(GuildSyncError::Sync("crash before commit".into()))
        });
        assert!(result.is_err());
        let n: i64 = db
            .lock_conn()
            .query_row("SELECT COUNT(*) FROM exp_history", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }
}
