use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of the sync orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Running { run_id: Uuid },
    Succeeded { run_id: Uuid, members_synced: usize },
    Failed { run_id: Uuid, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual { requested_by: u64 },
}

/// In-memory record of one sync run; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub run_id: Uuid,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub members_synced: usize,
    pub running: bool,
}

impl SyncRun {
    pub fn start(trigger: Trigger) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            trigger,
            started_at: Utc::now(),
            ended_at: None,
            members_synced: 0,
            running: true,
        }
    }

    pub fn finish(&mut self, members_synced: usize) {
        self.ended_at = Some(Utc::now());
        self.members_synced = members_synced;
        self.running = false;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed { reason: String },
}

/// What a caller of a sync trigger gets back once the run has ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub members_total: usize,
    pub members_synced: usize,
    pub records_written: usize,
    pub outcome: RunOutcome,
}

impl RunSummary {
    pub fn members_failed(&self) -> usize {
        self.members_total.saturating_sub(self.members_synced)
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Succeeded)
    }
}

/// Per-run reconciliation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub members_total: usize,
    pub members_synced: usize,
    pub records_written: usize,
    pub dates_skipped: usize,
}
