use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::DiscordConfig;
use crate::errors::{GuildSyncError, GuildSyncResult};
use crate::sync::state::{SyncRun, Trigger};

/// Events published to the chat layer, which renders and delivers them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Started {
        run_id: Uuid,
        trigger: Trigger,
        started_at: DateTime<Utc>,
        channel_id: Option<u64>,
    },
    Finished {
        run_id: Uuid,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        members_synced: usize,
        channel_id: Option<u64>,
    },
    StaffAlert {
        run_id: Uuid,
        role_id: Option<u64>,
        channel_id: Option<u64>,
        message: String,
    },
}

/// Fire-and-forget notification port. An `Err` from any method is logged by
/// the caller and never changes the outcome of a run.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn sync_started(&self, run: &SyncRun) -> GuildSyncResult<()>;
    async fn sync_finished(&self, run: &SyncRun) -> GuildSyncResult<()>;
    async fn staff_alert(&self, run_id: Uuid, reason: &str) -> GuildSyncResult<()>;
}

pub struct BroadcastNotifier {
    tx: broadcast::Sender<SyncEvent>,
    discord: DiscordConfig,
}

impl BroadcastNotifier {
    pub fn new(discord: DiscordConfig, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx, discord }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: SyncEvent) -> GuildSyncResult<()> {
        self.tx
            .send(event)
            .map(|_| ())
            .map_err(|_| GuildSyncError::Sync("no notification subscribers".into()))
    }
}

/// Chat mention for a role, or a plain prefix when none is configured.
pub fn role_mention(role_id: Option<u64>) -> String {
    match role_id {
        Some(id) => format!("<@&{id}>"),
        None => "@staff".to_string(),
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn sync_started(&self, run: &SyncRun) -> GuildSyncResult<()> {
        self.publish(SyncEvent::Started {
            run_id: run.run_id,
            trigger: run.trigger.clone(),
            started_at: run.started_at,
            channel_id: self.discord.log_channel_id,
        })
    }

    async fn sync_finished(&self, run: &SyncRun) -> GuildSyncResult<()> {
        self.publish(SyncEvent::Finished {
            run_id: run.run_id,
            started_at: run.started_at,
            ended_at: run.ended_at.unwrap_or_else(Utc::now),
            members_synced: run.members_synced,
            channel_id: self.discord.log_channel_id,
        })
    }

    async fn staff_alert(&self, run_id: Uuid, reason: &str) -> GuildSyncResult<()> {
        let message = format!(
            "{} ALERT:\nTHERE WAS AN ERROR SYNCING GEXP (run {run_id}): {reason}",
            role_mention(self.discord.admin_role_id)
        );
        self.publish(SyncEvent::StaffAlert {
            run_id,
            role_id: self.discord.admin_role_id,
            channel_id: self.discord.log_channel_id,
            message,
        })
    }
}
