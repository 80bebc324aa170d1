use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::context::AppContext;
use crate::errors::{GuildSyncError, GuildSyncResult};
use crate::identity::link::Link;
use crate::identity::normalizer::PlayerId;
use crate::identity::ResolvedIdentity;
use crate::storage::experience::ExperienceRecord;
use crate::storage::run_blocking;
use crate::sync::state::{RunSummary, Trigger};

/// Entry points consumed by the chat layer. Authorization of privileged
/// calls (`trigger_sync`, `force_*`, cache maintenance) happens before these
/// are invoked.
#[derive(Clone)]
pub struct CommandSurface {
    ctx: Arc<AppContext>,
}

impl CommandSurface {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    async fn link_for_chat_user(&self, chat_user_id: u64) -> GuildSyncResult<Option<Link>> {
        let links = self.ctx.links.clone();
        run_blocking(move || links.get_by_chat_user(chat_user_id)).await
    }

    /// Account linked to the caller, used when a query names no player.
    pub async fn resolve_default_player(&self, chat_user_id: u64) -> GuildSyncResult<PlayerId> {
        self.link_for_chat_user(chat_user_id)
            .await?
            .map(|link| link.id)
            .ok_or(GuildSyncError::NotLinked)
    }

    pub async fn resolve_identifier(&self, name_or_id: &str) -> GuildSyncResult<ResolvedIdentity> {
        self.ctx.resolver.resolve(name_or_id).await
    }

    pub async fn get_daily_experience(
        &self,
        id: &PlayerId,
        date: NaiveDate,
    ) -> GuildSyncResult<i64> {
        let store = self.ctx.experience.clone();
        let key = id.clone();
        run_blocking(move || store.get(&key, date))
            .await?
            .ok_or_else(|| {
                GuildSyncError::NotFound(format!("no experience for {} on {date}", id.to_display()))
            })
    }

    pub async fn get_experience_range(
        &self,
        id: &PlayerId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> GuildSyncResult<Vec<ExperienceRecord>> {
        let store = self.ctx.experience.clone();
        let key = id.clone();
        run_blocking(move || store.range(&key, from, to)).await
    }

    pub async fn get_experience_total(
        &self,
        id: &PlayerId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> GuildSyncResult<i64> {
        let store = self.ctx.experience.clone();
        let key = id.clone();
        run_blocking(move || store.total(&key, from, to)).await
    }

    pub async fn trigger_sync(&self, requested_by: u64) -> GuildSyncResult<RunSummary> {
        tracing::info!(requested_by, "manual sync requested");
        self.ctx
            .orchestrator
            .trigger(Trigger::Manual { requested_by })
            .await
    }

    /// Self-service link. `verify` receives the resolved account and must
    /// confirm the caller owns it.
    pub async fn link<F, Fut>(
        &self,
        chat_user_id: u64,
        chat_username: &str,
        claimed_name: &str,
        verify: F,
    ) -> GuildSyncResult<Link>
    where
        F: FnOnce(ResolvedIdentity) -> Fut,
        Fut: Future<Output = bool>,
    {
        if self.link_for_chat_user(chat_user_id).await?.is_some() {
            return Err(GuildSyncError::AlreadyLinked);
        }
        let identity = self.resolve_identifier(claimed_name).await?;
        if !verify(identity.clone()).await {
            tracing::info!(chat_user_id, uuid = %identity.id, "link verification failed");
            return Err(GuildSyncError::VerificationFailed);
        }
        self.register(identity.id, chat_user_id, chat_username).await
    }

    /// Self-service link verified against the tag the player published on
    /// their game profile. `chat_tag` is also stored as the link's username.
    pub async fn link_account(
        &self,
        chat_user_id: u64,
        chat_tag: &str,
        claimed_name: &str,
    ) -> GuildSyncResult<Link> {
        let ownership = self.ctx.ownership.clone();
        let tag = chat_tag.to_string();
        self.link(chat_user_id, chat_tag, claimed_name, move |identity| async move {
            ownership.owns_account(&identity.id, &tag).await
        })
        .await
    }

    pub async fn unlink(&self, chat_user_id: u64) -> GuildSyncResult<Link> {
        let link = self
            .link_for_chat_user(chat_user_id)
            .await?
            .ok_or(GuildSyncError::NotLinked)?;
        self.remove(link).await
    }

    /// Privileged link that skips ownership verification.
    pub async fn force_link(
        &self,
        chat_user_id: u64,
        chat_username: &str,
        name_or_id: &str,
    ) -> GuildSyncResult<Link> {
        if self.link_for_chat_user(chat_user_id).await?.is_some() {
            return Err(GuildSyncError::AlreadyLinked);
        }
        let identity = self.resolve_identifier(name_or_id).await?;
        tracing::info!(chat_user_id, uuid = %identity.id, "force-linking account");
        self.register(identity.id, chat_user_id, chat_username).await
    }

    /// Privileged unlink by either the account identifier or the chat user ID.
    pub async fn force_unlink(&self, key: &str) -> GuildSyncResult<Link> {
        let links = self.ctx.links.clone();
        let lookup = key.to_string();
        let link = run_blocking(move || links.get_link(&lookup))
            .await?
            .ok_or(GuildSyncError::NotLinked)?;
        self.remove(link).await
    }

    pub async fn evict_cached_identity(&self, key: &str) -> GuildSyncResult<usize> {
        let cache = self.ctx.resolver.cache().clone();
        let key = key.to_string();
        run_blocking(move || cache.evict(&key)).await
    }

    pub async fn clear_identity_cache(&self, confirmed: bool) -> GuildSyncResult<bool> {
        let cache = self.ctx.resolver.cache().clone();
        run_blocking(move || cache.clear(confirmed)).await
    }

    async fn register(
        &self,
        id: PlayerId,
        chat_user_id: u64,
        username: &str,
    ) -> GuildSyncResult<Link> {
        let links = self.ctx.links.clone();
        let username = username.to_string();
        run_blocking(move || links.register_link(&id, chat_user_id, &username)).await
    }

    async fn remove(&self, link: Link) -> GuildSyncResult<Link> {
        let links = self.ctx.links.clone();
        let (row_id, id) = (link.row_id, link.id.clone());
        run_blocking(move || links.remove_link(Some(row_id), Some(&id))).await?;
        Ok(link)
    }
}
