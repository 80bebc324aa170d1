pub mod guild_api;
pub mod profile_api;
pub mod rate_limit;
pub mod types;

use async_trait::async_trait;

use crate::errors::GuildSyncResult;
use crate::identity::normalizer::PlayerId;
use crate::identity::ResolvedIdentity;
use crate::remote::types::GuildData;

/// Source of guild member records for a sync run.
#[async_trait]
pub trait GuildSource: Send + Sync {
    /// `Ok(None)` means the remote answered but reported failure or sent an
    /// unusable body; `Err` means the remote could not be reached.
    /// May sleep through a rate-limit window before returning.
    async fn fetch_guild_data(&self) -> GuildSyncResult<Option<GuildData>>;
}

/// Remote name ↔ identifier resolution used on identity-cache misses.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    /// `Ok(None)` when no account matches `token`.
    async fn lookup(&self, token: &str) -> GuildSyncResult<Option<ResolvedIdentity>>;
}

/// Confirms that a chat user controls a game account before a self-service
/// link is stored.
#[async_trait]
pub trait OwnershipCheck: Send + Sync {
    async fn owns_account(&self, id: &PlayerId, chat_tag: &str) -> bool;
}
