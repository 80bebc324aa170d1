use std::sync::Arc;

use crate::errors::{GuildSyncError, GuildSyncResult};
use crate::identity::cache::IdentityCache;
use crate::identity::normalizer::{is_identifier, validate_name};
use crate::identity::ResolvedIdentity;
use crate::remote::ProfileLookup;
use crate::storage::run_blocking;

/// Cache-first resolution of a human-supplied name or identifier.
#[derive(Clone)]
pub struct IdentityResolver {
    cache: IdentityCache,
    lookup: Arc<dyn ProfileLookup>,
}

impl IdentityResolver {
    pub fn new(cache: IdentityCache, lookup: Arc<dyn ProfileLookup>) -> Self {
        Self { cache, lookup }
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    pub async fn resolve(&self, token: &str) -> GuildSyncResult<ResolvedIdentity> {
        let token = token.trim().to_string();
        if !validate_name(&token) && !is_identifier(&token) {
            return Err(GuildSyncError::InvalidInput(format!(
                "'{token}' is neither a valid name nor an identifier"
            )));
        }

        let cache = self.cache.clone();
        let key = token.clone();
        if let Some(hit) = run_blocking(move || cache.get(&key)).await? {
            tracing::debug!(token = %token, uuid = %hit.id, "identity cache hit");
            return Ok(hit);
        }

        let resolved = self
            .lookup
            .lookup(&token)
            .await?
            .ok_or_else(|| GuildSyncError::NotFound(format!("no account named '{token}'")))?;

        let cache = self.cache.clone();
        let entry = resolved.clone();
        if let Err(e) =
            run_blocking(move || cache.put(entry.id.as_str(), &entry.name)).await
        {
            tracing::warn!(error = %e, token = %token, "failed to cache resolved identity");
        }
        Ok(resolved)
    }
}
