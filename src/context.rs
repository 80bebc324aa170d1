use std::sync::Arc;

use crate::config::AppConfig;
use crate::errors::GuildSyncResult;
use crate::identity::cache::IdentityCache;
use crate::identity::link::LinkStore;
use crate::identity::resolver::IdentityResolver;
use crate::remote::guild_api::HypixelGuildClient;
use crate::remote::profile_api::MojangProfileClient;
use crate::remote::{GuildSource, OwnershipCheck, ProfileLookup};
use crate::storage::experience::ExperienceStore;
use crate::storage::Database;
use crate::sync::notify::{BroadcastNotifier, Notifier};
use crate::sync::orchestrator::{SyncOrchestrator, SyncSettings};

const NOTIFY_CHANNEL_CAPACITY: usize = 64;

/// Everything the service needs, built once at startup and handed to each
/// component explicitly.
#[derive(Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub db: Arc<Database>,
    pub experience: ExperienceStore,
    pub links: LinkStore,
    pub resolver: IdentityResolver,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub ownership: Arc<dyn OwnershipCheck>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        db: Arc<Database>,
        source: Arc<dyn GuildSource>,
        lookup: Arc<dyn ProfileLookup>,
        ownership: Arc<dyn OwnershipCheck>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let cache = IdentityCache::new(db.clone(), config.cache.ttl_seconds);
        let orchestrator = Arc::new(SyncOrchestrator::new(
            db.clone(),
            source,
            notifier,
            SyncSettings::from(&config.sync),
        ));
        Self {
            experience: ExperienceStore::new(db.clone()),
            links: LinkStore::new(db.clone()),
            resolver: IdentityResolver::new(cache, lookup),
            orchestrator,
            ownership,
            config,
            db,
        }
    }

    /// Wires the real remote clients and a broadcast notifier. The notifier
    /// is returned so the chat layer can subscribe to sync events.
    pub fn from_config(config: AppConfig) -> GuildSyncResult<(Self, Arc<BroadcastNotifier>)> {
        let db = Arc::new(Database::open(&config.storage.resolve_db_path())?);
        let guild_client = Arc::new(HypixelGuildClient::from_config(
            &config.api,
            config.sync.fetch_timeout(),
        )?);
        let lookup = Arc::new(MojangProfileClient::from_config(&config.api)?);
        let notifier = Arc::new(BroadcastNotifier::new(
            config.discord.clone(),
            NOTIFY_CHANNEL_CAPACITY,
        ));
        let ctx = Self::new(
            config,
            db,
            guild_client.clone(),
            lookup,
            guild_client,
            notifier.clone(),
        );
        Ok((ctx, notifier))
    }
}
