use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuildSyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed identifier: {0}")]
    MalformedIdentifier(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cache inconsistency: {0}")]
    CacheInconsistency(String),

    #[error("Invalid cache entry: {0}")]
    InvalidCacheEntry(String),

    #[error("Remote API unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),

    #[error("Remote protocol error: {0}")]
    RemoteProtocol(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Account is not linked")]
    NotLinked,

    #[error("Account is already linked")]
    AlreadyLinked,

    #[error("Ownership verification failed")]
    VerificationFailed,

    #[error("A sync run is already in progress")]
    AlreadyRunning,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl From<rusqlite::Error> for GuildSyncError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                GuildSyncError::ConstraintViolation(
                    msg.clone().unwrap_or_else(|| "unique constraint failed".into()),
                )
            }
            _ => GuildSyncError::Database(err),
        }
    }
}

impl GuildSyncError {
    /// Stable machine-readable category for the presentation layer.
    pub fn category(&self) -> &'static str {
        match self {
            GuildSyncError::Config(_) => "config",
            GuildSyncError::MalformedIdentifier(_) | GuildSyncError::InvalidInput(_) => {
                "invalid_input"
            }
            GuildSyncError::CacheInconsistency(_) => "cache_inconsistency",
            GuildSyncError::InvalidCacheEntry(_) => "invalid_cache_entry",
            GuildSyncError::Unavailable(_) => "unavailable",
            GuildSyncError::RemoteProtocol(_) => "remote_protocol",
            GuildSyncError::ConstraintViolation(_) => "constraint_violation",
            GuildSyncError::NotFound(_) => "not_found",
            GuildSyncError::NotLinked => "not_linked",
            GuildSyncError::AlreadyLinked => "already_linked",
            GuildSyncError::VerificationFailed => "verification_failed",
            GuildSyncError::AlreadyRunning => "already_running",
            GuildSyncError::Timeout(_) => "timeout",
            GuildSyncError::Database(_) | GuildSyncError::Sync(_) => "internal",
            GuildSyncError::Io(_) | GuildSyncError::Json(_) | GuildSyncError::TomlDe(_) => {
                "internal"
            }
        }
    }
}

impl serde::Serialize for GuildSyncError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type GuildSyncResult<T> = Result<T, GuildSyncError>;
