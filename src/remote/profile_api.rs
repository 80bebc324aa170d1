use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::ApiConfig;
use crate::errors::{GuildSyncError, GuildSyncResult};
use crate::identity::normalizer::normalize;
use crate::identity::ResolvedIdentity;
use crate::remote::types::ProfileResponse;
use crate::remote::ProfileLookup;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Tokens shorter than this are names; anything longer is an identifier.
const NAME_MAX_LEN: usize = 17;

/// Name/identifier resolution against the account profile service.
pub struct MojangProfileClient {
    profile_base_url: String,
    session_base_url: String,
    client: reqwest::Client,
}

impl MojangProfileClient {
    pub fn new(profile_base_url: String, session_base_url: String) -> GuildSyncResult<Self> {
        let client = reqwest::Client::builder().timeout(LOOKUP_TIMEOUT).build()?;
        Ok(Self {
            profile_base_url,
            session_base_url,
            client,
        })
    }

    pub fn from_config(api: &ApiConfig) -> GuildSyncResult<Self> {
        Self::new(api.profile_base_url.clone(), api.session_base_url.clone())
    }

    fn url_for(&self, token: &str) -> GuildSyncResult<String> {
        if token.len() < NAME_MAX_LEN {
            Ok(format!(
                "{}/users/profiles/minecraft/{}",
                self.profile_base_url.trim_end_matches('/'),
                token
            ))
        } else {
            let id = normalize(token)?;
            Ok(format!(
                "{}/session/minecraft/profile/{}",
                self.session_base_url.trim_end_matches('/'),
                id
            ))
        }
    }
}

#[async_trait]
impl ProfileLookup for MojangProfileClient {
    async fn lookup(&self, token: &str) -> GuildSyncResult<Option<ResolvedIdentity>> {
        let url = self.url_for(token.trim())?;
        tracing::debug!(url = %url, "resolving player profile");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GuildSyncError::RemoteProtocol(format!("{status}: {body}")));
        }
        parse_profile_body(&body).map(Some)
    }
}

pub fn parse_profile_body(body: &str) -> GuildSyncResult<ResolvedIdentity> {
    let profile: ProfileResponse = serde_json::from_str(body)
        .map_err(|e| GuildSyncError::RemoteProtocol(format!("unparsable profile: {e}")))?;
    Ok(ResolvedIdentity {
        id: normalize(&profile.id)?,
        name: profile.name,
    })
}
