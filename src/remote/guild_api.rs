use std::time::Duration;

use async_trait::async_trait;

use crate::config::ApiConfig;
use crate::errors::{GuildSyncError, GuildSyncResult};
use crate::identity::normalizer::PlayerId;
use crate::remote::rate_limit::backoff_from_headers;
use crate::remote::types::{GuildData, GuildResponse};
use crate::remote::{GuildSource, OwnershipCheck};

/// Client for the guild and player endpoints of the game API.
///
/// `request_timeout` bounds each HTTP exchange. The rate-limit wait happens
/// after the body has been read and is never cut short.
pub struct HypixelGuildClient {
    base_url: String,
    api_key: String,
    guild_id: String,
    client: reqwest::Client,
}

impl HypixelGuildClient {
    pub fn new(
        base_url: String,
        api_key: String,
        guild_id: String,
        request_timeout: Duration,
    ) -> GuildSyncResult<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            base_url,
            api_key,
            guild_id,
            client,
        })
    }

    pub fn from_config(api: &ApiConfig, request_timeout: Duration) -> GuildSyncResult<Self> {
        Self::new(
            api.base_url.clone(),
            api.key.clone(),
            api.guild_id.clone(),
            request_timeout,
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Chat tag the player published on their game profile, used to verify
    /// link ownership.
    pub async fn discord_tag(&self, id: &PlayerId) -> GuildSyncResult<Option<String>> {
        let url = self.endpoint("player");
        tracing::debug!(url = %url, uuid = %id, "fetching player profile");
        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("uuid", id.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "unexpected status from player endpoint");
        }
        let body = response.text().await?;
        parse_discord_tag(&body)
    }
}

#[async_trait]
impl OwnershipCheck for HypixelGuildClient {
    async fn owns_account(&self, id: &PlayerId, chat_tag: &str) -> bool {
        let lookup = self.discord_tag(id).await;
        tag_matches(id, lookup, chat_tag)
    }
}

/// Ownership holds only when the profile lookup succeeded and the published
/// tag equals `chat_tag`. Lookup errors count as "not owned".
pub fn tag_matches(
    id: &PlayerId,
    lookup: GuildSyncResult<Option<String>>,
    chat_tag: &str,
) -> bool {
    match lookup {
        Ok(Some(tag)) => tag == chat_tag,
        Ok(None) => {
            tracing::info!(uuid = %id, "player has no chat tag on their profile");
            false
        }
        Err(e) => {
            tracing::warn!(uuid = %id, error = %e, "ownership lookup failed");
            false
        }
    }
}

#[async_trait]
impl GuildSource for HypixelGuildClient {
    async fn fetch_guild_data(&self) -> GuildSyncResult<Option<GuildData>> {
        let url = self.endpoint("guild");
        tracing::debug!(url = %url, guild = %self.guild_id, "fetching guild data");

        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("id", self.guild_id.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // structured errors still arrive as JSON; keep going
            tracing::warn!(status = %status, "unexpected status from guild endpoint");
        }

        let backoff = backoff_from_headers(response.headers());
        let body = response.text().await?;

        if let Some(delay) = backoff {
            tracing::warn!(
                sleep_secs = delay.as_secs(),
                "API key is rate-limited; waiting for reset"
            );
            tokio::time::sleep(delay).await;
        }

        match parse_guild_body(&body) {
            Ok(guild) => {
                tracing::debug!(members = guild.members.len(), "guild data retrieved");
                Ok(Some(guild))
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    status = %status,
                    "unsuccessful in fetching guild data"
                );
                Ok(None)
            }
        }
    }
}

/// Decodes a guild response body; anything but `success: true` with a guild
/// payload is a protocol error.
pub fn parse_guild_body(body: &str) -> GuildSyncResult<GuildData> {
    let parsed: GuildResponse = serde_json::from_str(body)
        .map_err(|e| GuildSyncError::RemoteProtocol(format!("unparsable body: {e}")))?;
    match parsed.success {
        Some(true) => {}
        Some(false) => {
            return Err(GuildSyncError::RemoteProtocol(format!(
                "success=false: {}",
                parsed.cause.unwrap_or_else(|| "no cause given".into())
            )))
        }
        None => {
            return Err(GuildSyncError::RemoteProtocol(
                "response has no success flag".into(),
            ))
        }
    }
    parsed
        .guild
        .ok_or_else(|| GuildSyncError::RemoteProtocol("success=true but no guild payload".into()))
}

pub fn parse_discord_tag(body: &str) -> GuildSyncResult<Option<String>> {
    let json: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| GuildSyncError::RemoteProtocol(format!("unparsable body: {e}")))?;
    if json["success"].as_bool() != Some(true) {
        return Err(GuildSyncError::RemoteProtocol(format!(
            "player lookup failed: {}",
            json["cause"].as_str().unwrap_or("no cause given")
        )));
    }
    Ok(json["player"]["socialMedia"]["links"]["DISCORD"]
        .as_str()
        .map(|s| s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_successful_guild_body() {
        let body = r#"{
            "success": true,
            "guild": {
                "_id": "g1",
                "name": "Proud Circle",
                "members": [
                    {"uuid": "5328930ed41149cb90ad4e5c7b27dd86", "rank": "Member",
                     "expHistory": {"2024-01-01": 100, "2023-12-31": 0}},
                    {"uuid": "0123456789abcdef0123456789abcdef"}
                ]
            }
        }"#;
        let guild = parse_guild_body(body).unwrap();
        assert_eq!(guild.name.as_deref(), Some("Proud Circle"));
        assert_eq!(guild.members.len(), 2);
        assert_eq!(guild.members[0].exp_history.len(), 2);
        assert_eq!(guild.members[0].exp_history["2024-01-01"], 100);
        assert!(guild.members[1].exp_history.is_empty());
    }

    #[test]
    fn success_false_is_protocol_error() {
        let err =
            parse_guild_body(r#"{"success": false, "cause": "Invalid API key"}"#).unwrap_err();
        match err {
            GuildSyncError::RemoteProtocol(msg) => assert!(msg.contains("Invalid API key")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_flag_or_payload_is_protocol_error() {
        assert!(parse_guild_body(r#"{"guild": {"members": []}}"#).is_err());
        assert!(parse_guild_body(r#"{"success": true, "guild": null}"#).is_err());
        assert!(parse_guild_body("<html>bad gateway</html>").is_err());
    }

    #[test]
    fn discord_tag_extracted_from_player_profile() {
        let body = r#"{"success": true, "player": {"socialMedia": {"links": {"DISCORD": "illyum#0001"}}}}"#;
        assert_eq!(parse_discord_tag(body).unwrap().as_deref(), Some("illyum#0001"));

        let no_links = r#"{"success": true, "player": {}}"#;
        assert_eq!(parse_discord_tag(no_links).unwrap(), None);

        assert!(parse_discord_tag(r#"{"success": false}"#).is_err());
    }

    #[test]
    fn ownership_requires_matching_published_tag() {
        let id =
            crate::identity::normalizer::normalize("5328930ed41149cb90ad4e5c7b27dd86").unwrap();
        assert!(tag_matches(&id, Ok(Some("illyum#0001".into())), "illyum#0001"));
        assert!(!tag_matches(&id, Ok(Some("someone#0002".into())), "illyum#0001"));
        assert!(!tag_matches(&id, Ok(None), "illyum#0001"));
        let unreachable = Err(GuildSyncError::RemoteProtocol("player lookup failed".into()));
        assert!(!tag_matches(&id, unreachable, "illyum#0001"));
    }

    /// Serves one canned HTTP response per accepted connection.
    async fn serve_once(head: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n{head}content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn rate_limit_wait_outlasts_request_timeout() {
        let base = serve_once(
            "ratelimit-remaining: 0\r\nratelimit-reset: 0\r\n",
            r#"{"success": true, "guild": {"members": []}}"#,
        )
        .await;
        let client =
            HypixelGuildClient::new(base, "k".into(), "g".into(), Duration::from_millis(500))
                .unwrap();

        let started = std::time::Instant::now();
        let guild = client.fetch_guild_data().await.unwrap();
        assert!(guild.is_some());
        assert!(started.elapsed() >= crate::remote::rate_limit::RESET_BUFFER);
    }

    #[tokio::test]
    async fn stalled_server_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });
        let client = HypixelGuildClient::new(
            format!("http://{addr}"),
            "k".into(),
            "g".into(),
            Duration::from_millis(200),
        )
        .unwrap();

        let err = client.fetch_guild_data().await.unwrap_err();
        assert_eq!(err.category(), "unavailable");
    }
}
