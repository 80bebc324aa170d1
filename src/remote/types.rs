use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Envelope returned by the guild endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildResponse {
    #[serde(default)]
    pub success: Option<bool>,
    /// Error description sent alongside `success: false`.
    #[serde(default)]
    pub cause: Option<String>,
    #[serde(default)]
    pub guild: Option<GuildData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildData {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub members: Vec<GuildMember>,
}

/// One member as reported by the remote API. Fields are kept loose so a
/// single bad member fails on its own during reconciliation instead of
/// failing the whole payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildMember {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub rank: Option<String>,
    /// `YYYY-MM-DD` → experience earned that day.
    #[serde(rename = "expHistory", default)]
    pub exp_history: BTreeMap<String, serde_json::Value>,
}

impl GuildMember {
    pub fn new(uuid: impl Into<String>, history: &[(&str, i64)]) -> Self {
        Self {
            uuid: uuid.into(),
            rank: None,
            exp_history: history
                .iter()
                .map(|(date, amount)| (date.to_string(), serde_json::Value::from(*amount)))
                .collect(),
        }
    }
}

/// Body of the profile endpoints: `{ "id": "<compact uuid>", "name": "<name>" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub id: String,
    pub name: String,
}
