use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{GuildSyncError, GuildSyncResult};

const CANONICAL_LEN: usize = 32;
const DISPLAY_LEN: usize = 36;
const HYPHEN_OFFSETS: [usize; 4] = [8, 12, 16, 20];

/// A game-account identifier in canonical form: 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlayerId(String);

impl PlayerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hyphenated 8-4-4-4-12 form.
    pub fn to_display(&self) -> String {
        to_display(&self.0)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PlayerId {
    type Error = GuildSyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        normalize(&value)
    }
}

impl From<PlayerId> for String {
    fn from(id: PlayerId) -> Self {
        id.0
    }
}

/// Strips hyphens and lowercases; fails unless exactly 32 hex characters remain.
/// Idempotent on canonical input.
pub fn normalize(raw: &str) -> GuildSyncResult<PlayerId> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if compact.len() != CANONICAL_LEN || !compact.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(GuildSyncError::MalformedIdentifier(raw.to_string()));
    }
    Ok(PlayerId(compact))
}

/// Inserts hyphens at offsets 8, 12, 16 and 20. Input that already has the
/// 36-character hyphenated length is returned unchanged (lowercased).
pub fn to_display(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    if lowered.len() == DISPLAY_LEN || !lowered.is_ascii() {
        return lowered;
    }
    let mut out = String::with_capacity(lowered.len() + HYPHEN_OFFSETS.len());
    for (i, c) in lowered.chars().enumerate() {
        if HYPHEN_OFFSETS.contains(&i) {
            out.push('-');
        }
        out.push(c);
    }
    out
}

/// True iff `name` is 2..=16 characters of `[a-z0-9_]`, case-insensitive.
pub fn validate_name(name: &str) -> bool {
    (2..=16).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// True iff `raw` normalizes to a canonical identifier.
pub fn is_identifier(raw: &str) -> bool {
    normalize(raw).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPACT: &str = "5328930ed41149cb90ad4e5c7b27dd86";
    const DASHED: &str = "5328930e-d411-49cb-90ad-4e5c7b27dd86";

    #[test]
    fn normalize_strips_hyphens_and_lowercases() {
        assert_eq!(normalize(DASHED).unwrap().as_str(), COMPACT);
        assert_eq!(
            normalize(&DASHED.to_uppercase()).unwrap().as_str(),
            COMPACT
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize(DASHED).unwrap();
        let twice = normalize(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_rejects_bad_length_and_non_hex() {
        assert!(matches!(
            normalize("abc"),
            Err(GuildSyncError::MalformedIdentifier(_))
        ));
        assert!(normalize("zz28930ed41149cb90ad4e5c7b27dd86").is_err());
        assert!(normalize("").is_err());
    }

    #[test]
    fn display_inserts_hyphens_at_fixed_offsets() {
        assert_eq!(to_display(COMPACT), DASHED);
        assert_eq!(to_display(DASHED), DASHED);
        assert_eq!(normalize(COMPACT).unwrap().to_display(), DASHED);
    }

    #[test]
    fn round_trip_holds_for_both_forms() {
        for x in [COMPACT, DASHED, "ABCDEF0123456789ABCDEF0123456789"] {
            assert_eq!(to_display(normalize(x).unwrap().as_str()), to_display(x));
            assert_eq!(
                normalize(&to_display(x)).unwrap(),
                normalize(x).unwrap()
            );
        }
    }

    #[test]
    fn name_validation_bounds() {
        assert!(validate_name("illyum"));
        assert!(validate_name("Ab"));
        assert!(validate_name("Under_Score_1234"));
        assert!(!validate_name("a"));
        assert!(!validate_name("seventeen_chars_x"));
        assert!(!validate_name("bad-name"));
        assert!(!validate_name("spa ce"));
    }

    #[test]
    fn player_id_deserializes_through_normalizer() {
        let id: PlayerId = serde_json::from_str(&format!("\"{DASHED}\"")).unwrap();
        assert_eq!(id.as_str(), COMPACT);
        assert!(serde_json::from_str::<PlayerId>("\"nope\"").is_err());
    }
}
