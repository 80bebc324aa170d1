pub mod cache;
pub mod link;
pub mod normalizer;
pub mod resolver;

use serde::{Deserialize, Serialize};

use crate::identity::normalizer::PlayerId;

/// A game account as resolved from a name or identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub id: PlayerId,
    pub name: String,
}
