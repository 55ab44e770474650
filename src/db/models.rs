use serde::{Deserialize, Serialize};

use crate::forum::url::TargetKind;

/// A chat's subscription to a watched forum URL, with its private checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub chat_id: i64,
    pub url: String,
    pub kind: String,
    /// Opaque "last seen" marker; NULL/empty means unset.
    pub checkpoint: Option<String>,
}

impl Subscription {
    /// The stored kind, when it is one the engine understands.
    #[must_use]
    pub fn target_kind(&self) -> Option<TargetKind> {
        TargetKind::parse(&self.kind)
    }

    /// The checkpoint, treating NULL and empty string as unset.
    #[must_use]
    pub fn checkpoint(&self) -> Option<&str> {
        self.checkpoint.as_deref().filter(|cp| !cp.is_empty())
    }
}
