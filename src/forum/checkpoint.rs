//! Per-subscription "last seen" markers.
//!
//! Thread checkpoints are a single post id. Section checkpoints are a
//! composite of topic id and creation timestamp, because sections display
//! pinned topics out of id order: timestamp is the primary key, id breaks
//! ties. Checkpoints only ever move forward for a given subscription.

use std::cmp::Ordering;

const COMPOSITE_SEPARATOR: &str = ";;";

/// Decoded section checkpoint. Persisted as `"<id>;;<created_at>"`; legacy
/// rows hold a bare id, which decodes with an empty `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionCheckpoint {
    pub id: u64,
    /// ISO-8601 or empty. Empty sorts as oldest.
    pub created_at: String,
}

impl SectionCheckpoint {
    #[must_use]
    pub fn new(id: u64, created_at: impl Into<String>) -> Self {
        Self {
            id,
            created_at: created_at.into(),
        }
    }

    /// Encode for persistence. The composite form is the only encoding
    /// written going forward.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}{COMPOSITE_SEPARATOR}{}", self.id, self.created_at)
    }

    /// Decode a persisted checkpoint. Accepts the composite form and the
    /// legacy bare-id form (all digits, no separator). Returns `None` for
    /// anything else, which callers treat as an unset checkpoint.
    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        if let Some((id_part, created_at)) = raw.split_once(COMPOSITE_SEPARATOR) {
            let id = id_part.parse::<u64>().ok()?;
            return Some(Self::new(id, created_at));
        }
        raw.parse::<u64>().ok().map(|id| Self::new(id, ""))
    }

    /// Composite ordering: `created_at` primary (ISO string compare, empty
    /// sorts oldest), numeric id as tie-break.
    #[must_use]
    pub fn cmp_composite(&self, other: &Self) -> Ordering {
        match (self.created_at.is_empty(), other.created_at.is_empty()) {
            (true, true) => self.id.cmp(&other.id),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self
                .created_at
                .cmp(&other.created_at)
                .then_with(|| self.id.cmp(&other.id)),
        }
    }

    /// Whether this (the latest extracted topic) is new relative to a stored
    /// checkpoint. An absent checkpoint means everything is new.
    #[must_use]
    pub fn is_newer_than(&self, stored: Option<&Self>) -> bool {
        stored.is_none_or(|cp| self.cmp_composite(cp) == Ordering::Greater)
    }
}

/// Whether a thread's newest post id is new relative to a stored checkpoint.
///
/// Post ids are compared numerically when both sides parse; otherwise plain
/// string inequality is the only meaningful signal, since ids are not
/// guaranteed monotonic. An empty newest id never counts as new.
#[must_use]
pub fn thread_is_new(newest_id: &str, stored: Option<&str>) -> bool {
    if newest_id.is_empty() {
        return false;
    }
    match stored {
        None | Some("") => true,
        Some(cp) => match (newest_id.parse::<u64>(), cp.parse::<u64>()) {
            (Ok(newest), Ok(last)) => newest > last,
            _ => newest_id != cp,
        },
    }
}
