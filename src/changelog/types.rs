use serde::{Deserialize, Serialize};

/// Sequence number of a committed mutation.
pub type ChangeId = u64;

/// A stored value together with its optional expiration time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionElement {
    pub value: String,
    /// Unix milliseconds after which the element is treated as absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<u64>,
}

impl CollectionElement {
    pub fn new(value: impl Into<String>, expiration_time: Option<u64>) -> Self {
        Self {
            value: value.into(),
            expiration_time,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expiration_time, Some(expires) if expires <= now)
    }
}

/// A single committed mutation.
///
/// The set of variants is closed: every consumer (local apply, log encoding,
/// catch-up resend) matches all five exhaustively, and an unknown `type` tag
/// fails to decode instead of being skipped.
///
/// `change_time` is informational. Only `id` is used for ordering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DatabaseChange {
    CollectionCreation {
        collection_name: String,
        change_time: u64,
        id: ChangeId,
    },
    CollectionDeletion {
        collection_name: String,
        change_time: u64,
        id: ChangeId,
    },
    CollectionFlush {
        collection_name: String,
        change_time: u64,
        id: ChangeId,
    },
    ElementUpsert {
        collection_name: String,
        key: String,
        element: CollectionElement,
        change_time: u64,
        id: ChangeId,
    },
    ElementDeletion {
        collection_name: String,
        key: String,
        change_time: u64,
        id: ChangeId,
    },
}

impl DatabaseChange {
    pub fn collection_creation(collection_name: impl Into<String>, id: ChangeId) -> Self {
        DatabaseChange::CollectionCreation {
            collection_name: collection_name.into(),
            change_time: now_ms(),
            id,
        }
    }

    pub fn collection_deletion(collection_name: impl Into<String>, id: ChangeId) -> Self {
        DatabaseChange::CollectionDeletion {
            collection_name: collection_name.into(),
            change_time: now_ms(),
            id,
        }
    }

    pub fn collection_flush(collection_name: impl Into<String>, id: ChangeId) -> Self {
        DatabaseChange::CollectionFlush {
            collection_name: collection_name.into(),
            change_time: now_ms(),
            id,
        }
    }

    pub fn element_upsert(
        collection_name: impl Into<String>,
        key: impl Into<String>,
        element: CollectionElement,
        id: ChangeId,
    ) -> Self {
        DatabaseChange::ElementUpsert {
            collection_name: collection_name.into(),
            key: key.into(),
            element,
            change_time: now_ms(),
            id,
        }
    }

    pub fn element_deletion(
        collection_name: impl Into<String>,
        key: impl Into<String>,
        id: ChangeId,
    ) -> Self {
        DatabaseChange::ElementDeletion {
            collection_name: collection_name.into(),
            key: key.into(),
            change_time: now_ms(),
            id,
        }
    }

    pub fn id(&self) -> ChangeId {
        match self {
            DatabaseChange::CollectionCreation { id, .. }
            | DatabaseChange::CollectionDeletion { id, .. }
            | DatabaseChange::CollectionFlush { id, .. }
            | DatabaseChange::ElementUpsert { id, .. }
            | DatabaseChange::ElementDeletion { id, .. } => *id,
        }
    }

    pub fn collection_name(&self) -> &str {
        match self {
            DatabaseChange::CollectionCreation {
                collection_name, ..
            }
            | DatabaseChange::CollectionDeletion {
                collection_name, ..
            }
            | DatabaseChange::CollectionFlush {
                collection_name, ..
            }
            | DatabaseChange::ElementUpsert {
                collection_name, ..
            }
            | DatabaseChange::ElementDeletion {
                collection_name, ..
            } => collection_name,
        }
    }

    pub fn change_time(&self) -> u64 {
        match self {
            DatabaseChange::CollectionCreation { change_time, .. }
            | DatabaseChange::CollectionDeletion { change_time, .. }
            | DatabaseChange::CollectionFlush { change_time, .. }
            | DatabaseChange::ElementUpsert { change_time, .. }
            | DatabaseChange::ElementDeletion { change_time, .. } => *change_time,
        }
    }

    /// Wire tag of the variant, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            DatabaseChange::CollectionCreation { .. } => "collection-creation",
            DatabaseChange::CollectionDeletion { .. } => "collection-deletion",
            DatabaseChange::CollectionFlush { .. } => "collection-flush",
            DatabaseChange::ElementUpsert { .. } => "element-upsert",
            DatabaseChange::ElementDeletion { .. } => "element-deletion",
        }
    }
}

/// Current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
