//! Storage Network Protocol
//!
//! Client-facing endpoints and DTOs of a storage node. Writes must be sent to the address
//! returned by discovery's `/writing-address`; reads may go to any `/reading-address`.

use crate::changelog::types::ChangeId;
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// POST creates, DELETE removes.
pub const ENDPOINT_COLLECTION: &str = "/database/collection";
/// DELETE removes every element of a collection.
pub const ENDPOINT_FLUSH_COLLECTION: &str = "/database/flush-collection";
/// POST upserts, GET reads (query string), DELETE removes.
pub const ENDPOINT_ELEMENT: &str = "/database/element";

// --- Data Transfer Objects ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertElementRequest {
    pub collection_name: String,
    pub key: String,
    pub value: String,
    /// Time to live. The element never expires when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_seconds: Option<u64>,
}

/// Identifies one element; used as the GET query and the DELETE body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementKey {
    pub collection_name: String,
    pub key: String,
}

/// Outcome of a mutation. `change_id` is the id the change was logged under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_id: Option<ChangeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WriteResponse {
    pub fn committed(change_id: ChangeId) -> Self {
        Self {
            success: true,
            change_id: Some(change_id),
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            change_id: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetElementResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
