//! Discovery Network Protocol
//!
//! Endpoints and DTOs of the discovery service. Storage nodes call these to register and
//! to mirror replica-state transitions; clients call the address lookups.

use super::types::NodeRole;
use crate::changelog::types::ChangeId;
use crate::replication::types::NodeId;
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

pub const ENDPOINT_REGISTER: &str = "/register";
pub const ENDPOINT_READING_ADDRESS: &str = "/reading-address";
pub const ENDPOINT_WRITING_ADDRESS: &str = "/writing-address";
pub const ENDPOINT_INCREMENT_CHANGES_COUNTER: &str = "/increment-changes-counter";
/// Followed by `/{id}`.
pub const ENDPOINT_MAKE_REPLICA_INCONSISTENT: &str = "/make-replica-inconsistent";
/// Followed by `/{id}`.
pub const ENDPOINT_MAKE_REPLICA_HEALTHY: &str = "/make-replica-healthy";
/// Followed by `/{id}`; used with DELETE.
pub const ENDPOINT_REPLICA: &str = "/replica";
pub const ENDPOINT_CLUSTER_VIEW: &str = "/cluster-view";

// --- Data Transfer Objects ---

/// Sent by a storage node once at startup, after replaying its change log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationRequest {
    /// Host name other nodes use to reach this node.
    pub name: String,
    pub port: u16,
    pub last_saved_change_id: ChangeId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationResponse {
    pub node_role: NodeRole,
    pub id: NodeId,
}

/// Empty when no leader has registered yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressResponse {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}
