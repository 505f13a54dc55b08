//! Replication Network Protocol
//!
//! Endpoints a storage node exposes to its peers: the leader pushes changes to replicas,
//! and the discovery service drives membership and promotion through them.

use super::types::{InconsistentNode, Node, NodeId};
use crate::changelog::types::{ChangeId, DatabaseChange};
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Leader → replica: apply one committed change.
pub const ENDPOINT_HANDLE_CHANGE: &str = "/database/handle-change";
/// Discovery → replica: report the highest change id held locally.
pub const ENDPOINT_LAST_CHANGE_ID: &str = "/database/last-change-id";
/// Discovery → leader: a new replica joined.
pub const ENDPOINT_ADD_REPLICA: &str = "/add-replica";
/// Discovery → replica: you are the new leader, adopt this replica set.
pub const ENDPOINT_MAKE_LEADER: &str = "/make-leader";
/// Discovery → leader: liveness probe.
pub const ENDPOINT_HEALTH_CHECK: &str = "/health-check";
/// Operator view of the leader's replica set.
pub const ENDPOINT_REPLICA_SET: &str = "/replica-set";

// --- Data Transfer Objects ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleChangeRequest {
    pub change: DatabaseChange,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddReplicaRequest {
    pub id: NodeId,
    pub address: String,
    pub last_saved_change_id: ChangeId,
}

/// Handoff payload sent to the node chosen by an election.
///
/// `inconsistent_replicas` carry change ids freshly queried from each replica.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MakeNodeLeaderRequest {
    pub healthy_replicas: Vec<Node>,
    pub inconsistent_replicas: Vec<InconsistentNode>,
}
