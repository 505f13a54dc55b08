use crate::changelog::types::ChangeId;
use serde::{Deserialize, Serialize};

/// Node ids are handed out by the discovery service, starting at 1.
pub type NodeId = u64;

/// A registered storage process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    /// Base URL, e.g. `http://db-2:5000`. Cleared while a dead leader is being replaced.
    pub address: String,
}

impl Node {
    pub fn new(id: NodeId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

/// A replica that is behind the leader, with the last change it is known to hold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InconsistentNode {
    pub id: NodeId,
    pub address: String,
    pub last_change_id: ChangeId,
}

impl InconsistentNode {
    pub fn new(id: NodeId, address: impl Into<String>, last_change_id: ChangeId) -> Self {
        Self {
            id,
            address: address.into(),
            last_change_id,
        }
    }

    pub fn to_node(&self) -> Node {
        Node::new(self.id, self.address.clone())
    }
}

/// Point-in-time copy of the leader's replica set, sorted by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaSetView {
    pub healthy: Vec<Node>,
    pub inconsistent: Vec<InconsistentNode>,
}
