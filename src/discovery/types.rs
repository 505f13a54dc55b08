use crate::changelog::types::ChangeId;
use crate::replication::types::Node;
use serde::{Deserialize, Serialize};

/// Role assigned to a storage node at registration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Leader,
    Replica,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Leader => write!(f, "leader"),
            NodeRole::Replica => write!(f, "replica"),
        }
    }
}

/// Discovery's picture of the cluster at one instant.
///
/// `healthy` and `inconsistent` are sorted by node id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterView {
    pub leader: Option<Node>,
    pub healthy: Vec<Node>,
    pub inconsistent: Vec<Node>,
    pub last_change_id: ChangeId,
    pub election_in_progress: bool,
}
