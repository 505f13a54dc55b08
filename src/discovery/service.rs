use super::protocol::RegistrationResponse;
use super::types::{ClusterView, NodeRole};
use crate::changelog::types::ChangeId;
use crate::client::node::NodeClient;
use crate::error::ClusterError;
use crate::replication::protocol::{AddReplicaRequest, MakeNodeLeaderRequest};
use crate::replication::types::{InconsistentNode, Node, NodeId};

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::cmp::Reverse;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Cluster membership, leader identity and read routing, as seen by discovery.
///
/// State machine: no leader → leader elected ⇄ election in progress. The first node to
/// register becomes leader; later ones become replicas. A leader that fails its health
/// check is replaced by one of its replicas.
pub struct ClusterStateService {
    /// Check-and-set under the write lock decides which registration becomes leader.
    leader: RwLock<Option<Node>>,
    next_node_id: AtomicU64,

    healthy: DashMap<NodeId, Node>,
    inconsistent: DashMap<NodeId, Node>,
    /// Replicas whose registration the leader has not acknowledged yet. Never elected.
    pending: DashMap<NodeId, ()>,
    /// Round-robin position into `healthy` sorted by id. Locked before touching `healthy`.
    cursor: Mutex<usize>,

    /// Number of changes the leader has committed, as reported by the leader.
    last_change_id: AtomicU64,
    election_in_progress: AtomicBool,
    health_loop_started: AtomicBool,

    node_client: NodeClient,
    health_check_interval: Duration,
    cancel: CancellationToken,
}

impl ClusterStateService {
    pub fn new(node_client: NodeClient, health_check_interval: Duration) -> Self {
        Self {
            leader: RwLock::new(None),
            next_node_id: AtomicU64::new(0),
            healthy: DashMap::new(),
            inconsistent: DashMap::new(),
            pending: DashMap::new(),
            cursor: Mutex::new(0),
            last_change_id: AtomicU64::new(0),
            election_in_progress: AtomicBool::new(false),
            health_loop_started: AtomicBool::new(false),
            node_client,
            health_check_interval,
            cancel: CancellationToken::new(),
        }
    }

    // --- Registration ---

    /// Admits a storage node and assigns it a role and a fresh id.
    pub async fn register(
        self: &Arc<Self>,
        name: &str,
        port: u16,
        last_saved_change_id: ChangeId,
    ) -> Result<RegistrationResponse, ClusterError> {
        let node = {
            let mut leader = self.leader.write();
            if self.election_in_progress.load(Ordering::SeqCst) {
                return Err(ClusterError::LeaderChanging);
            }

            let id = self.next_node_id.fetch_add(1, Ordering::SeqCst) + 1;
            let node = Node::new(id, format!("http://{}:{}", name, port));

            if leader.is_none() {
                *leader = Some(node.clone());
                self.last_change_id
                    .store(last_saved_change_id, Ordering::SeqCst);
                drop(leader);

                tracing::info!(
                    "Node {} ({}) registered as leader at change {}",
                    id,
                    node.address,
                    last_saved_change_id
                );
                self.start_health_loop();
                return Ok(RegistrationResponse {
                    node_role: NodeRole::Leader,
                    id,
                });
            }
            node
        };

        let leader_address = self.leader_address();
        let last_change_id = self.last_change_id.load(Ordering::SeqCst);

        self.pending.insert(node.id, ());
        if last_saved_change_id < last_change_id {
            self.inconsistent.insert(node.id, node.clone());
        } else {
            let mut cursor = self.cursor.lock();
            self.healthy.insert(node.id, node.clone());
            *cursor = 0;
        }

        let request = AddReplicaRequest {
            id: node.id,
            address: node.address.clone(),
            last_saved_change_id,
        };
        if let Err(e) = self.node_client.add_replica(&leader_address, &request).await {
            tracing::warn!(
                "Leader at {} did not accept replica {}: {}",
                leader_address,
                node.id,
                e
            );
            self.remove_replica(node.id);
            self.pending.remove(&node.id);
            return Err(ClusterError::Peer(e));
        }
        self.pending.remove(&node.id);

        tracing::info!(
            "Node {} ({}) registered as replica at change {} (cluster at {})",
            node.id,
            node.address,
            last_saved_change_id,
            last_change_id
        );
        Ok(RegistrationResponse {
            node_role: NodeRole::Replica,
            id: node.id,
        })
    }

    // --- Routing ---

    /// Next healthy replica in round-robin order, or the leader when there is none.
    ///
    /// Empty when no leader is known.
    pub fn get_reading_address(&self) -> String {
        let mut cursor = self.cursor.lock();

        let mut replicas: Vec<Node> = self.healthy.iter().map(|e| e.value().clone()).collect();
        if replicas.is_empty() {
            return self.leader_address();
        }
        replicas.sort_by_key(|node| node.id);

        if *cursor >= replicas.len() {
            *cursor = 0;
        }
        let chosen = replicas[*cursor].address.clone();
        *cursor = (*cursor + 1) % replicas.len();
        chosen
    }

    pub fn get_writing_address(&self) -> Result<String, ClusterError> {
        if self.election_in_progress.load(Ordering::SeqCst) {
            return Err(ClusterError::LeaderChanging);
        }
        Ok(self.leader_address())
    }

    fn leader_address(&self) -> String {
        self.leader
            .read()
            .as_ref()
            .map(|leader| leader.address.clone())
            .unwrap_or_default()
    }

    // --- Transitions reported by the leader ---

    pub fn increment_changes_counter(&self) -> ChangeId {
        self.last_change_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn make_replica_inconsistent(&self, id: NodeId) {
        let mut cursor = self.cursor.lock();
        if let Some((_, node)) = self.healthy.remove(&id) {
            self.inconsistent.insert(id, node);
            *cursor = 0;
            tracing::info!("Replica {} marked inconsistent", id);
        }
    }

    pub fn make_replica_healthy(&self, id: NodeId) {
        let mut cursor = self.cursor.lock();
        if let Some((_, node)) = self.inconsistent.remove(&id) {
            self.healthy.insert(id, node);
            *cursor = 0;
            tracing::info!("Replica {} marked healthy", id);
        }
    }

    /// Forgets a replica; it has to register again to rejoin.
    pub fn delete_unavailable_replica(&self, id: NodeId) {
        if self.remove_replica(id) {
            tracing::info!("Replica {} removed as unavailable", id);
        }
    }

    fn remove_replica(&self, id: NodeId) -> bool {
        let mut cursor = self.cursor.lock();
        let was_healthy = self.healthy.remove(&id).is_some();
        if was_healthy {
            *cursor = 0;
        }
        let was_inconsistent = self.inconsistent.remove(&id).is_some();
        was_healthy || was_inconsistent
    }

    // --- Failover ---

    fn start_health_loop(self: &Arc<Self>) {
        if self.health_loop_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_health_checks().await;
        });
    }

    async fn run_health_checks(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.health_check_interval);
        // The first tick fires immediately; the leader just registered.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.election_in_progress.load(Ordering::SeqCst) {
                continue;
            }
            let Some(leader) = self.leader.read().clone() else {
                continue;
            };

            if let Err(e) = self.node_client.health_check(&leader.address).await {
                tracing::warn!(
                    "Leader {} ({}) failed health check: {}",
                    leader.id,
                    leader.address,
                    e
                );
                self.elect_new_leader().await;
            }
        }
        tracing::debug!("Health check loop stopped");
    }

    /// Replaces the current leader with the most suitable replica.
    ///
    /// Healthy replicas are tried in ascending id order. A candidate that does not accept
    /// the handoff is dropped and the next one is tried. Without healthy replicas, the
    /// inconsistent replica holding the most changes is promoted. With no candidate at all
    /// the leader slot is emptied and the next registering node becomes leader.
    pub async fn elect_new_leader(&self) {
        let old_leader = {
            let mut leader = self.leader.write();
            if self.election_in_progress.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(leader) = leader.as_mut() {
                leader.address.clear();
            }
            leader.as_ref().map(|leader| leader.id)
        };
        tracing::info!("Starting leader election (previous leader {:?})", old_leader);

        match self.run_election().await {
            Some(node) => {
                tracing::info!("Node {} ({}) is the new leader", node.id, node.address);
                *self.leader.write() = Some(node);
            }
            None => {
                tracing::warn!("No replica could take over; waiting for a node to register");
                *self.leader.write() = None;
            }
        }

        self.election_in_progress.store(false, Ordering::SeqCst);
    }

    async fn run_election(&self) -> Option<Node> {
        let mut inconsistent = self.refresh_inconsistent().await;
        let mut healthy: Vec<Node> = self.healthy.iter().map(|e| e.value().clone()).collect();
        healthy.sort_by_key(|node| node.id);

        loop {
            let (candidate, candidate_last_id) = if let Some(first) =
                healthy.iter().find(|node| self.is_electable(node.id))
            {
                (first.clone(), None)
            } else {
                let best = inconsistent
                    .iter()
                    .filter(|node| self.is_electable(node.id))
                    .max_by_key(|node| (node.last_change_id, Reverse(node.id)))?;
                (best.to_node(), Some(best.last_change_id))
            };

            let request = MakeNodeLeaderRequest {
                healthy_replicas: healthy
                    .iter()
                    .filter(|node| node.id != candidate.id)
                    .cloned()
                    .collect(),
                inconsistent_replicas: inconsistent
                    .iter()
                    .filter(|node| node.id != candidate.id)
                    .cloned()
                    .collect(),
            };

            healthy.retain(|node| node.id != candidate.id);
            inconsistent.retain(|node| node.id != candidate.id);
            self.remove_replica(candidate.id);

            match self
                .node_client
                .make_node_leader(&candidate.address, &request)
                .await
            {
                Ok(()) => {
                    if let Some(last_id) = candidate_last_id {
                        self.last_change_id.store(last_id, Ordering::SeqCst);
                    }
                    return Some(candidate);
                }
                Err(e) => {
                    tracing::warn!(
                        "Candidate {} ({}) refused leadership: {}",
                        candidate.id,
                        candidate.address,
                        e
                    );
                }
            }
        }
    }

    fn is_electable(&self, id: NodeId) -> bool {
        !self.pending.contains_key(&id)
    }

    /// Asks every inconsistent replica for its last change id, dropping those that fail.
    async fn refresh_inconsistent(&self) -> Vec<InconsistentNode> {
        let nodes: Vec<Node> = self
            .inconsistent
            .iter()
            .map(|e| e.value().clone())
            .collect();

        let queries = nodes.iter().map(|node| {
            let client = self.node_client.clone();
            async move { client.get_last_saved_change_id(&node.address).await }
        });
        let results = join_all(queries).await;

        let mut fresh = Vec::new();
        for (node, result) in nodes.into_iter().zip(results) {
            match result {
                Ok(last_change_id) => {
                    fresh.push(InconsistentNode::new(node.id, node.address, last_change_id));
                }
                Err(e) => {
                    tracing::warn!(
                        "Inconsistent replica {} did not report its last change ({}), removing",
                        node.id,
                        e
                    );
                    self.remove_replica(node.id);
                }
            }
        }
        fresh.sort_by_key(|node| node.id);
        fresh
    }

    pub fn view(&self) -> ClusterView {
        let mut healthy: Vec<Node> = self.healthy.iter().map(|e| e.value().clone()).collect();
        let mut inconsistent: Vec<Node> =
            self.inconsistent.iter().map(|e| e.value().clone()).collect();
        healthy.sort_by_key(|node| node.id);
        inconsistent.sort_by_key(|node| node.id);

        ClusterView {
            leader: self.leader.read().clone(),
            healthy,
            inconsistent,
            last_change_id: self.last_change_id.load(Ordering::SeqCst),
            election_in_progress: self.election_in_progress.load(Ordering::SeqCst),
        }
    }

    /// Stops the health check loop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
