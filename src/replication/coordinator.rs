use super::types::{InconsistentNode, Node, NodeId, ReplicaSetView};
use crate::changelog::log::ChangeLog;
use crate::changelog::types::{ChangeId, DatabaseChange};
use crate::client::discovery::DiscoveryClient;
use crate::client::node::NodeClient;
use crate::config::RecoveryPolicy;
use crate::error::PeerError;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Leader-side view of the replica set.
///
/// A replica id lives in at most one of `healthy` and `inconsistent`. Healthy replicas
/// receive every change as it is committed; inconsistent ones are fed the backlog by a
/// per-replica recovery task until they catch up.
pub struct ReplicaSetCoordinator {
    change_log: Arc<ChangeLog>,
    node_client: NodeClient,
    discovery: DiscoveryClient,

    healthy: DashMap<NodeId, Node>,
    inconsistent: DashMap<NodeId, InconsistentNode>,
    /// Ids with a live recovery task.
    recovering: DashMap<NodeId, ()>,

    policy: RecoveryPolicy,
    /// Held while taking the fan-out snapshot and while classifying or promoting a
    /// replica against `last_id`, so a replica is either in the snapshot or still behind.
    round_lock: Mutex<()>,
    cancel: CancellationToken,
}

impl ReplicaSetCoordinator {
    pub fn new(
        change_log: Arc<ChangeLog>,
        node_client: NodeClient,
        discovery: DiscoveryClient,
        policy: RecoveryPolicy,
    ) -> Self {
        Self {
            change_log,
            node_client,
            discovery,
            healthy: DashMap::new(),
            inconsistent: DashMap::new(),
            recovering: DashMap::new(),
            policy,
            round_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    /// Registers a replica announced by discovery.
    ///
    /// A replica that is behind the log goes to `inconsistent` and gets a recovery task.
    /// Re-adding a known id overwrites its entry (address and cursor).
    pub async fn add_replica(
        self: &Arc<Self>,
        id: NodeId,
        address: String,
        last_change_id: ChangeId,
    ) {
        let round = self.round_lock.lock().await;
        let last_id = self.change_log.last_id();

        if last_change_id < last_id {
            self.healthy.remove(&id);
            self.inconsistent
                .insert(id, InconsistentNode::new(id, address.clone(), last_change_id));
            drop(round);

            tracing::info!(
                "Replica {} ({}) is behind ({} < {}), starting recovery",
                id,
                address,
                last_change_id,
                last_id
            );
            // Discovery classifies against its own counter, which may lag the log.
            if let Err(e) = self.discovery.make_replica_inconsistent(id).await {
                tracing::warn!("Failed to report replica {} as inconsistent: {}", id, e);
            }
            self.start_recovery(id);
        } else {
            self.inconsistent.remove(&id);
            self.healthy.insert(id, Node::new(id, address.clone()));
            tracing::info!("Replica {} ({}) joined as healthy", id, address);
        }
    }

    /// Replaces the whole replica set, as handed over on promotion to leader.
    pub async fn load_replica_set(
        self: &Arc<Self>,
        healthy: Vec<Node>,
        inconsistent: Vec<InconsistentNode>,
    ) {
        let to_recover: Vec<NodeId> = inconsistent.iter().map(|node| node.id).collect();
        {
            let _round = self.round_lock.lock().await;
            self.healthy.clear();
            self.inconsistent.clear();
            for node in healthy {
                self.healthy.insert(node.id, node);
            }
            for node in inconsistent {
                self.healthy.remove(&node.id);
                self.inconsistent.insert(node.id, node);
            }
        }

        tracing::info!(
            "Loaded replica set: {} healthy, {} inconsistent",
            self.healthy.len(),
            to_recover.len()
        );

        for id in to_recover {
            self.start_recovery(id);
        }
    }

    /// Sends `change` to every healthy replica in parallel and waits for all answers.
    ///
    /// Rejecting replicas are demoted to inconsistent; unreachable ones are dropped.
    /// The discovery change counter is bumped once per call regardless of outcomes.
    pub async fn notify_healthy_replicas(self: &Arc<Self>, change: &DatabaseChange) {
        let targets: Vec<Node> = {
            let _round = self.round_lock.lock().await;
            self.healthy.iter().map(|entry| entry.value().clone()).collect()
        };

        let sends = targets.iter().map(|node| {
            let client = self.node_client.clone();
            async move { client.notify_about_change(&node.address, change).await }
        });
        let results = join_all(sends).await;

        for (node, result) in targets.into_iter().zip(results) {
            match result {
                Ok(()) => {}
                Err(PeerError::Unhealthy { status, message }) => {
                    tracing::warn!(
                        "Replica {} rejected change {} ({}: {}), marking inconsistent",
                        node.id,
                        change.id(),
                        status,
                        message
                    );
                    self.demote(node, change.id()).await;
                }
                Err(PeerError::Unavailable(e)) => {
                    tracing::warn!(
                        "Replica {} unreachable for change {} ({}), removing",
                        node.id,
                        change.id(),
                        e
                    );
                    self.remove_unavailable(node.id).await;
                }
            }
        }

        if let Err(e) = self.discovery.increment_changes_counter().await {
            tracing::warn!("Failed to bump discovery change counter after {}: {}", change.id(), e);
        }
    }

    async fn demote(self: &Arc<Self>, node: Node, failed_change: ChangeId) {
        if self.healthy.remove(&node.id).is_none() {
            return;
        }
        let id = node.id;
        self.inconsistent.insert(
            id,
            InconsistentNode::new(id, node.address, failed_change.saturating_sub(1)),
        );

        if let Err(e) = self.discovery.make_replica_inconsistent(id).await {
            tracing::warn!("Failed to report replica {} as inconsistent: {}", id, e);
        }
        self.start_recovery(id);
    }

    async fn remove_unavailable(&self, id: NodeId) {
        let was_healthy = self.healthy.remove(&id).is_some();
        let was_inconsistent = self.inconsistent.remove(&id).is_some();
        if !was_healthy && !was_inconsistent {
            return;
        }

        if let Err(e) = self.discovery.delete_unavailable_replica(id).await {
            tracing::warn!("Failed to report replica {} as unavailable: {}", id, e);
        }
    }

    /// Spawns a recovery task for `id` unless one is already running.
    fn start_recovery(self: &Arc<Self>, id: NodeId) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Entry::Vacant(slot) = self.recovering.entry(id) {
            slot.insert(());
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.run_recovery(id).await;
            });
        }
    }

    async fn run_recovery(self: Arc<Self>, id: NodeId) {
        loop {
            self.recover(id).await;

            // An entry re-inserted while we were finishing must not be left without a task.
            self.recovering.remove(&id);
            if self.cancel.is_cancelled() || !self.inconsistent.contains_key(&id) {
                return;
            }
            match self.recovering.entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(());
                }
                Entry::Occupied(_) => return,
            }
        }
    }

    /// Feeds the backlog to replica `id` until it is caught up, removed, or cancelled.
    async fn recover(self: &Arc<Self>, id: NodeId) {
        let mut attempts = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let Some(target) = self.inconsistent.get(&id).map(|entry| entry.value().clone())
            else {
                return;
            };

            let next = target.last_change_id + 1;
            if next > self.change_log.last_id() {
                if self.try_promote(id).await {
                    return;
                }
                continue;
            }

            let change = match self.change_log.get_by_id(next) {
                Ok(change) => change,
                Err(e) => {
                    tracing::error!("Cannot recover replica {}: {}", id, e);
                    self.remove_unavailable(id).await;
                    return;
                }
            };

            match self.node_client.notify_about_change(&target.address, &change).await {
                Ok(()) => {
                    attempts = 0;
                    // Skip the advance if the entry was rewritten by a re-registration.
                    if let Some(mut entry) = self.inconsistent.get_mut(&id)
                        && entry.last_change_id == target.last_change_id
                        && entry.address == target.address
                    {
                        entry.last_change_id = next;
                    }
                }
                Err(PeerError::Unavailable(e)) => {
                    tracing::warn!("Replica {} unreachable during recovery ({}), removing", id, e);
                    self.remove_unavailable(id).await;
                    return;
                }
                Err(PeerError::Unhealthy { status, message }) => {
                    attempts += 1;
                    if attempts >= self.policy.max_attempts {
                        tracing::warn!(
                            "Replica {} rejected change {} {} times in a row, removing",
                            id,
                            next,
                            attempts
                        );
                        self.remove_unavailable(id).await;
                        return;
                    }

                    let delay = self.policy.backoff(attempts)
                        + Duration::from_millis(rand::random::<u64>() % 50);
                    tracing::debug!(
                        "Replica {} rejected change {} ({}: {}), retrying in {:?}",
                        id,
                        next,
                        status,
                        message,
                        delay
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Moves `id` to `healthy` if it still holds everything up to `last_id`.
    async fn try_promote(&self, id: NodeId) -> bool {
        let promoted = {
            let _round = self.round_lock.lock().await;
            match self.inconsistent.get(&id).map(|entry| entry.value().clone()) {
                None => return true,
                Some(current) if current.last_change_id >= self.change_log.last_id() => {
                    self.inconsistent.remove(&id);
                    self.healthy.insert(id, current.to_node());
                    current
                }
                Some(_) => return false,
            }
        };

        tracing::info!(
            "Replica {} caught up at change {}, now healthy",
            id,
            promoted.last_change_id
        );
        if let Err(e) = self.discovery.make_replica_healthy(id).await {
            tracing::warn!("Failed to report replica {} as healthy: {}", id, e);
        }
        true
    }

    pub fn snapshot(&self) -> ReplicaSetView {
        let mut healthy: Vec<Node> = self.healthy.iter().map(|e| e.value().clone()).collect();
        let mut inconsistent: Vec<InconsistentNode> =
            self.inconsistent.iter().map(|e| e.value().clone()).collect();
        healthy.sort_by_key(|node| node.id);
        inconsistent.sort_by_key(|node| node.id);

        ReplicaSetView {
            healthy,
            inconsistent,
        }
    }

    pub fn is_recovering(&self, id: NodeId) -> bool {
        self.recovering.contains_key(&id)
    }

    /// Stops all recovery tasks. Replica state is left as is.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
