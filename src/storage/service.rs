use super::memory::Database;
use crate::changelog::log::ChangeLog;
use crate::changelog::types::{ChangeId, CollectionElement, DatabaseChange, now_ms};
use crate::client::discovery::DiscoveryClient;
use crate::discovery::protocol::{RegistrationRequest, RegistrationResponse};
use crate::discovery::types::NodeRole;
use crate::error::{PeerError, StoreError};
use crate::replication::coordinator::ReplicaSetCoordinator;
use crate::replication::protocol::MakeNodeLeaderRequest;
use crate::replication::types::NodeId;

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// The storage node's database: local state, change log and (when leading) replication.
///
/// Every mutation goes through one write lock, so local apply order, log order and the
/// order replicas see live changes are all the same.
pub struct DatabaseService {
    database: Arc<Database>,
    change_log: Arc<ChangeLog>,
    coordinator: Arc<ReplicaSetCoordinator>,
    role: RwLock<NodeRole>,
    /// 0 until registration succeeds.
    node_id: AtomicU64,
    write_lock: Mutex<()>,
}

impl DatabaseService {
    pub fn new(
        database: Arc<Database>,
        change_log: Arc<ChangeLog>,
        coordinator: Arc<ReplicaSetCoordinator>,
    ) -> Self {
        Self {
            database,
            change_log,
            coordinator,
            role: RwLock::new(NodeRole::Replica),
            node_id: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// Rebuilds local state from the persisted change log.
    pub async fn init(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let changes = self.change_log.load_all().await?;
        for change in &changes {
            self.apply(change);
        }
        tracing::info!(
            "Database restored from {} changes (last id {})",
            changes.len(),
            self.change_log.last_id()
        );
        Ok(())
    }

    // --- Write path ---

    async fn write<A, B>(&self, apply: A, build: B) -> Result<DatabaseChange, StoreError>
    where
        A: FnOnce(&Database) -> Result<(), StoreError>,
        B: FnOnce(ChangeId) -> DatabaseChange,
    {
        let _guard = self.write_lock.lock().await;

        apply(&self.database)?;
        let change = self.change_log.commit(build).await?;

        if self.is_leader() {
            self.coordinator.notify_healthy_replicas(&change).await;
        }
        Ok(change)
    }

    pub async fn add_collection(&self, name: &str) -> Result<DatabaseChange, StoreError> {
        self.write(
            |db| db.add_collection(name),
            |id| DatabaseChange::collection_creation(name, id),
        )
        .await
    }

    pub async fn delete_collection(&self, name: &str) -> Result<DatabaseChange, StoreError> {
        self.write(
            |db| db.delete_collection(name),
            |id| DatabaseChange::collection_deletion(name, id),
        )
        .await
    }

    pub async fn flush_collection(&self, name: &str) -> Result<DatabaseChange, StoreError> {
        self.write(
            |db| db.flush_collection(name),
            |id| DatabaseChange::collection_flush(name, id),
        )
        .await
    }

    /// Inserts or replaces `key`. With `expiry`, the element disappears that long from now;
    /// an expiry past the end of the clock never fires.
    pub async fn upsert_element(
        &self,
        collection_name: &str,
        key: &str,
        value: &str,
        expiry: Option<Duration>,
    ) -> Result<DatabaseChange, StoreError> {
        let expiration_time = expiry.map(|ttl| {
            u64::try_from(ttl.as_millis())
                .ok()
                .and_then(|ttl_ms| now_ms().checked_add(ttl_ms))
                .unwrap_or(u64::MAX)
        });
        let element = CollectionElement::new(value, expiration_time);

        self.write(
            |db| db.upsert_element(collection_name, key, element.clone()),
            |id| DatabaseChange::element_upsert(collection_name, key, element.clone(), id),
        )
        .await
    }

    pub async fn delete_element(
        &self,
        collection_name: &str,
        key: &str,
    ) -> Result<DatabaseChange, StoreError> {
        self.write(
            |db| db.delete_element(collection_name, key),
            |id| DatabaseChange::element_deletion(collection_name, key, id),
        )
        .await
    }

    pub fn get_element(&self, collection_name: &str, key: &str) -> Result<String, StoreError> {
        self.database
            .get_element(collection_name, key)
            .map(|element| element.value)
    }

    // --- Replica path ---

    /// Applies a change pushed by the leader and records it under the leader's id.
    ///
    /// An id already in the log is acknowledged without being applied again.
    pub async fn handle_change(&self, change: DatabaseChange) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        if self.change_log.contains(change.id()) {
            tracing::debug!("Change {} already applied, acknowledging", change.id());
            return Ok(());
        }

        self.apply(&change);
        self.change_log.append(&change).await
    }

    /// Applies a logged change to local state.
    ///
    /// Replay and replication tolerate a missing or already present collection: the
    /// change was valid on the leader when it was committed.
    fn apply(&self, change: &DatabaseChange) {
        let result = match change {
            DatabaseChange::CollectionCreation {
                collection_name, ..
            } => self.database.add_collection(collection_name),
            DatabaseChange::CollectionDeletion {
                collection_name, ..
            } => self.database.delete_collection(collection_name),
            DatabaseChange::CollectionFlush {
                collection_name, ..
            } => self.database.flush_collection(collection_name),
            DatabaseChange::ElementUpsert {
                collection_name,
                key,
                element,
                ..
            } => self
                .database
                .upsert_element(collection_name, key, element.clone()),
            DatabaseChange::ElementDeletion {
                collection_name,
                key,
                ..
            } => self.database.delete_element(collection_name, key),
        };

        if let Err(e) = result {
            tracing::debug!("Change {} ({}) applied as no-op: {}", change.id(), change.kind(), e);
        }
    }

    // --- Cluster role ---

    /// Announces this node to discovery and adopts the role it is given.
    pub async fn register(
        &self,
        discovery: &DiscoveryClient,
        name: &str,
        port: u16,
    ) -> Result<RegistrationResponse, PeerError> {
        let request = RegistrationRequest {
            name: name.to_string(),
            port,
            last_saved_change_id: self.change_log.last_id(),
        };
        let response = discovery.register(&request).await?;

        self.node_id.store(response.id, Ordering::SeqCst);
        *self.role.write() = response.node_role;

        tracing::info!(
            "Registered with {} as {} (id {}, last change {})",
            discovery.base_url(),
            response.node_role,
            response.id,
            request.last_saved_change_id
        );
        Ok(response)
    }

    /// Takes over as leader with the replica set chosen by discovery.
    pub async fn become_leader(&self, request: MakeNodeLeaderRequest) {
        tracing::info!(
            "Promoted to leader at change {} with {} healthy and {} inconsistent replicas",
            self.change_log.last_id(),
            request.healthy_replicas.len(),
            request.inconsistent_replicas.len()
        );
        self.coordinator
            .load_replica_set(request.healthy_replicas, request.inconsistent_replicas)
            .await;
        *self.role.write() = NodeRole::Leader;
    }

    pub fn last_change_id(&self) -> ChangeId {
        self.change_log.last_id()
    }

    pub fn role(&self) -> NodeRole {
        *self.role.read()
    }

    pub fn is_leader(&self) -> bool {
        self.role() == NodeRole::Leader
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id.load(Ordering::SeqCst)
    }

    pub fn coordinator(&self) -> &Arc<ReplicaSetCoordinator> {
        &self.coordinator
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }
}
