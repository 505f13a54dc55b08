use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::handlers::*;
use super::memory::Database;
use super::protocol::{ENDPOINT_COLLECTION, ENDPOINT_ELEMENT, ENDPOINT_FLUSH_COLLECTION};
use super::service::DatabaseService;
use crate::changelog::log::ChangeLog;
use crate::client::discovery::DiscoveryClient;
use crate::client::node::NodeClient;
use crate::config::StorageNodeSettings;
use crate::discovery::types::NodeRole;
use crate::replication::coordinator::ReplicaSetCoordinator;
use crate::replication::handlers::{
    handle_add_replica, handle_health_check, handle_make_leader, handle_replica_set,
};
use crate::replication::protocol::{
    ENDPOINT_ADD_REPLICA, ENDPOINT_HANDLE_CHANGE, ENDPOINT_HEALTH_CHECK, ENDPOINT_LAST_CHANGE_ID,
    ENDPOINT_MAKE_LEADER, ENDPOINT_REPLICA_SET,
};

/// All routes a storage node serves.
pub fn router(service: Arc<DatabaseService>) -> Router {
    let coordinator = service.coordinator().clone();

    Router::new()
        .route(
            ENDPOINT_COLLECTION,
            post(handle_add_collection).delete(handle_delete_collection),
        )
        .route(
            ENDPOINT_FLUSH_COLLECTION,
            axum::routing::delete(handle_flush_collection),
        )
        .route(
            ENDPOINT_ELEMENT,
            post(handle_upsert_element)
                .get(handle_get_element)
                .delete(handle_delete_element),
        )
        .route(ENDPOINT_HANDLE_CHANGE, post(handle_change))
        .route(ENDPOINT_LAST_CHANGE_ID, get(handle_last_change_id))
        .route(ENDPOINT_ADD_REPLICA, post(handle_add_replica))
        .route(ENDPOINT_MAKE_LEADER, post(handle_make_leader))
        .route(ENDPOINT_HEALTH_CHECK, get(handle_health_check))
        .route(ENDPOINT_REPLICA_SET, get(handle_replica_set))
        .layer(Extension(service))
        .layer(Extension(coordinator))
}

/// A running storage node: replayed, serving HTTP and registered with discovery.
pub struct StorageNode {
    pub service: Arc<DatabaseService>,
    pub local_addr: SocketAddr,
    pub role: NodeRole,
    cancel: CancellationToken,
    server: JoinHandle<()>,
}

impl StorageNode {
    pub async fn start(settings: StorageNodeSettings) -> anyhow::Result<Self> {
        let cancel = CancellationToken::new();

        // 1. Local state from the change log:
        let change_log = Arc::new(ChangeLog::open(settings.change_log.clone()).await?);
        let discovery = DiscoveryClient::new(&settings.discovery_address, settings.rpc_timeout);
        let coordinator = Arc::new(ReplicaSetCoordinator::new(
            change_log.clone(),
            NodeClient::new(settings.rpc_timeout),
            discovery.clone(),
            settings.recovery.clone(),
        ));
        let database = Arc::new(Database::new());
        let service = Arc::new(DatabaseService::new(
            database.clone(),
            change_log,
            coordinator,
        ));
        service.init().await?;

        // 2. HTTP server, up before registering so the leader can reach us:
        let listener = TcpListener::bind(settings.service.bind).await?;
        let local_addr = listener.local_addr()?;
        let app = router(service.clone());

        let shutdown = cancel.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!("Storage server stopped with error: {}", e);
            }
        });
        tracing::info!("Storage node '{}' listening on {}", settings.service.name, local_addr);

        // 3. Join the cluster:
        let registration = match service
            .register(&discovery, &settings.service.name, local_addr.port())
            .await
        {
            Ok(registration) => registration,
            Err(e) => {
                cancel.cancel();
                return Err(anyhow::anyhow!(
                    "Registration with {} failed: {}",
                    discovery.base_url(),
                    e
                ));
            }
        };

        database.start_expiry_sweep(settings.expiry_sweep_interval, cancel.child_token());

        Ok(Self {
            service,
            local_addr,
            role: registration.node_role,
            cancel,
            server,
        })
    }

    /// Stops serving and cancels background tasks, then waits for the server to drain.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.service.coordinator().shutdown();
        if let Err(e) = self.server.await {
            tracing::warn!("Storage server task failed: {}", e);
        }
    }
}
