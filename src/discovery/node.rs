use axum::{
    Router,
    extract::Extension,
    routing::{delete, get, post, put},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::handlers::*;
use super::protocol::{
    ENDPOINT_CLUSTER_VIEW, ENDPOINT_INCREMENT_CHANGES_COUNTER, ENDPOINT_MAKE_REPLICA_HEALTHY,
    ENDPOINT_MAKE_REPLICA_INCONSISTENT, ENDPOINT_READING_ADDRESS, ENDPOINT_REGISTER,
    ENDPOINT_REPLICA, ENDPOINT_WRITING_ADDRESS,
};
use super::service::ClusterStateService;
use crate::client::node::NodeClient;
use crate::config::DiscoveryNodeSettings;

pub fn router(cluster: Arc<ClusterStateService>) -> Router {
    Router::new()
        .route(ENDPOINT_REGISTER, post(handle_register))
        .route(ENDPOINT_READING_ADDRESS, get(handle_reading_address))
        .route(ENDPOINT_WRITING_ADDRESS, get(handle_writing_address))
        .route(
            ENDPOINT_INCREMENT_CHANGES_COUNTER,
            put(handle_increment_changes_counter),
        )
        .route(
            &format!("{}/:id", ENDPOINT_MAKE_REPLICA_INCONSISTENT),
            put(handle_make_replica_inconsistent),
        )
        .route(
            &format!("{}/:id", ENDPOINT_MAKE_REPLICA_HEALTHY),
            put(handle_make_replica_healthy),
        )
        .route(
            &format!("{}/:id", ENDPOINT_REPLICA),
            delete(handle_delete_replica),
        )
        .route(ENDPOINT_CLUSTER_VIEW, get(handle_cluster_view))
        .layer(Extension(cluster))
}

/// A running discovery service.
pub struct DiscoveryNode {
    pub cluster: Arc<ClusterStateService>,
    pub local_addr: SocketAddr,
    cancel: CancellationToken,
    server: JoinHandle<()>,
}

impl DiscoveryNode {
    pub async fn start(settings: DiscoveryNodeSettings) -> anyhow::Result<Self> {
        let cancel = CancellationToken::new();
        let cluster = Arc::new(ClusterStateService::new(
            NodeClient::new(settings.rpc_timeout),
            settings.health_check_interval,
        ));

        let listener = TcpListener::bind(settings.bind).await?;
        let local_addr = listener.local_addr()?;
        let app = router(cluster.clone());

        let shutdown = cancel.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!("Discovery server stopped with error: {}", e);
            }
        });
        tracing::info!(
            "Discovery listening on {} (health check every {:?})",
            local_addr,
            settings.health_check_interval
        );

        Ok(Self {
            cluster,
            local_addr,
            cancel,
            server,
        })
    }

    /// Base URL storage nodes register against.
    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.cluster.shutdown();
        if let Err(e) = self.server.await {
            tracing::warn!("Discovery server task failed: {}", e);
        }
    }
}
