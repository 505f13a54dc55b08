use axum::{Json, extract::Extension, http::StatusCode};
use std::sync::Arc;

use super::coordinator::ReplicaSetCoordinator;
use super::protocol::{AddReplicaRequest, MakeNodeLeaderRequest};
use super::types::ReplicaSetView;
use crate::storage::service::DatabaseService;

pub async fn handle_add_replica(
    Extension(coordinator): Extension<Arc<ReplicaSetCoordinator>>,
    Json(req): Json<AddReplicaRequest>,
) -> StatusCode {
    coordinator
        .add_replica(req.id, req.address, req.last_saved_change_id)
        .await;
    StatusCode::OK
}

pub async fn handle_make_leader(
    Extension(service): Extension<Arc<DatabaseService>>,
    Json(req): Json<MakeNodeLeaderRequest>,
) -> StatusCode {
    service.become_leader(req).await;
    StatusCode::OK
}

pub async fn handle_health_check() -> StatusCode {
    StatusCode::OK
}

pub async fn handle_replica_set(
    Extension(coordinator): Extension<Arc<ReplicaSetCoordinator>>,
) -> (StatusCode, Json<ReplicaSetView>) {
    (StatusCode::OK, Json(coordinator.snapshot()))
}
