use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};
use std::sync::Arc;

use super::protocol::{AddressResponse, ErrorResponse, RegistrationRequest, RegistrationResponse};
use super::service::ClusterStateService;
use super::types::ClusterView;
use crate::changelog::types::ChangeId;
use crate::error::ClusterError;
use crate::replication::types::NodeId;

type ErrorReply = (StatusCode, Json<ErrorResponse>);

fn error_reply(error: ClusterError) -> ErrorReply {
    let status = match error {
        ClusterError::LeaderChanging => StatusCode::SERVICE_UNAVAILABLE,
        ClusterError::Peer(_) => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(ErrorResponse {
            message: error.to_string(),
        }),
    )
}

pub async fn handle_register(
    Extension(cluster): Extension<Arc<ClusterStateService>>,
    Json(req): Json<RegistrationRequest>,
) -> Result<(StatusCode, Json<RegistrationResponse>), ErrorReply> {
    match cluster
        .register(&req.name, req.port, req.last_saved_change_id)
        .await
    {
        Ok(response) => Ok((StatusCode::OK, Json(response))),
        Err(e) => {
            tracing::warn!("Registration of {}:{} rejected: {}", req.name, req.port, e);
            Err(error_reply(e))
        }
    }
}

pub async fn handle_reading_address(
    Extension(cluster): Extension<Arc<ClusterStateService>>,
) -> (StatusCode, Json<AddressResponse>) {
    let address = cluster.get_reading_address();
    (StatusCode::OK, Json(AddressResponse { address }))
}

pub async fn handle_writing_address(
    Extension(cluster): Extension<Arc<ClusterStateService>>,
) -> Result<(StatusCode, Json<AddressResponse>), ErrorReply> {
    let address = cluster.get_writing_address().map_err(error_reply)?;
    Ok((StatusCode::OK, Json(AddressResponse { address })))
}

pub async fn handle_increment_changes_counter(
    Extension(cluster): Extension<Arc<ClusterStateService>>,
) -> (StatusCode, Json<ChangeId>) {
    (StatusCode::OK, Json(cluster.increment_changes_counter()))
}

pub async fn handle_make_replica_inconsistent(
    Extension(cluster): Extension<Arc<ClusterStateService>>,
    Path(id): Path<NodeId>,
) -> StatusCode {
    cluster.make_replica_inconsistent(id);
    StatusCode::OK
}

pub async fn handle_make_replica_healthy(
    Extension(cluster): Extension<Arc<ClusterStateService>>,
    Path(id): Path<NodeId>,
) -> StatusCode {
    cluster.make_replica_healthy(id);
    StatusCode::OK
}

pub async fn handle_delete_replica(
    Extension(cluster): Extension<Arc<ClusterStateService>>,
    Path(id): Path<NodeId>,
) -> StatusCode {
    cluster.delete_unavailable_replica(id);
    StatusCode::OK
}

pub async fn handle_cluster_view(
    Extension(cluster): Extension<Arc<ClusterStateService>>,
) -> (StatusCode, Json<ClusterView>) {
    (StatusCode::OK, Json(cluster.view()))
}
