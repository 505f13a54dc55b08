use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
};
use std::sync::Arc;
use std::time::Duration;

use super::protocol::{
    CollectionRequest, ElementKey, GetElementResponse, UpsertElementRequest, WriteResponse,
};
use super::service::DatabaseService;
use crate::changelog::types::{ChangeId, DatabaseChange};
use crate::error::StoreError;
use crate::replication::protocol::HandleChangeRequest;

fn status_of(error: &StoreError) -> StatusCode {
    match error {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
        StoreError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn write_outcome(
    operation: &str,
    result: Result<DatabaseChange, StoreError>,
) -> (StatusCode, Json<WriteResponse>) {
    match result {
        Ok(change) => (StatusCode::OK, Json(WriteResponse::committed(change.id()))),
        Err(e) => {
            if matches!(e, StoreError::Unexpected(_)) {
                tracing::error!("Failed to {}: {}", operation, e);
            } else {
                tracing::debug!("Rejected {}: {}", operation, e);
            }
            (status_of(&e), Json(WriteResponse::failed(e)))
        }
    }
}

pub async fn handle_add_collection(
    Extension(service): Extension<Arc<DatabaseService>>,
    Json(req): Json<CollectionRequest>,
) -> (StatusCode, Json<WriteResponse>) {
    write_outcome("add collection", service.add_collection(&req.name).await)
}

pub async fn handle_delete_collection(
    Extension(service): Extension<Arc<DatabaseService>>,
    Json(req): Json<CollectionRequest>,
) -> (StatusCode, Json<WriteResponse>) {
    write_outcome("delete collection", service.delete_collection(&req.name).await)
}

pub async fn handle_flush_collection(
    Extension(service): Extension<Arc<DatabaseService>>,
    Json(req): Json<CollectionRequest>,
) -> (StatusCode, Json<WriteResponse>) {
    write_outcome("flush collection", service.flush_collection(&req.name).await)
}

pub async fn handle_upsert_element(
    Extension(service): Extension<Arc<DatabaseService>>,
    Json(req): Json<UpsertElementRequest>,
) -> (StatusCode, Json<WriteResponse>) {
    let expiry = req.expiry_seconds.map(Duration::from_secs);
    write_outcome(
        "upsert element",
        service
            .upsert_element(&req.collection_name, &req.key, &req.value, expiry)
            .await,
    )
}

pub async fn handle_delete_element(
    Extension(service): Extension<Arc<DatabaseService>>,
    Json(req): Json<ElementKey>,
) -> (StatusCode, Json<WriteResponse>) {
    write_outcome(
        "delete element",
        service.delete_element(&req.collection_name, &req.key).await,
    )
}

pub async fn handle_get_element(
    Extension(service): Extension<Arc<DatabaseService>>,
    Query(req): Query<ElementKey>,
) -> (StatusCode, Json<GetElementResponse>) {
    match service.get_element(&req.collection_name, &req.key) {
        Ok(value) => (
            StatusCode::OK,
            Json(GetElementResponse {
                value: Some(value),
                error: None,
            }),
        ),
        Err(e) => (
            status_of(&e),
            Json(GetElementResponse {
                value: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

// --- Replication inbound ---

pub async fn handle_change(
    Extension(service): Extension<Arc<DatabaseService>>,
    Json(req): Json<HandleChangeRequest>,
) -> (StatusCode, Json<WriteResponse>) {
    let id = req.change.id();
    match service.handle_change(req.change).await {
        Ok(()) => (StatusCode::OK, Json(WriteResponse::committed(id))),
        Err(e) => {
            tracing::error!("Failed to apply replicated change {}: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WriteResponse::failed(e)),
            )
        }
    }
}

pub async fn handle_last_change_id(
    Extension(service): Extension<Arc<DatabaseService>>,
) -> (StatusCode, Json<ChangeId>) {
    (StatusCode::OK, Json(service.last_change_id()))
}
