use super::{read_json, send};
use crate::changelog::types::{ChangeId, DatabaseChange};
use crate::error::PeerError;
use crate::replication::protocol::{
    AddReplicaRequest, ENDPOINT_ADD_REPLICA, ENDPOINT_HANDLE_CHANGE, ENDPOINT_HEALTH_CHECK,
    ENDPOINT_LAST_CHANGE_ID, ENDPOINT_MAKE_LEADER, HandleChangeRequest, MakeNodeLeaderRequest,
};
use std::time::Duration;

/// Client for storage nodes. Calls are single-shot; callers decide how to react to failure.
#[derive(Clone)]
pub struct NodeClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl NodeClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    pub async fn notify_about_change(
        &self,
        address: &str,
        change: &DatabaseChange,
    ) -> Result<(), PeerError> {
        let body = HandleChangeRequest {
            change: change.clone(),
        };
        send(
            self.http
                .post(format!("{}{}", address, ENDPOINT_HANDLE_CHANGE))
                .json(&body)
                .timeout(self.timeout),
        )
        .await?;
        Ok(())
    }

    pub async fn get_last_saved_change_id(&self, address: &str) -> Result<ChangeId, PeerError> {
        let response = send(
            self.http
                .get(format!("{}{}", address, ENDPOINT_LAST_CHANGE_ID))
                .timeout(self.timeout),
        )
        .await?;
        read_json(response).await
    }

    pub async fn make_node_leader(
        &self,
        address: &str,
        request: &MakeNodeLeaderRequest,
    ) -> Result<(), PeerError> {
        send(
            self.http
                .post(format!("{}{}", address, ENDPOINT_MAKE_LEADER))
                .json(request)
                .timeout(self.timeout),
        )
        .await?;
        Ok(())
    }

    pub async fn health_check(&self, address: &str) -> Result<(), PeerError> {
        send(
            self.http
                .get(format!("{}{}", address, ENDPOINT_HEALTH_CHECK))
                .timeout(self.timeout),
        )
        .await?;
        Ok(())
    }

    pub async fn add_replica(
        &self,
        address: &str,
        request: &AddReplicaRequest,
    ) -> Result<(), PeerError> {
        send(
            self.http
                .post(format!("{}{}", address, ENDPOINT_ADD_REPLICA))
                .json(request)
                .timeout(self.timeout),
        )
        .await?;
        Ok(())
    }
}
