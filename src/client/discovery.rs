use super::{Retry, read_json, send, send_with_retry};
use crate::discovery::protocol::{
    AddressResponse, ENDPOINT_INCREMENT_CHANGES_COUNTER, ENDPOINT_MAKE_REPLICA_HEALTHY,
    ENDPOINT_MAKE_REPLICA_INCONSISTENT, ENDPOINT_READING_ADDRESS, ENDPOINT_REGISTER,
    ENDPOINT_REPLICA, ENDPOINT_WRITING_ADDRESS, RegistrationRequest, RegistrationResponse,
};
use crate::error::PeerError;
use crate::replication::types::NodeId;
use std::time::Duration;

/// Registration is retried while discovery is still starting up. Each accepted
/// registration allocates a node id, so only refused connections are retried.
const REGISTER_ATTEMPTS: usize = 5;
/// State notifications are best effort; the leader keeps going if they fail.
const NOTIFY_ATTEMPTS: usize = 3;

/// Client for the discovery service at a fixed base URL.
#[derive(Clone)]
pub struct DiscoveryClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl DiscoveryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationResponse, PeerError> {
        let url = self.url(ENDPOINT_REGISTER);
        let response = send_with_retry(
            || self.http.post(&url).json(request).timeout(self.timeout),
            REGISTER_ATTEMPTS,
            Retry::ConnectFailure,
        )
        .await?;
        read_json(response).await
    }

    pub async fn increment_changes_counter(&self) -> Result<(), PeerError> {
        let url = self.url(ENDPOINT_INCREMENT_CHANGES_COUNTER);
        send_with_retry(
            || self.http.put(&url).timeout(self.timeout),
            NOTIFY_ATTEMPTS,
            Retry::ConnectFailure,
        )
        .await?;
        Ok(())
    }

    pub async fn make_replica_inconsistent(&self, id: NodeId) -> Result<(), PeerError> {
        let url = format!("{}/{}", self.url(ENDPOINT_MAKE_REPLICA_INCONSISTENT), id);
        send_with_retry(
            || self.http.put(&url).timeout(self.timeout),
            NOTIFY_ATTEMPTS,
            Retry::Unreachable,
        )
        .await?;
        Ok(())
    }

    pub async fn make_replica_healthy(&self, id: NodeId) -> Result<(), PeerError> {
        let url = format!("{}/{}", self.url(ENDPOINT_MAKE_REPLICA_HEALTHY), id);
        send_with_retry(
            || self.http.put(&url).timeout(self.timeout),
            NOTIFY_ATTEMPTS,
            Retry::Unreachable,
        )
        .await?;
        Ok(())
    }

    pub async fn delete_unavailable_replica(&self, id: NodeId) -> Result<(), PeerError> {
        let url = format!("{}/{}", self.url(ENDPOINT_REPLICA), id);
        send_with_retry(
            || self.http.delete(&url).timeout(self.timeout),
            NOTIFY_ATTEMPTS,
            Retry::Unreachable,
        )
        .await?;
        Ok(())
    }

    /// Address of the next node to read from. Empty when no leader is known.
    pub async fn reading_address(&self) -> Result<String, PeerError> {
        let response = send(
            self.http
                .get(self.url(ENDPOINT_READING_ADDRESS))
                .timeout(self.timeout),
        )
        .await?;
        Ok(read_json::<AddressResponse>(response).await?.address)
    }

    pub async fn writing_address(&self) -> Result<String, PeerError> {
        let response = send(
            self.http
                .get(self.url(ENDPOINT_WRITING_ADDRESS))
                .timeout(self.timeout),
        )
        .await?;
        Ok(read_json::<AddressResponse>(response).await?.address)
    }
}
