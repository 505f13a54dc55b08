//! # RPC Clients
//!
//! Typed HTTP clients for the two peer kinds a node talks to.
//!
//! ## Core Concepts
//! - **NodeClient**: Used by the leader (replication fan-out, recovery) and by the discovery
//!   service (health checks, elections) to reach storage nodes.
//! - **DiscoveryClient**: Used by storage nodes to register and to mirror replica-state
//!   transitions into the discovery service.
//!
//! ## Failure Classification
//! Every call resolves to one of three outcomes, which drive all replica-set transitions:
//! - `Ok` - the peer answered 2xx with a decodable body.
//! - [`PeerError::Unhealthy`] - the peer answered, but with a non-2xx status or a body
//!   that could not be decoded. The peer is alive and can be retried later.
//! - [`PeerError::Unavailable`] - no usable answer (connect failure, reset, timeout).
//!   The peer is treated as gone.

pub mod discovery;
pub mod node;


use crate::error::PeerError;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Sends `request` and classifies the outcome.
pub(crate) async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response, PeerError> {
    let response = request
        .send()
        .await
        .map_err(|e| PeerError::Unavailable(e.to_string()))?;
    check_status(response).await
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PeerError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(PeerError::Unhealthy {
            status: status.as_u16(),
            message,
        });
    }

    Ok(response)
}

/// Decodes a successful response body.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, PeerError> {
    let status = response.status().as_u16();
    response.json::<T>().await.map_err(|e| {
        if e.is_decode() {
            PeerError::Unhealthy {
                status,
                message: format!("invalid response body: {}", e),
            }
        } else {
            PeerError::Unavailable(e.to_string())
        }
    })
}

/// Which transport failures a request may be re-sent after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retry {
    /// Any failure to get an answer. Only for requests that are safe to repeat.
    Unreachable,
    /// Only failures to connect, where the request cannot have reached the peer.
    ConnectFailure,
}

impl Retry {
    fn allows(self, error: &reqwest::Error) -> bool {
        match self {
            Retry::Unreachable => true,
            Retry::ConnectFailure => error.is_connect(),
        }
    }
}

/// Re-sends while the peer is unreachable, with capped exponential backoff and jitter.
///
/// Only transport failures permitted by `retry` are re-sent; an `Unhealthy` answer is
/// returned at once.
pub(crate) async fn send_with_retry<F>(
    build: F,
    attempts: usize,
    retry: Retry,
) -> Result<reqwest::Response, PeerError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut delay_ms = 150u64;

    for attempt in 0..attempts {
        match build().send().await {
            Ok(response) => return check_status(response).await,
            Err(e) if attempt + 1 < attempts && retry.allows(&e) => {
                tracing::debug!("Attempt {} failed ({}), retrying in {}ms", attempt + 1, e, delay_ms);
                let jitter = rand::random::<u64>() % 50;
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(1200);
            }
            Err(e) => return Err(PeerError::Unavailable(e.to_string())),
        }
    }

    Err(PeerError::Unavailable("retry attempts exhausted".to_string()))
}
