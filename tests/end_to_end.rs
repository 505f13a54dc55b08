//! End-to-end tests running a real discovery service and real storage nodes on ephemeral
//! ports, talking HTTP to each other.

use replicated_kv::client::discovery::DiscoveryClient;
use replicated_kv::config::{
    ChangeLogSettings, DiscoveryNodeSettings, RecoveryPolicy, ServiceSettings,
    StorageNodeSettings,
};
use replicated_kv::discovery::node::DiscoveryNode;
use replicated_kv::discovery::types::NodeRole;
use replicated_kv::storage::node::StorageNode;
use replicated_kv::storage::protocol::{GetElementResponse, WriteResponse};
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

const RPC_TIMEOUT: Duration = Duration::from_secs(1);

async fn start_discovery() -> DiscoveryNode {
    DiscoveryNode::start(DiscoveryNodeSettings {
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        health_check_interval: Duration::from_secs(3600),
        rpc_timeout: RPC_TIMEOUT,
    })
    .await
    .expect("discovery should start")
}

async fn start_storage(dir: &Path, discovery: &DiscoveryNode) -> StorageNode {
    StorageNode::start(StorageNodeSettings {
        service: ServiceSettings {
            name: "127.0.0.1".to_string(),
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        },
        discovery_address: discovery.url(),
        change_log: ChangeLogSettings::in_dir(dir),
        rpc_timeout: RPC_TIMEOUT,
        recovery: RecoveryPolicy {
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(200),
            max_attempts: 10,
        },
        expiry_sweep_interval: Duration::from_secs(10),
    })
    .await
    .expect("storage node should start")
}

fn url(node: &StorageNode) -> String {
    format!("http://{}", node.local_addr)
}

async fn post(
    http: &reqwest::Client,
    url: String,
    body: serde_json::Value,
) -> (u16, WriteResponse) {
    let response = http.post(url).json(&body).send().await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

async fn get_element(
    http: &reqwest::Client,
    node: &StorageNode,
    collection: &str,
    key: &str,
) -> (u16, GetElementResponse) {
    let response = http
        .get(format!("{}/database/element", url(node)))
        .query(&[("collection_name", collection), ("key", key)])
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..150 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_cluster_replicates_recovers_and_drops_dead_replicas() {
    let http = reqwest::Client::new();
    let discovery = start_discovery().await;
    let discovery_client = DiscoveryClient::new(discovery.url(), RPC_TIMEOUT);

    let dir1 = tempfile::tempdir().unwrap();
    let dir2 = tempfile::tempdir().unwrap();
    let dir3 = tempfile::tempdir().unwrap();

    // 1. Two nodes join: the first leads
    let leader = start_storage(dir1.path(), &discovery).await;
    let replica = start_storage(dir2.path(), &discovery).await;

    assert_eq!(leader.role, NodeRole::Leader);
    assert_eq!(leader.service.node_id(), 1);
    assert_eq!(replica.role, NodeRole::Replica);
    assert_eq!(replica.service.node_id(), 2);
    assert_eq!(discovery_client.writing_address().await.unwrap(), url(&leader));
    assert_eq!(discovery_client.reading_address().await.unwrap(), url(&replica));

    // 2. Writes on the leader reach the replica before returning
    let (status, created) = post(
        &http,
        format!("{}/database/collection", url(&leader)),
        json!({ "name": "books" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(created.change_id, Some(1));

    let (status, upserted) = post(
        &http,
        format!("{}/database/element", url(&leader)),
        json!({ "collection_name": "books", "key": "dune", "value": "herbert" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(upserted.change_id, Some(2));

    let (status, read) = get_element(&http, &replica, "books", "dune").await;
    assert_eq!(status, 200);
    assert_eq!(read.value.as_deref(), Some("herbert"));
    assert_eq!(replica.service.last_change_id(), 2);
    assert_eq!(discovery.cluster.view().last_change_id, 2);

    // 3. Client errors map to status codes and consume no id
    let (status, duplicate) = post(
        &http,
        format!("{}/database/collection", url(&leader)),
        json!({ "name": "books" }),
    )
    .await;
    assert_eq!(status, 409);
    assert!(!duplicate.success);
    let (status, _) = get_element(&http, &leader, "books", "missing").await;
    assert_eq!(status, 404);
    assert_eq!(leader.service.last_change_id(), 2);

    // 4. A late joiner is behind and catches up through recovery
    let late = start_storage(dir3.path(), &discovery).await;
    assert_eq!(late.role, NodeRole::Replica);
    let late_id = late.service.node_id();

    let cluster = discovery.cluster.clone();
    let caught_up = eventually(|| {
        let cluster = cluster.clone();
        async move {
            let view = cluster.view();
            view.healthy.iter().any(|node| node.id == late_id)
        }
    })
    .await;
    assert!(caught_up, "Late replica should be promoted to healthy");
    let (_, read) = get_element(&http, &late, "books", "dune").await;
    assert_eq!(read.value.as_deref(), Some("herbert"));
    assert_eq!(late.service.last_change_id(), 2);

    // 5. A replica that disappears is dropped on the next write
    replica.shutdown().await;

    let (status, _) = post(
        &http,
        format!("{}/database/element", url(&leader)),
        json!({ "collection_name": "books", "key": "emma", "value": "austen", "expiry_seconds": 60 }),
    )
    .await;
    assert_eq!(status, 200);

    let replica_set = leader.service.coordinator().snapshot();
    assert!(replica_set.healthy.iter().all(|node| node.id != 2));
    assert!(replica_set.inconsistent.iter().all(|node| node.id != 2));
    let view = discovery.cluster.view();
    assert!(view.healthy.iter().all(|node| node.id != 2));
    assert!(view.inconsistent.iter().all(|node| node.id != 2));
    assert_eq!(view.last_change_id, 3);

    let (_, read) = get_element(&http, &late, "books", "emma").await;
    assert_eq!(read.value.as_deref(), Some("austen"));

    late.shutdown().await;
    leader.shutdown().await;
    discovery.shutdown().await;
}

#[tokio::test]
async fn test_restarted_node_rejoins_with_its_log() {
    let first_discovery = start_discovery().await;
    let dir = tempfile::tempdir().unwrap();

    {
        let node = start_storage(dir.path(), &first_discovery).await;
        node.service.add_collection("books").await.unwrap();
        node.service
            .upsert_element("books", "dune", "herbert", None)
            .await
            .unwrap();
        node.shutdown().await;
    }
    first_discovery.shutdown().await;

    // A fresh discovery has no leader; the restarted node takes the role with its history
    let discovery = start_discovery().await;
    let node = start_storage(dir.path(), &discovery).await;

    assert_eq!(node.role, NodeRole::Leader);
    assert_eq!(node.service.last_change_id(), 2);
    assert_eq!(node.service.get_element("books", "dune").unwrap(), "herbert");
    assert_eq!(discovery.cluster.view().last_change_id, 2);

    node.shutdown().await;
    discovery.shutdown().await;
}
