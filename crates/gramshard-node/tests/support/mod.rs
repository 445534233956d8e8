//! Shared fixtures: a single-process cluster over the loopback network.
#![allow(dead_code)] // each test binary uses a different slice of this module

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use gramshard_common::{ClusterConfig, ShardId, CLIENT_ENDPOINT_BASE};
use gramshard_messages::Envelope;
use gramshard_node::{LoopbackNetwork, ShardNode, TrainingClient};
use gramshard_routing::InterleavedRouter;
use gramshard_storage::InMemoryStorage;

pub struct TestCluster {
    pub config: ClusterConfig,
    pub network: Arc<LoopbackNetwork>,
    pub router: Arc<InterleavedRouter>,
    pub storages: Vec<Arc<InMemoryStorage>>,
    pub nodes: Vec<Arc<ShardNode>>,
    pub client: Arc<TrainingClient>,
    /// Inbound streams of shards deliberately left unspawned (messages
    /// accumulate, nothing replies).
    pub dead_inboxes: Vec<mpsc::UnboundedReceiver<Envelope>>,
}

/// Assemble a cluster; shards listed in `dead` are attached to the
/// network but never process a message.
pub fn build_cluster(config: ClusterConfig, dead: &[ShardId]) -> TestCluster {
    config.validate().expect("test config must validate");
    let network = LoopbackNetwork::new();
    let router = Arc::new(InterleavedRouter::new(&config).expect("router"));

    let mut storages = Vec::new();
    let mut nodes = Vec::new();
    let mut dead_inboxes = Vec::new();
    for shard in 0..config.shard_count {
        let storage = Arc::new(
            InMemoryStorage::allocate(shard, &config, router.as_ref()).expect("storage"),
        );
        let (endpoint, inbound) = network.attach(shard);
        let storage_dyn: Arc<dyn gramshard_storage::RowStorage> = storage.clone();
        let router_dyn: Arc<dyn gramshard_routing::ShardRouter> = router.clone();
        let transport_dyn: Arc<dyn gramshard_node::Transport> = endpoint;
        let node = ShardNode::new(shard, config.clone(), storage_dyn, router_dyn, transport_dyn)
            .expect("node");
        if dead.contains(&shard) {
            dead_inboxes.push(inbound);
        } else {
            node.spawn(inbound);
        }
        storages.push(storage);
        nodes.push(node);
    }

    let (endpoint, inbound) = network.attach(CLIENT_ENDPOINT_BASE);
    let transport_dyn: Arc<dyn gramshard_node::Transport> = endpoint;
    let router_dyn: Arc<dyn gramshard_routing::ShardRouter> = router.clone();
    let client = TrainingClient::new(transport_dyn, router_dyn, config.join.clone());
    client.spawn_ack_loop(inbound);

    TestCluster {
        config,
        network,
        router,
        storages,
        nodes,
        client,
        dead_inboxes,
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn assert_rows_close(actual: &[f64], expected: &[f64], tolerance: f64) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "component {i}: got {a}, want {e}"
        );
    }
}
