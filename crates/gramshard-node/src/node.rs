//! Per-shard runtime: ingress validation, lock claiming, step dispatch,
//! and intercom serving.
//!
//! The dispatcher consumes the inbound delivery stream one envelope at a
//! time. Training requests are validated, their local rows claimed in
//! arrival order, and the step spawned onto the runtime; intercom
//! requests are served under the addressed row's lock; replies feed the
//! aggregator. Per-row FIFO follows from the synchronous claim, and a
//! parked step never blocks the dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gramshard_common::{
    ClusterConfig, EndpointId, MessageKind, Result, ShardId, StepId,
};
use gramshard_kernels::KernelManager;
use gramshard_messages::{Ack, Envelope, PartialDot, Payload, Target, TrainingOutcome};
use gramshard_routing::ShardRouter;
use gramshard_storage::RowStorage;

use crate::aggregator::Aggregator;
use crate::dispatch::DriverRegistry;
use crate::drivers::{CbowDriver, SkipGramDriver};
use crate::row_locks::RowLocks;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::Transport;

/// Lifetime counters of one shard node.
#[derive(Default)]
pub struct NodeStats {
    steps_started: AtomicU64,
    steps_completed: AtomicU64,
    steps_failed: AtomicU64,
    rejected_malformed: AtomicU64,
    partials_served: AtomicU64,
    deltas_applied: AtomicU64,
    in_flight: AtomicU64,
}

impl NodeStats {
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }
}

/// Serializable snapshot of [`NodeStats`].
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatsSnapshot {
    pub steps_started: u64,
    pub steps_completed: u64,
    pub steps_failed: u64,
    pub rejected_malformed: u64,
    pub partials_served: u64,
    pub deltas_applied: u64,
    pub duplicates_discarded: u64,
    pub in_flight: u64,
    pub outstanding_aggregations: usize,
}

/// One shard of the cluster.
pub struct ShardNode {
    shard: ShardId,
    config: ClusterConfig,
    storage: Arc<dyn RowStorage>,
    kernels: Arc<KernelManager>,
    router: Arc<dyn ShardRouter>,
    transport: Arc<dyn Transport>,
    aggregator: Arc<Aggregator>,
    locks: RowLocks,
    registry: DriverRegistry,
    stats: NodeStats,
    shutdown: ShutdownCoordinator,
}

impl ShardNode {
    /// Assemble a node: kernels, aggregator, row locks, and the driver
    /// table, every driver built with its collaborators injected here.
    pub fn new(
        shard: ShardId,
        config: ClusterConfig,
        storage: Arc<dyn RowStorage>,
        router: Arc<dyn ShardRouter>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let kernels = Arc::new(KernelManager::new());
        let aggregator = Arc::new(Aggregator::new());
        let registry = DriverRegistry::new()
            .with(Arc::new(SkipGramDriver::new(
                shard,
                config.clone(),
                Arc::clone(&storage),
                Arc::clone(&kernels),
                Arc::clone(&router),
                Arc::clone(&transport),
                Arc::clone(&aggregator),
            )))
            .with(Arc::new(CbowDriver::new(
                shard,
                config.clone(),
                Arc::clone(&storage),
                Arc::clone(&kernels),
                Arc::clone(&router),
                Arc::clone(&transport),
                Arc::clone(&aggregator),
            )));
        Ok(Arc::new(Self {
            shard,
            config,
            storage,
            kernels,
            router,
            transport,
            aggregator,
            locks: RowLocks::new(),
            registry,
            stats: NodeStats::default(),
            shutdown: ShutdownCoordinator::new(),
        }))
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Spawn the inbound dispatcher.
    pub fn spawn(self: &Arc<Self>, mut inbound: mpsc::UnboundedReceiver<Envelope>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                shard = node.shard,
                kinds = ?node.registry.kinds(),
                rows = node.storage.owned_rows(),
                "shard node started"
            );
            while let Some(envelope) = inbound.recv().await {
                node.handle(envelope);
            }
            debug!(shard = node.shard, "inbound stream closed, dispatcher exiting");
        })
    }

    /// Route one inbound envelope. Runs on the dispatcher; row-lock claims
    /// happen here, synchronously, so per-row execution follows arrival
    /// order.
    fn handle(self: &Arc<Self>, envelope: Envelope) {
        match envelope.kind() {
            MessageKind::SkipGram | MessageKind::Cbow => self.handle_training(envelope),
            MessageKind::DotRequest => self.handle_dot(envelope),
            MessageKind::RowRequest => self.handle_row(envelope),
            MessageKind::DeltaPush => self.handle_delta(envelope),
            MessageKind::DotReply | MessageKind::RowReply => match envelope.payload {
                Payload::DotReply(partial) | Payload::RowReply(partial) => {
                    self.aggregator.accept(partial);
                }
                _ => {}
            },
            MessageKind::Ack => {
                warn!(shard = self.shard, step = %envelope.step, "unexpected ack on a shard endpoint");
            }
        }
    }

    fn handle_training(self: &Arc<Self>, envelope: Envelope) {
        let origin = envelope.origin;
        let step = envelope.step;

        if self.shutdown.is_shutting_down() {
            self.ack(
                origin,
                step,
                TrainingOutcome::Failed {
                    reason: "shard is shutting down".into(),
                },
            );
            return;
        }

        // Structural and routing invariants, checked before dispatch.
        if let Err(err) = self.validate(&envelope.payload) {
            self.stats.rejected_malformed.fetch_add(1, Ordering::Relaxed);
            warn!(shard = self.shard, %step, error = %err, "rejected training request at ingress");
            self.ack(
                origin,
                step,
                TrainingOutcome::Failed {
                    reason: err.to_string(),
                },
            );
            return;
        }

        let driver = match self.registry.get(envelope.kind()) {
            Ok(driver) => driver,
            Err(err) => {
                warn!(shard = self.shard, %step, error = %err, "no driver for training request");
                self.ack(
                    origin,
                    step,
                    TrainingOutcome::Failed {
                        reason: err.to_string(),
                    },
                );
                return;
            }
        };
        let keys = match driver.rows_to_lock(&envelope.payload) {
            Ok(keys) => keys,
            Err(err) => {
                self.ack(
                    origin,
                    step,
                    TrainingOutcome::Failed {
                        reason: err.to_string(),
                    },
                );
                return;
            }
        };

        let claim = self.locks.claim(&keys);
        self.stats.steps_started.fetch_add(1, Ordering::Relaxed);
        self.stats.in_flight.fetch_add(1, Ordering::Relaxed);
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let guards = claim.acquire().await;
            match driver.process(envelope, guards).await {
                Ok(()) => {
                    node.stats.steps_completed.fetch_add(1, Ordering::Relaxed);
                    node.ack(origin, step, TrainingOutcome::Applied);
                }
                Err(err) => {
                    node.stats.steps_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(shard = node.shard, %step, error = %err, "training step failed");
                    node.ack(
                        origin,
                        step,
                        TrainingOutcome::Failed {
                            reason: err.to_string(),
                        },
                    );
                }
            }
            node.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
        });
    }

    fn validate(&self, payload: &Payload) -> Result<()> {
        match payload {
            Payload::SkipGram(request) => {
                request.validate()?;
                for index in request.referenced_indices() {
                    self.router.route(index)?;
                }
                Ok(())
            }
            Payload::Cbow(request) => {
                request.validate()?;
                for index in request.referenced_indices() {
                    self.router.route(index)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn handle_dot(self: &Arc<Self>, envelope: Envelope) {
        let origin = envelope.origin;
        let Payload::DotRequest(request) = envelope.payload else {
            return;
        };
        let claim = self.locks.claim_one((request.matrix, request.row));
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let _guards = claim.acquire().await;
            let row = match node.storage.get_row(request.matrix, request.row) {
                Ok(row) => row,
                Err(err) => {
                    warn!(shard = node.shard, step = %request.step, error = %err, "dot request for unavailable row");
                    return;
                }
            };
            let value = match node.kernels.select().dot(&request.operand, &row) {
                Ok(value) => value,
                Err(err) => {
                    warn!(shard = node.shard, step = %request.step, error = %err, "dot request with mismatched operand");
                    return;
                }
            };
            node.stats.partials_served.fetch_add(1, Ordering::Relaxed);
            let reply = Envelope::for_step(
                request.step,
                node.transport.local_endpoint(),
                Target::Shard(origin),
                Payload::DotReply(PartialDot {
                    step: request.step,
                    seq: request.seq,
                    value,
                    row,
                }),
            );
            if let Err(err) = node.transport.send(origin, reply) {
                warn!(shard = node.shard, step = %request.step, error = %err, "failed to return dot partial");
            }
        });
    }

    fn handle_row(self: &Arc<Self>, envelope: Envelope) {
        let origin = envelope.origin;
        let Payload::RowRequest(request) = envelope.payload else {
            return;
        };
        let claim = self.locks.claim_one((request.matrix, request.row));
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let _guards = claim.acquire().await;
            let row = match node.storage.get_row(request.matrix, request.row) {
                Ok(row) => row,
                Err(err) => {
                    warn!(shard = node.shard, step = %request.step, error = %err, "row request for unavailable row");
                    return;
                }
            };
            node.stats.partials_served.fetch_add(1, Ordering::Relaxed);
            let reply = Envelope::for_step(
                request.step,
                node.transport.local_endpoint(),
                Target::Shard(origin),
                Payload::RowReply(PartialDot {
                    step: request.step,
                    seq: request.seq,
                    value: 0.0,
                    row,
                }),
            );
            if let Err(err) = node.transport.send(origin, reply) {
                warn!(shard = node.shard, step = %request.step, error = %err, "failed to return row partial");
            }
        });
    }

    fn handle_delta(self: &Arc<Self>, envelope: Envelope) {
        let Payload::DeltaPush(push) = envelope.payload else {
            return;
        };
        let claim = self.locks.claim_one((push.matrix, push.row));
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let _guards = claim.acquire().await;
            match node.storage.update_row(push.matrix, push.row, &push.delta) {
                Ok(()) => {
                    node.stats.deltas_applied.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    warn!(shard = node.shard, step = %push.step, error = %err, "discarded delta for unavailable row");
                }
            }
        });
    }

    fn ack(&self, origin: EndpointId, step: StepId, outcome: TrainingOutcome) {
        let envelope = Envelope::for_step(
            step,
            self.transport.local_endpoint(),
            Target::None,
            Payload::Ack(Ack { step, outcome }),
        );
        if let Err(err) = self.transport.send(origin, envelope) {
            warn!(shard = self.shard, %step, error = %err, "failed to deliver ack");
        }
    }

    /// Reject new training requests; in-flight steps and intercom traffic
    /// continue until drained.
    pub fn begin_shutdown(&self) {
        self.shutdown.initiate();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    /// Wait for in-flight steps to finish, up to `timeout`. Returns
    /// whether the node fully drained.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.shutdown
            .drain(|| self.stats.in_flight(), timeout)
            .await
    }

    /// Snapshot of the node's counters.
    pub fn stats(&self) -> NodeStatsSnapshot {
        NodeStatsSnapshot {
            steps_started: self.stats.steps_started.load(Ordering::Relaxed),
            steps_completed: self.stats.steps_completed.load(Ordering::Relaxed),
            steps_failed: self.stats.steps_failed.load(Ordering::Relaxed),
            rejected_malformed: self.stats.rejected_malformed.load(Ordering::Relaxed),
            partials_served: self.stats.partials_served.load(Ordering::Relaxed),
            deltas_applied: self.stats.deltas_applied.load(Ordering::Relaxed),
            duplicates_discarded: self.aggregator.discarded(),
            in_flight: self.stats.in_flight(),
            outstanding_aggregations: self.aggregator.outstanding(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackNetwork;
    use gramshard_routing::InterleavedRouter;
    use gramshard_storage::InMemoryStorage;

    #[test]
    fn fresh_node_reports_zeroed_stats() {
        let config = ClusterConfig {
            shard_count: 1,
            vector_dim: 4,
            vocab_size: 4,
            ..Default::default()
        };
        let network = LoopbackNetwork::new();
        let router = Arc::new(InterleavedRouter::new(&config).unwrap());
        let storage =
            Arc::new(InMemoryStorage::allocate(0, &config, router.as_ref()).unwrap());
        let (endpoint, _inbound) = network.attach(0);
        let node = ShardNode::new(0, config, storage, router, endpoint).unwrap();
        assert_eq!(node.shard(), 0);
        assert_eq!(node.config().shard_count, 1);
        assert!(!node.is_shutting_down());

        let stats = node.stats();
        assert_eq!(stats.steps_started, 0);
        assert_eq!(stats.in_flight, 0);
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("steps_completed"));
    }
}
