//! Client handle: submission, join batching, and ack resolution.
//!
//! A client buffers training requests in a [`JoinBuffer`], routes flushed
//! envelopes to the shard owning their input row, and resolves each
//! submission's oneshot once the shard acks the step. All waiters of a
//! merged step resolve together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use gramshard_common::{JoinConfig, ParamIndex, Result, ShardError, StepId};
use gramshard_messages::{
    CbowRequest, Envelope, JoinBuffer, JoinOutcome, Payload, SkipGramRequest, Target,
    TrainingOutcome,
};
use gramshard_routing::ShardRouter;

use crate::transport::Transport;

#[derive(Default)]
struct ClientStats {
    submitted: AtomicU64,
    merged: AtomicU64,
    dispatched: AtomicU64,
    failed: AtomicU64,
}

/// Serializable snapshot of a client's counters.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatsSnapshot {
    pub submitted: u64,
    pub merged: u64,
    pub dispatched: u64,
    pub failed: u64,
}

/// Client-side handle into the cluster.
pub struct TrainingClient {
    transport: Arc<dyn Transport>,
    router: Arc<dyn ShardRouter>,
    join: Mutex<JoinBuffer>,
    pending: Mutex<HashMap<StepId, Vec<oneshot::Sender<TrainingOutcome>>>>,
    stats: ClientStats,
}

impl TrainingClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        router: Arc<dyn ShardRouter>,
        join_config: JoinConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            router,
            join: Mutex::new(JoinBuffer::new(join_config)),
            pending: Mutex::new(HashMap::new()),
            stats: ClientStats::default(),
        })
    }

    /// Consume this client's inbound delivery stream, resolving pending
    /// steps from acks.
    pub fn spawn_ack_loop(
        self: &Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<Envelope>,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(envelope) = inbound.recv().await {
                match envelope.payload {
                    Payload::Ack(ack) => client.resolve(ack.step, ack.outcome),
                    other => {
                        debug!(kind = ?other.kind(), "client ignoring non-ack message");
                    }
                }
            }
        })
    }

    /// Periodically flush batches whose window has elapsed.
    pub fn spawn_flush_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let ready = {
                    let mut join = client.join.lock().expect("join buffer poisoned");
                    join.flush_ready(Instant::now())
                };
                if !ready.is_empty() {
                    client.send_all(ready);
                }
            }
        })
    }

    /// Submit one skip-gram round. The receiver resolves once the owning
    /// shard acks the (possibly merged) step.
    pub fn submit_skip_gram(
        &self,
        request: SkipGramRequest,
    ) -> Result<oneshot::Receiver<TrainingOutcome>> {
        request.validate()?;
        self.submit(Payload::SkipGram(request))
    }

    /// Submit one CBOW round.
    pub fn submit_cbow(&self, request: CbowRequest) -> Result<oneshot::Receiver<TrainingOutcome>> {
        request.validate()?;
        self.submit(Payload::Cbow(request))
    }

    fn submit(&self, payload: Payload) -> Result<oneshot::Receiver<TrainingOutcome>> {
        let envelope = Envelope::new(self.transport.local_endpoint(), Target::None, payload);
        let now = Instant::now();
        let (tx, rx) = oneshot::channel();

        let ready = {
            let mut join = self.join.lock().expect("join buffer poisoned");
            let step = match join.insert(envelope, now)? {
                JoinOutcome::Buffered(step) => step,
                JoinOutcome::Merged { into } => {
                    self.stats.merged.fetch_add(1, Ordering::Relaxed);
                    into
                }
                JoinOutcome::Bypass(envelope) => {
                    // Training payloads always buffer; anything else is
                    // dispatched as-is.
                    let step = envelope.step;
                    self.register_waiter(step, tx);
                    self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                    drop(join);
                    self.send_all(vec![envelope]);
                    return Ok(rx);
                }
            };
            self.register_waiter(step, tx);
            self.stats.submitted.fetch_add(1, Ordering::Relaxed);
            join.flush_ready(now)
        };
        self.send_all(ready);
        Ok(rx)
    }

    /// Flush everything buffered, returning how many envelopes went out.
    pub fn flush(&self) -> usize {
        let drained = {
            let mut join = self.join.lock().expect("join buffer poisoned");
            join.drain()
        };
        self.send_all(drained)
    }

    fn register_waiter(&self, step: StepId, tx: oneshot::Sender<TrainingOutcome>) {
        self.pending
            .lock()
            .expect("pending map poisoned")
            .entry(step)
            .or_default()
            .push(tx);
    }

    fn send_all(&self, envelopes: Vec<Envelope>) -> usize {
        let mut sent = 0;
        for mut envelope in envelopes {
            let step = envelope.step;
            let Some(primary) = primary_index(&envelope.payload) else {
                warn!(%step, kind = ?envelope.kind(), "dropping unroutable payload");
                continue;
            };
            match self.router.route(primary) {
                Ok(dest) => {
                    envelope.target = Target::Shard(dest);
                    match self.transport.send(dest, envelope) {
                        Ok(()) => sent += 1,
                        Err(err) => self.fail_step(step, &err),
                    }
                }
                Err(err) => self.fail_step(step, &err),
            }
        }
        self.stats.dispatched.fetch_add(sent as u64, Ordering::Relaxed);
        sent
    }

    fn fail_step(&self, step: StepId, err: &ShardError) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        warn!(%step, error = %err, "failed to dispatch training request");
        self.resolve(
            step,
            TrainingOutcome::Failed {
                reason: err.to_string(),
            },
        );
    }

    fn resolve(&self, step: StepId, outcome: TrainingOutcome) {
        let waiters = self
            .pending
            .lock()
            .expect("pending map poisoned")
            .remove(&step);
        match waiters {
            Some(waiters) => {
                for tx in waiters {
                    let _ = tx.send(outcome.clone());
                }
            }
            None => debug!(%step, "ack for unknown or already-resolved step"),
        }
    }

    pub fn stats(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            merged: self.stats.merged.load(Ordering::Relaxed),
            dispatched: self.stats.dispatched.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}

/// The index whose owner a training request routes to.
fn primary_index(payload: &Payload) -> Option<ParamIndex> {
    match payload {
        Payload::SkipGram(request) => Some(request.w1),
        Payload::Cbow(request) => Some(request.w1),
        _ => None,
    }
}
