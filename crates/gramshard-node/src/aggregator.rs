//! Fan-in of intercom partial results.
//!
//! A driver registers the number of partials it expects before sending its
//! sub-requests, then awaits completion under the aggregation deadline.
//! Partials arrive in any order; the fold is a plain collection keyed by
//! sequence position, so it is associative and commutative. Exactly one
//! finalization happens per step: duplicates and partials for unknown or
//! already-finalized steps are discarded with a debug log, never applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use gramshard_common::{Result, ShardError, StepId};
use gramshard_messages::PartialDot;

struct PendingStep {
    expected: usize,
    received: Vec<PartialDot>,
    tx: oneshot::Sender<Vec<PartialDot>>,
}

/// Pending-step table for one shard.
#[derive(Default)]
pub struct Aggregator {
    pending: Mutex<HashMap<StepId, PendingStep>>,
    discarded: AtomicU64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step expecting `expected` partials. Must be called
    /// before the first sub-request is sent, so a fast reply cannot race
    /// the registration.
    pub fn register(&self, step: StepId, expected: usize) -> oneshot::Receiver<Vec<PartialDot>> {
        let (tx, rx) = oneshot::channel();
        if expected == 0 {
            // Nothing to wait for; complete the wave immediately.
            let _ = tx.send(Vec::new());
            return rx;
        }
        let mut pending = self.pending.lock().expect("aggregator poisoned");
        let previous = pending.insert(
            step,
            PendingStep {
                expected,
                received: Vec::with_capacity(expected),
                tx,
            },
        );
        if previous.is_some() {
            // A step registers one wave at a time; the arrival of a second
            // registration with the first still pending is a driver bug.
            warn!(%step, "replaced a pending aggregation wave");
        }
        rx
    }

    /// Fold one partial in. Returns `false` when the partial was discarded
    /// (unknown step, finalized step, or duplicate sequence position).
    pub fn accept(&self, partial: PartialDot) -> bool {
        let mut pending = self.pending.lock().expect("aggregator poisoned");
        let Some(entry) = pending.get_mut(&partial.step) else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(step = %partial.step, seq = partial.seq, "discarded partial for unknown or finalized step");
            return false;
        };
        if entry.received.iter().any(|p| p.seq == partial.seq) {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(step = %partial.step, seq = partial.seq, "discarded duplicate partial");
            return false;
        }
        let step = partial.step;
        entry.received.push(partial);
        if entry.received.len() >= entry.expected {
            let entry = pending.remove(&step).expect("entry present");
            // The waiter may have timed out concurrently; dropping the
            // collected partials is then the correct outcome.
            let _ = entry.tx.send(entry.received);
        }
        true
    }

    /// Drop a pending step, returning how many partials had arrived.
    pub fn abandon(&self, step: StepId) -> Option<usize> {
        self.pending
            .lock()
            .expect("aggregator poisoned")
            .remove(&step)
            .map(|entry| entry.received.len())
    }

    /// Await a registered wave under the aggregation deadline.
    pub async fn collect(
        &self,
        step: StepId,
        expected: usize,
        rx: oneshot::Receiver<Vec<PartialDot>>,
        deadline: Duration,
    ) -> Result<Vec<PartialDot>> {
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(partials)) => Ok(partials),
            Ok(Err(_)) => {
                // Registration was replaced or abandoned underneath us.
                Err(ShardError::PartialTimeout {
                    step,
                    expected,
                    missing: expected,
                })
            }
            Err(_) => {
                let received = self.abandon(step).unwrap_or(0);
                warn!(%step, expected, received, "aggregation deadline elapsed, abandoning step");
                Err(ShardError::PartialTimeout {
                    step,
                    expected,
                    missing: expected.saturating_sub(received),
                })
            }
        }
    }

    /// Steps currently awaiting partials.
    pub fn outstanding(&self) -> usize {
        self.pending.lock().expect("aggregator poisoned").len()
    }

    /// Partials discarded as duplicate or late since creation.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}
