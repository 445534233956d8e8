//! Fair per-row exclusive locks.
//!
//! Training steps serialize per embedding row: messages addressed to the
//! same row apply in dispatch order, while different rows proceed
//! concurrently. [`RowLocks::claim`] registers a claim synchronously -
//! that registration fixes the step's FIFO position - and the returned
//! [`RowClaim`] is awaited later, off the dispatcher, until every row is
//! granted.
//!
//! Multi-row claims are atomic: the registry lock is held while every row
//! of one claim enqueues, so two overlapping claims are totally ordered
//! and cannot deadlock locally.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use gramshard_common::{MatrixKind, ParamIndex};

/// Key of one lockable row.
pub type RowKey = (MatrixKind, ParamIndex);

#[derive(Default)]
struct RowState {
    held: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

#[derive(Default)]
struct Registry {
    rows: HashMap<RowKey, RowState>,
}

impl Registry {
    fn release(&mut self, key: RowKey) {
        let Some(state) = self.rows.get_mut(&key) else {
            return;
        };
        while let Some(tx) = state.waiters.pop_front() {
            if tx.send(()).is_ok() {
                // Ownership handed to the next claimant in queue order;
                // `held` stays set. A failed send means that claimant was
                // cancelled - try the next one.
                return;
            }
        }
        self.rows.remove(&key);
    }
}

/// Fair, async, per-row exclusive locks.
#[derive(Clone, Default)]
pub struct RowLocks {
    registry: Arc<Mutex<Registry>>,
}

impl RowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a set of rows (deduplicated). The claim is enqueued
    /// atomically and in call order; await [`RowClaim::acquire`] for the
    /// guards.
    pub fn claim(&self, keys: &[RowKey]) -> RowClaim {
        let mut sorted: Vec<RowKey> = keys.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut registry = self.registry.lock().expect("lock registry poisoned");
        let tickets = sorted
            .into_iter()
            .map(|key| {
                let state = registry.rows.entry(key).or_default();
                let rx = if state.held {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Some(rx)
                } else {
                    state.held = true;
                    None
                };
                Ticket {
                    key,
                    rx,
                    granted: false,
                    converted: false,
                    locks: self.clone(),
                }
            })
            .collect();
        RowClaim { tickets }
    }

    /// Convenience single-row claim.
    pub fn claim_one(&self, key: RowKey) -> RowClaim {
        self.claim(&[key])
    }

    fn release(&self, key: RowKey) {
        self.registry
            .lock()
            .expect("lock registry poisoned")
            .release(key);
    }

    /// Rows currently held or contended. Test instrumentation.
    pub fn active_rows(&self) -> usize {
        self.registry
            .lock()
            .expect("lock registry poisoned")
            .rows
            .len()
    }
}

struct Ticket {
    key: RowKey,
    /// `None` when the row was free at claim time (granted immediately).
    rx: Option<oneshot::Receiver<()>>,
    granted: bool,
    converted: bool,
    locks: RowLocks,
}

impl Ticket {
    async fn wait(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            // The sender is only dropped if the registry itself goes away;
            // either way there is nothing left to contend with.
            let _ = rx.await;
            self.rx = None;
        }
        self.granted = true;
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.converted {
            return;
        }
        if self.granted {
            self.locks.release(self.key);
            return;
        }
        match self.rx.take() {
            // Granted at claim time but the claim was dropped unacquired.
            None => self.locks.release(self.key),
            Some(mut rx) => {
                // Race: the grant may have landed between cancellation and
                // this drop. If it did, pass the lock on.
                if rx.try_recv().is_ok() {
                    self.locks.release(self.key);
                }
            }
        }
    }
}

/// A registered claim over a set of rows.
pub struct RowClaim {
    tickets: Vec<Ticket>,
}

impl RowClaim {
    /// Wait until every claimed row is granted. Dropping the returned
    /// guards (in any order, including on a failure path) releases the
    /// rows immediately.
    pub async fn acquire(mut self) -> Vec<RowGuard> {
        for ticket in &mut self.tickets {
            ticket.wait().await;
        }
        self.tickets
            .drain(..)
            .map(|mut ticket| {
                ticket.converted = true;
                RowGuard {
                    key: ticket.key,
                    locks: ticket.locks.clone(),
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

/// Exclusive hold over one row; releases on drop.
pub struct RowGuard {
    key: RowKey,
    locks: RowLocks,
}

impl RowGuard {
    pub fn key(&self) -> RowKey {
        self.key
    }
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        self.locks.release(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gramshard_common::MatrixKind;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    const ROW: RowKey = (MatrixKind::Input, 7);

    #[tokio::test]
    async fn exclusive_until_released() {
        let locks = RowLocks::new();
        let guards = locks.claim_one(ROW).acquire().await;
        let second = locks.claim_one(ROW);
        let pending = tokio::spawn(second.acquire());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished(), "second claim must wait");
        drop(guards);
        let got = tokio::time::timeout(Duration::from_millis(100), pending)
            .await
            .expect("second claim should acquire after release")
            .unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn grants_follow_claim_order() {
        let locks = RowLocks::new();
        let holder = locks.claim_one(ROW).acquire().await;
        let order = Arc::new(Mutex::new(Vec::new()));

        // Claims registered 0, 1, 2 while the row is held.
        let mut handles = Vec::new();
        for i in 0..3u32 {
            let claim = locks.claim_one(ROW);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _guards = claim.acquire().await;
                order.lock().unwrap().push(i);
            }));
        }
        drop(holder);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn overlapping_multi_row_claims_do_not_deadlock() {
        let locks = RowLocks::new();
        let a: RowKey = (MatrixKind::HsOutput, 1);
        let b: RowKey = (MatrixKind::HsOutput, 2);
        let c: RowKey = (MatrixKind::HsOutput, 3);
        let mut handles = Vec::new();
        for keys in [vec![a, b], vec![b, c], vec![c, a]] {
            let claim = locks.claim(&keys);
            handles.push(tokio::spawn(async move {
                let guards = claim.acquire().await;
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(guards);
            }));
        }
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("claims must all complete")
                .unwrap();
        }
        assert_eq!(locks.active_rows(), 0);
    }

    #[tokio::test]
    async fn critical_sections_never_overlap() {
        // The single-writer invariant: concurrent steps on one row never
        // run their read-modify-write at the same time.
        let locks = RowLocks::new();
        let in_section = Arc::new(AtomicU64::new(0));
        let overlaps = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::new();
        for _ in 0..64 {
            let claim = locks.claim_one(ROW);
            let in_section = Arc::clone(&in_section);
            let overlaps = Arc::clone(&overlaps);
            handles.push(tokio::spawn(async move {
                let _guards = claim.acquire().await;
                if in_section.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
                in_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropped_claim_releases_immediately() {
        let locks = RowLocks::new();
        let claim = locks.claim_one(ROW);
        drop(claim);
        assert_eq!(locks.active_rows(), 0);
        // Row is claimable again without waiting.
        let guards = tokio::time::timeout(
            Duration::from_millis(100),
            locks.claim_one(ROW).acquire(),
        )
        .await
        .expect("row must be free after dropped claim");
        assert_eq!(guards.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_keys_collapse_to_one_guard() {
        let locks = RowLocks::new();
        let guards = locks.claim(&[ROW, ROW]).acquire().await;
        assert_eq!(guards.len(), 1);
    }

    #[tokio::test]
    async fn empty_claim_is_trivially_granted() {
        let locks = RowLocks::new();
        let guards = locks.claim(&[]).acquire().await;
        assert!(guards.is_empty());
    }
}
