//! Graceful shutdown for a shard node.
//!
//! Once the flag is set, new training requests are rejected with a failure
//! ack; intercom replies keep flowing so in-flight steps can still finish
//! or time out, and the drain loop waits for the in-flight count to reach
//! zero.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Shutdown flag and drain loop.
#[derive(Default)]
pub struct ShutdownCoordinator {
    flag: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn initiate(&self) {
        self.flag.store(true, Ordering::SeqCst);
        info!("shutdown flag set - new training requests will be rejected");
    }

    /// Poll `in_flight` until it reaches zero or `timeout` elapses.
    /// Returns whether everything drained.
    pub async fn drain<F>(&self, in_flight: F, timeout: Duration) -> bool
    where
        F: Fn() -> u64,
    {
        let start = Instant::now();
        let poll = Duration::from_millis(10);
        loop {
            let active = in_flight();
            if active == 0 {
                info!("all in-flight training steps drained");
                return true;
            }
            if start.elapsed() >= timeout {
                warn!(active, "shutdown drain timeout exceeded");
                return false;
            }
            debug!(active, elapsed = ?start.elapsed(), "waiting for in-flight steps");
            tokio::time::sleep(poll).await;
        }
    }
}
