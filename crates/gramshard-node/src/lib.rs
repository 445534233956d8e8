//! Per-shard runtime for the GramShard parameter server
//!
//! This crate assembles the pieces one shard runs: the transport seam and
//! in-process loopback network, the inbound dispatcher with its per-row
//! lock discipline, the kind→driver dispatch table with the skip-gram and
//! CBOW drivers, the intercom aggregation protocol, graceful shutdown,
//! and the client handle.

pub mod aggregator;
pub mod client;
pub mod dispatch;
pub mod drivers;
pub mod node;
pub mod row_locks;
pub mod sampling;
pub mod shutdown;
pub mod transport;

pub use aggregator::Aggregator;
pub use client::{ClientStatsSnapshot, TrainingClient};
pub use dispatch::{DriverRegistry, TrainingDriver};
pub use drivers::{CbowDriver, SkipGramDriver};
pub use node::{NodeStatsSnapshot, ShardNode};
pub use row_locks::{RowClaim, RowGuard, RowKey, RowLocks};
pub use sampling::NegativeSampler;
pub use shutdown::ShutdownCoordinator;
pub use transport::{LocalEndpoint, LoopbackNetwork, Transport};
