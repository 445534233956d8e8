//! Row-partitioned embedding storage
//!
//! The core never performs physical I/O; shards and drivers reach their
//! slice of the embedding matrices through the [`RowStorage`] trait. The
//! provided [`InMemoryStorage`] holds exactly the rows the router assigns
//! to one shard and is what tests and single-process clusters use.
//!
//! Mutual exclusion is *not* this crate's job: the node's row locks
//! serialize writers per row. Storage only guarantees memory safety of
//! concurrent access.

mod memory;

pub use memory::InMemoryStorage;

use gramshard_common::{MatrixKind, ParamIndex, Result};

/// Row-indexed read/update interface over one shard's matrix slice.
pub trait RowStorage: Send + Sync {
    /// Cluster-wide row dimensionality.
    fn dim(&self) -> usize;

    /// Number of input-matrix rows owned by this shard.
    fn owned_rows(&self) -> usize;

    /// Whether this shard owns `row` of `matrix`.
    fn owns(&self, matrix: MatrixKind, row: ParamIndex) -> bool;

    /// Snapshot of one row.
    fn get_row(&self, matrix: MatrixKind, row: ParamIndex) -> Result<Vec<f64>>;

    /// `row += delta`.
    fn update_row(&self, matrix: MatrixKind, row: ParamIndex, delta: &[f64]) -> Result<()>;

    /// Overwrite one row.
    fn set_row(&self, matrix: MatrixKind, row: ParamIndex, values: &[f64]) -> Result<()>;
}
