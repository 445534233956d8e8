//! Deterministic row-to-shard partitioning
//!
//! A router is a pure function from parameter index to owning shard,
//! derived from the cluster configuration and stable for the lifetime of a
//! fixed shard count. Messages referencing several indices fan out to the
//! union of their owners via [`ShardRouter::targets`].

use std::collections::BTreeSet;

use gramshard_common::{ClusterConfig, ParamIndex, Result, ShardError, ShardId};

/// Maps a parameter index to the shard owning its rows.
///
/// Implementations must be pure and deterministic: repeated calls, and
/// calls from different processes sharing the same configuration, return
/// the same shard. Rebalancing is out of scope; a router never reassigns
/// an index once constructed.
pub trait ShardRouter: Send + Sync {
    fn shard_count(&self) -> u16;

    /// Owning shard of `index`, or [`ShardError::RoutingFailure`] when the
    /// index lies outside the vocabulary.
    fn route(&self, index: ParamIndex) -> Result<ShardId>;

    /// Distinct owners of a set of indices, for multi-destination fan-out.
    fn targets(&self, indices: &[ParamIndex]) -> Result<BTreeSet<ShardId>> {
        let mut out = BTreeSet::new();
        for &index in indices {
            out.insert(self.route(index)?);
        }
        Ok(out)
    }
}

/// Interleaved partitioning: `index % shard_count`. The cluster default -
/// spreads adjacent (frequent, low-numbered) vocabulary rows evenly.
#[derive(Debug, Clone)]
pub struct InterleavedRouter {
    shards: u16,
    vocab: u32,
}

impl InterleavedRouter {
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shards: config.shard_count,
            vocab: config.vocab_size,
        })
    }
}

impl ShardRouter for InterleavedRouter {
    fn shard_count(&self) -> u16 {
        self.shards
    }

    fn route(&self, index: ParamIndex) -> Result<ShardId> {
        if index >= self.vocab {
            return Err(ShardError::RoutingFailure {
                index,
                vocab: self.vocab,
                shards: self.shards,
            });
        }
        Ok((index % u32::from(self.shards)) as ShardId)
    }
}

/// Range partitioning: contiguous blocks of `ceil(vocab / shards)` rows.
#[derive(Debug, Clone)]
pub struct RangeRouter {
    shards: u16,
    vocab: u32,
    rows_per_shard: u32,
}

impl RangeRouter {
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        config.validate()?;
        let shards = u32::from(config.shard_count);
        let rows_per_shard = config.vocab_size.div_ceil(shards);
        Ok(Self {
            shards: config.shard_count,
            vocab: config.vocab_size,
            rows_per_shard,
        })
    }
}

impl ShardRouter for RangeRouter {
    fn shard_count(&self) -> u16 {
        self.shards
    }

    fn route(&self, index: ParamIndex) -> Result<ShardId> {
        if index >= self.vocab {
            return Err(ShardError::RoutingFailure {
                index,
                vocab: self.vocab,
                shards: self.shards,
            });
        }
        Ok((index / self.rows_per_shard) as ShardId)
    }
}
