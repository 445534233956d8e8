//! Cluster configuration with environment variable support.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShardError};

/// Batching window for the join/merge layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Maximum number of distinct buffered targets before a forced flush.
    pub max_pending: usize,
    /// Maximum number of siblings absorbed into one message before that
    /// entry is flushed on its own.
    pub max_joins: u32,
    /// Age of the oldest buffered entry that triggers a flush.
    pub window: Duration,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            max_pending: 128,
            max_joins: 64,
            window: Duration::from_millis(10),
        }
    }
}

/// Cluster-wide configuration, fixed at initialization.
///
/// Every node and client of one cluster must be constructed from an equal
/// configuration: the router derives its partitioning from `shard_count`
/// and `vocab_size`, and `vector_dim` fixes the dimensionality of every
/// embedding row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of shards the embedding matrices are partitioned across.
    pub shard_count: u16,
    /// Dimensionality of every embedding row.
    pub vector_dim: usize,
    /// Number of rows per matrix (vocabulary size).
    pub vocab_size: u32,
    /// Deadline for collecting intercom partials of one training step.
    pub aggregation_timeout: Duration,
    /// Seed for the input-matrix initialization.
    pub seed: u64,
    /// Join/merge batching window.
    pub join: JoinConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            shard_count: 1,
            vector_dim: 100,
            vocab_size: 10_000,
            aggregation_timeout: Duration::from_millis(500),
            seed: 42,
            join: JoinConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Validate invariants that the rest of the system relies on.
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(ShardError::InvalidConfig(
                "shard_count must be at least 1".into(),
            ));
        }
        if self.vector_dim == 0 {
            return Err(ShardError::InvalidConfig(
                "vector_dim must be at least 1".into(),
            ));
        }
        if self.vocab_size == 0 {
            return Err(ShardError::InvalidConfig(
                "vocab_size must be at least 1".into(),
            ));
        }
        if self.aggregation_timeout.is_zero() {
            return Err(ShardError::InvalidConfig(
                "aggregation_timeout must be non-zero".into(),
            ));
        }
        if self.join.max_pending == 0 || self.join.max_joins == 0 {
            return Err(ShardError::InvalidConfig(
                "join limits must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Build a configuration from defaults with `GRAMSHARD_*` environment
    /// overrides applied.
    ///
    /// Recognized variables: `GRAMSHARD_SHARDS`, `GRAMSHARD_DIM`,
    /// `GRAMSHARD_VOCAB`, `GRAMSHARD_AGG_TIMEOUT_MS`, `GRAMSHARD_SEED`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = parse_env::<u16>("GRAMSHARD_SHARDS")? {
            config.shard_count = v;
        }
        if let Some(v) = parse_env::<usize>("GRAMSHARD_DIM")? {
            config.vector_dim = v;
        }
        if let Some(v) = parse_env::<u32>("GRAMSHARD_VOCAB")? {
            config.vocab_size = v;
        }
        if let Some(v) = parse_env::<u64>("GRAMSHARD_AGG_TIMEOUT_MS")? {
            config.aggregation_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_env::<u64>("GRAMSHARD_SEED")? {
            config.seed = v;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ShardError::InvalidConfig(format!("cannot parse {name}={raw}"))),
        Err(_) => Ok(None),
    }
}
