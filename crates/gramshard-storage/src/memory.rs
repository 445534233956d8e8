//! In-memory matrix slice for one shard.

use std::collections::HashMap;
use std::sync::RwLock;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use gramshard_common::{ClusterConfig, MatrixKind, ParamIndex, Result, ShardError, ShardId};
use gramshard_routing::ShardRouter;

use crate::RowStorage;

/// One shard's slice of the three embedding matrices.
///
/// Rows are allocated at construction for every index the router assigns
/// to this shard. The input matrix is seeded uniformly in
/// `[-0.5/dim, 0.5/dim)` (the usual word2vec initialization); both output
/// matrices start at zero.
pub struct InMemoryStorage {
    shard: ShardId,
    dim: usize,
    owned: usize,
    rows: RwLock<HashMap<(MatrixKind, ParamIndex), Vec<f64>>>,
}

impl InMemoryStorage {
    /// Allocate the rows `router` assigns to `shard`.
    pub fn allocate(
        shard: ShardId,
        config: &ClusterConfig,
        router: &dyn ShardRouter,
    ) -> Result<Self> {
        config.validate()?;
        let dim = config.vector_dim;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(u64::from(shard)));
        let bound = 0.5 / dim as f64;

        let mut rows = HashMap::new();
        let mut owned = 0;
        for index in 0..config.vocab_size {
            if router.route(index)? != shard {
                continue;
            }
            owned += 1;
            let input: Vec<f64> = (0..dim).map(|_| rng.gen_range(-bound..bound)).collect();
            rows.insert((MatrixKind::Input, index), input);
            rows.insert((MatrixKind::HsOutput, index), vec![0.0; dim]);
            rows.insert((MatrixKind::NegOutput, index), vec![0.0; dim]);
        }

        Ok(Self {
            shard,
            dim,
            owned,
            rows: RwLock::new(rows),
        })
    }

    fn missing(&self, matrix: MatrixKind, row: ParamIndex) -> ShardError {
        ShardError::UnknownRow {
            matrix,
            row,
            shard: self.shard,
        }
    }

    fn check_dim(&self, actual: usize) -> Result<()> {
        if actual != self.dim {
            return Err(ShardError::DimensionMismatch {
                expected: self.dim,
                actual,
            });
        }
        Ok(())
    }
}

impl RowStorage for InMemoryStorage {
    fn dim(&self) -> usize {
        self.dim
    }

    fn owned_rows(&self) -> usize {
        self.owned
    }

    fn owns(&self, matrix: MatrixKind, row: ParamIndex) -> bool {
        self.rows
            .read()
            .expect("storage lock poisoned")
            .contains_key(&(matrix, row))
    }

    fn get_row(&self, matrix: MatrixKind, row: ParamIndex) -> Result<Vec<f64>> {
        let rows = self.rows.read().expect("storage lock poisoned");
        rows.get(&(matrix, row))
            .cloned()
            .ok_or_else(|| self.missing(matrix, row))
    }

    fn update_row(&self, matrix: MatrixKind, row: ParamIndex, delta: &[f64]) -> Result<()> {
        self.check_dim(delta.len())?;
        let mut rows = self.rows.write().expect("storage lock poisoned");
        let values = rows
            .get_mut(&(matrix, row))
            .ok_or_else(|| self.missing(matrix, row))?;
        for (v, d) in values.iter_mut().zip(delta.iter()) {
            *v += d;
        }
        Ok(())
    }

    fn set_row(&self, matrix: MatrixKind, row: ParamIndex, values: &[f64]) -> Result<()> {
        self.check_dim(values.len())?;
        let mut rows = self.rows.write().expect("storage lock poisoned");
        let slot = rows
            .get_mut(&(matrix, row))
            .ok_or_else(|| self.missing(matrix, row))?;
        slot.copy_from_slice(values);
        Ok(())
    }
}
