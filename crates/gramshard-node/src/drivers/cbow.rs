//! CBOW training driver.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use gramshard_common::{
    ClusterConfig, MatrixKind, MessageKind, ParamIndex, Result, ShardError, ShardId,
};
use gramshard_kernels::KernelManager;
use gramshard_messages::{CbowRequest, DeltaPush, Envelope, Payload};
use gramshard_routing::ShardRouter;
use gramshard_storage::RowStorage;

use crate::aggregator::Aggregator;
use crate::dispatch::TrainingDriver;
use crate::drivers::{plan_operands, DriverCore, Operand};
use crate::row_locks::{RowGuard, RowKey};
use crate::transport::Transport;

/// Executes CBOW rounds: the input vector is the mean of the context
/// rows, gathered locally or via intercom row fetches; the operand
/// updates are shared with skip-gram, and each context row afterwards
/// receives its share of the accumulated input-side gradient.
pub struct CbowDriver {
    core: DriverCore,
}

impl CbowDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shard: ShardId,
        config: ClusterConfig,
        storage: Arc<dyn RowStorage>,
        kernels: Arc<KernelManager>,
        router: Arc<dyn ShardRouter>,
        transport: Arc<dyn Transport>,
        aggregator: Arc<Aggregator>,
    ) -> Self {
        Self {
            core: DriverCore {
                shard,
                config,
                storage,
                kernels,
                router,
                transport,
                aggregator,
            },
        }
    }

    fn plan(&self, request: &CbowRequest) -> Result<Vec<Operand>> {
        plan_operands(
            &request.points,
            &request.codes,
            request.w1,
            request.neg_samples,
            request.next_random,
            self.core.config.vocab_size,
            self.core.shard,
            self.core.router.as_ref(),
        )
    }

    /// `(seq, row, local)` slot per context occurrence, in request order.
    fn context_slots(&self, request: &CbowRequest) -> Result<Vec<(u32, ParamIndex, bool)>> {
        request
            .context
            .iter()
            .enumerate()
            .map(|(i, row)| {
                Ok((
                    i as u32,
                    *row,
                    self.core.router.route(*row)? == self.core.shard,
                ))
            })
            .collect()
    }
}

#[async_trait]
impl TrainingDriver for CbowDriver {
    fn kind(&self) -> MessageKind {
        MessageKind::Cbow
    }

    fn rows_to_lock(&self, payload: &Payload) -> Result<Vec<RowKey>> {
        let Payload::Cbow(request) = payload else {
            return Err(ShardError::KindMismatch(payload.kind()));
        };
        let mut keys = Vec::new();
        for (_, row, local) in self.context_slots(request)? {
            if local {
                keys.push((MatrixKind::Input, row));
            }
        }
        for operand in self.plan(request)? {
            if operand.local {
                keys.push((operand.matrix, operand.row));
            }
        }
        Ok(keys)
    }

    async fn process(&self, envelope: Envelope, guards: Vec<RowGuard>) -> Result<()> {
        let Payload::Cbow(request) = &envelope.payload else {
            return Err(ShardError::KindMismatch(envelope.kind()));
        };
        let step = envelope.step;
        let ops = self.core.kernels.select();
        let dim = self.core.storage.dim();

        // Gather the context window and average it into the input vector.
        let slots = self.context_slots(request)?;
        let rows = self
            .core
            .fetch_rows(step, MatrixKind::Input, &slots)
            .await?;
        let scale = 1.0 / request.context.len() as f64;
        let mut input = vec![0.0; dim];
        for (_, row) in &rows {
            ops.axpy(scale, row, &mut input)?;
        }

        let operands = self.plan(request)?;
        debug!(
            shard = self.core.shard,
            %step,
            w1 = request.w1,
            context = request.context.len(),
            operands = operands.len(),
            "cbow step started"
        );

        let resolved = self.core.resolve_dots(step, &input, &operands).await?;
        let accumulated =
            self.core
                .apply_operand_updates(step, &input, request.alpha, &resolved)?;

        // Every context occurrence receives its share of the input-side
        // gradient.
        let mut share = vec![0.0; dim];
        ops.axpy(scale, &accumulated, &mut share)?;
        for (_, row, local) in &slots {
            if *local {
                self.core
                    .storage
                    .update_row(MatrixKind::Input, *row, &share)?;
            } else {
                let dest = self.core.router.route(*row)?;
                self.core.send_to_shard(
                    dest,
                    step,
                    Payload::DeltaPush(DeltaPush {
                        step,
                        matrix: MatrixKind::Input,
                        row: *row,
                        delta: share.clone(),
                    }),
                )?;
            }
        }
        drop(guards);

        debug!(shard = self.core.shard, %step, "cbow step done");
        Ok(())
    }
}
