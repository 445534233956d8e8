//! Skip-gram training driver.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use gramshard_common::{
    ClusterConfig, MatrixKind, MessageKind, Result, ShardError, ShardId,
};
use gramshard_kernels::KernelManager;
use gramshard_messages::{Envelope, Payload, SkipGramRequest};
use gramshard_routing::ShardRouter;
use gramshard_storage::RowStorage;

use crate::aggregator::Aggregator;
use crate::dispatch::TrainingDriver;
use crate::drivers::{plan_operands, DriverCore, Operand};
use crate::row_locks::{RowGuard, RowKey};
use crate::transport::Transport;

/// Executes skip-gram rounds against this shard's input row.
///
/// A request is routed to the owner of `w1`; that row is the step's input:
/// every hierarchical-softmax node and negative sample trains a dot
/// product against it. The input row is read once at the start and
/// written exactly once at the end, so every operand update sees the
/// pre-update input - the classic snapshot discipline of skip-gram.
pub struct SkipGramDriver {
    core: DriverCore,
}

impl SkipGramDriver {
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

    fn plan(&self, request: &SkipGramRequest) -> Result<Vec<Operand>> {
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
}

#[async_trait]
impl TrainingDriver for SkipGramDriver {
    fn kind(&self) -> MessageKind {
        MessageKind::SkipGram
    }

    fn rows_to_lock(&self, payload: &Payload) -> Result<Vec<RowKey>> {
        let Payload::SkipGram(request) = payload else {
            return Err(ShardError::KindMismatch(payload.kind()));
        };
        let mut keys = vec![(MatrixKind::Input, request.w1)];
        for operand in self.plan(request)? {
            if operand.local {
                keys.push((operand.matrix, operand.row));
            }
        }
        Ok(keys)
    }

    async fn process(&self, envelope: Envelope, guards: Vec<RowGuard>) -> Result<()> {
        let Payload::SkipGram(request) = &envelope.payload else {
            return Err(ShardError::KindMismatch(envelope.kind()));
        };
        let step = envelope.step;

        let input = self
            .core
            .storage
            .get_row(MatrixKind::Input, request.w1)?;
        let operands = self.plan(request)?;
        let remote = operands.iter().filter(|o| !o.local).count();
        debug!(
            shard = self.core.shard,
            %step,
            w1 = request.w1,
            w2 = request.w2,
            operands = operands.len(),
            remote,
            "skip-gram step started"
        );

        let resolved = self.core.resolve_dots(step, &input, &operands).await?;
        let accumulated =
            self.core
                .apply_operand_updates(step, &input, request.alpha, &resolved)?;
        self.core
            .storage
            .update_row(MatrixKind::Input, request.w1, &accumulated)?;
        drop(guards);

        debug!(shard = self.core.shard, %step, "skip-gram step done");
        Ok(())
    }
}
