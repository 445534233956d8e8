//! Training drivers and the machinery they share.
//!
//! Both drivers reduce a training round to the same shape: a sequence of
//! dot-product operands (hierarchical-softmax tree nodes, then negative
//! samples) against one input vector, followed by symmetric updates of the
//! operand rows and the input. [`DriverCore`] carries the injected
//! collaborators and implements that shared shape; the drivers differ in
//! where the input vector comes from and what receives its update.

mod cbow;
mod skipgram;

pub use cbow::CbowDriver;
pub use skipgram::SkipGramDriver;

use std::collections::HashMap;
use std::sync::Arc;

use gramshard_common::{ClusterConfig, MatrixKind, ParamIndex, Result, ShardError, ShardId, StepId};
use gramshard_kernels::KernelManager;
use gramshard_messages::{DeltaPush, DotRequest, Envelope, Payload, RowRequest, Target};
use gramshard_routing::ShardRouter;
use gramshard_storage::RowStorage;

use crate::aggregator::Aggregator;
use crate::sampling::NegativeSampler;
use crate::transport::Transport;

/// One dot-product operand of a training step.
#[derive(Debug, Clone)]
pub(crate) struct Operand {
    /// Position in the step's operand sequence; partials are matched by it.
    pub seq: u32,
    pub matrix: MatrixKind,
    pub row: ParamIndex,
    /// Target label: `1 - code` for tree nodes, 0 for negative samples.
    pub label: f64,
    /// Whether this shard owns the row.
    pub local: bool,
}

/// An operand with its dot product and pre-update row snapshot.
pub(crate) struct ResolvedOperand {
    pub operand: Operand,
    pub dot: f64,
    pub row: Vec<f64>,
}

/// Plan the operand sequence of one training round.
///
/// The negative samples come from the request's seed, so the full set -
/// and with it the number of cross-shard partials - is known before any
/// message is sent.
pub(crate) fn plan_operands(
    points: &[ParamIndex],
    codes: &[u8],
    exclude: ParamIndex,
    neg_samples: u16,
    next_random: u64,
    vocab: u32,
    shard: ShardId,
    router: &dyn ShardRouter,
) -> Result<Vec<Operand>> {
    let mut operands = Vec::with_capacity(points.len() + usize::from(neg_samples));
    let mut seq = 0u32;
    for (point, code) in points.iter().zip(codes.iter()) {
        operands.push(Operand {
            seq,
            matrix: MatrixKind::HsOutput,
            row: *point,
            label: 1.0 - f64::from(*code),
            local: router.route(*point)? == shard,
        });
        seq += 1;
    }
    let mut sampler = NegativeSampler::new(next_random, vocab);
    for sample in sampler.sample_excluding(exclude, neg_samples) {
        operands.push(Operand {
            seq,
            matrix: MatrixKind::NegOutput,
            row: sample,
            label: 0.0,
            local: router.route(sample)? == shard,
        });
        seq += 1;
    }
    Ok(operands)
}

/// Injected collaborators and the step phases both drivers share.
pub(crate) struct DriverCore {
    pub shard: ShardId,
    pub config: ClusterConfig,
    pub storage: Arc<dyn RowStorage>,
    pub kernels: Arc<KernelManager>,
    pub router: Arc<dyn ShardRouter>,
    pub transport: Arc<dyn Transport>,
    pub aggregator: Arc<Aggregator>,
}

impl DriverCore {
    fn send_to_shard(&self, dest: ShardId, step: StepId, payload: Payload) -> Result<()> {
        let envelope = Envelope::for_step(
            step,
            self.transport.local_endpoint(),
            Target::Shard(dest),
            payload,
        );
        self.transport.send(dest, envelope)
    }

    /// Resolve the dot product of every operand against `input`.
    ///
    /// Local rows compute in place (their locks are held by the step);
    /// remote rows go through one intercom round trip each. Nothing is
    /// written here - a timeout abandons the step with the rows untouched.
    pub async fn resolve_dots(
        &self,
        step: StepId,
        input: &[f64],
        operands: &[Operand],
    ) -> Result<Vec<ResolvedOperand>> {
        let ops = self.kernels.select();
        let remote: Vec<&Operand> = operands.iter().filter(|o| !o.local).collect();

        let rx = if remote.is_empty() {
            None
        } else {
            Some(self.aggregator.register(step, remote.len()))
        };
        if let Err(err) = self.send_dot_requests(step, input, &remote) {
            self.aggregator.abandon(step);
            return Err(err);
        }

        let mut resolved = Vec::with_capacity(operands.len());
        for operand in operands.iter().filter(|o| o.local) {
            let row = self.storage.get_row(operand.matrix, operand.row)?;
            let dot = ops.dot(input, &row)?;
            resolved.push(ResolvedOperand {
                operand: operand.clone(),
                dot,
                row,
            });
        }

        if let Some(rx) = rx {
            let partials = self
                .aggregator
                .collect(step, remote.len(), rx, self.config.aggregation_timeout)
                .await?;
            let mut by_seq: HashMap<u32, _> =
                partials.into_iter().map(|p| (p.seq, p)).collect();
            for operand in &remote {
                let partial = by_seq.remove(&operand.seq).ok_or_else(|| {
                    ShardError::Transport(format!(
                        "aggregation for step {step} lacks partial seq {}",
                        operand.seq
                    ))
                })?;
                resolved.push(ResolvedOperand {
                    operand: (*operand).clone(),
                    dot: partial.value,
                    row: partial.row,
                });
            }
        }

        // Sequence order keeps the accumulation deterministic.
        resolved.sort_by_key(|r| r.operand.seq);
        Ok(resolved)
    }

    fn send_dot_requests(
        &self,
        step: StepId,
        input: &[f64],
        remote: &[&Operand],
    ) -> Result<()> {
        for operand in remote {
            let dest = self.router.route(operand.row)?;
            self.send_to_shard(
                dest,
                step,
                Payload::DotRequest(DotRequest {
                    step,
                    seq: operand.seq,
                    matrix: operand.matrix,
                    row: operand.row,
                    operand: input.to_vec(),
                }),
            )?;
        }
        Ok(())
    }

    /// Apply the symmetric operand updates and return the accumulated
    /// input-side gradient.
    ///
    /// Each operand row moves along the *pre-update* input snapshot
    /// (locally under the step's lock, or via a one-way delta to its
    /// owner), while `accumulated` collects `g * row_snapshot` for the
    /// caller to apply to the input side last.
    pub fn apply_operand_updates(
        &self,
        step: StepId,
        input: &[f64],
        alpha: f64,
        resolved: &[ResolvedOperand],
    ) -> Result<Vec<f64>> {
        let ops = self.kernels.select();
        let dim = self.storage.dim();
        let mut accumulated = vec![0.0; dim];
        for r in resolved {
            let g = (r.operand.label - ops.sigmoid(r.dot)) * alpha;
            ops.axpy(g, &r.row, &mut accumulated)?;
            let mut delta = vec![0.0; dim];
            ops.axpy(g, input, &mut delta)?;
            if r.operand.local {
                self.storage
                    .update_row(r.operand.matrix, r.operand.row, &delta)?;
            } else {
                let dest = self.router.route(r.operand.row)?;
                self.send_to_shard(
                    dest,
                    step,
                    Payload::DeltaPush(DeltaPush {
                        step,
                        matrix: r.operand.matrix,
                        row: r.operand.row,
                        delta,
                    }),
                )?;
            }
        }
        Ok(accumulated)
    }

    /// Gather a set of rows by snapshot (CBOW context), remote ones via
    /// intercom row fetches. Returned in sequence order.
    pub async fn fetch_rows(
        &self,
        step: StepId,
        matrix: MatrixKind,
        slots: &[(u32, ParamIndex, bool)],
    ) -> Result<Vec<(u32, Vec<f64>)>> {
        let remote: Vec<&(u32, ParamIndex, bool)> =
            slots.iter().filter(|(_, _, local)| !local).collect();
        let rx = if remote.is_empty() {
            None
        } else {
            Some(self.aggregator.register(step, remote.len()))
        };
        if let Err(err) = self.send_row_requests(step, matrix, &remote) {
            self.aggregator.abandon(step);
            return Err(err);
        }

        let mut rows = Vec::with_capacity(slots.len());
        for (seq, row, _) in slots.iter().filter(|(_, _, local)| *local) {
            rows.push((*seq, self.storage.get_row(matrix, *row)?));
        }
        if let Some(rx) = rx {
            let partials = self
                .aggregator
                .collect(step, remote.len(), rx, self.config.aggregation_timeout)
                .await?;
            for partial in partials {
                rows.push((partial.seq, partial.row));
            }
        }
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows)
    }

    fn send_row_requests(
        &self,
        step: StepId,
        matrix: MatrixKind,
        remote: &[&(u32, ParamIndex, bool)],
    ) -> Result<()> {
        for (seq, row, _) in remote {
            let dest = self.router.route(*row)?;
            self.send_to_shard(
                dest,
                step,
                Payload::RowRequest(RowRequest {
                    step,
                    seq: *seq,
                    matrix,
                    row: *row,
                }),
            )?;
        }
        Ok(())
    }
}
