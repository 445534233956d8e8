//! Shard-to-shard intercom payloads and client acknowledgements.

use serde::{Deserialize, Serialize};

use gramshard_common::{MatrixKind, ParamIndex, StepId};

/// Request for a dot product against a row owned by the receiving shard.
///
/// Rows are partitioned whole, so the peer lacks the driver-side operand;
/// the request carries it. The reply's [`PartialDot`] returns the peer
/// row's pre-update snapshot so the initiator can perform its half of the
/// symmetric update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DotRequest {
    pub step: StepId,
    /// Position of this operand within the step's operand sequence.
    pub seq: u32,
    pub matrix: MatrixKind,
    pub row: ParamIndex,
    /// Driver-side operand vector.
    pub operand: Vec<f64>,
}

/// Request for a row snapshot (CBOW context gathering).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRequest {
    pub step: StepId,
    pub seq: u32,
    pub matrix: MatrixKind,
    pub row: ParamIndex,
}

/// One intercom partial: a computed value plus the row snapshot it was
/// computed against, tagged with step and sequence position.
///
/// `value` holds the dot product for dot partials and zero for plain row
/// fetches. Discarded once folded into the step's accumulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialDot {
    pub step: StepId,
    pub seq: u32,
    pub value: f64,
    pub row: Vec<f64>,
}

/// One-way gradient application on the row's owner. Not a round trip and
/// never acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaPush {
    pub step: StepId,
    pub matrix: MatrixKind,
    pub row: ParamIndex,
    pub delta: Vec<f64>,
}

/// Outcome of one logical training step, reported to the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrainingOutcome {
    /// The gradient was applied to every involved row.
    Applied,
    /// The step was abandoned with no update applied. Resubmission is the
    /// caller's decision; the cluster never retries on its own.
    Failed { reason: String },
}

/// Shard-to-client acknowledgement of a training step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub step: StepId,
    pub outcome: TrainingOutcome,
}
