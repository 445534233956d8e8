//! Identifier and kind types shared across the cluster.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a shard within the cluster; shards are numbered
/// `0..shard_count`.
pub type ShardId = u16;

/// Identifier of any transport endpoint - shards and clients alike.
pub type EndpointId = u16;

/// Integer id of a word/row in the embedding matrices.
pub type ParamIndex = u32;

/// First endpoint id available to clients. Everything below is reserved
/// for shards.
pub const CLIENT_ENDPOINT_BASE: EndpointId = 0x8000;

/// Unique identifier of one logical training step.
///
/// A step keeps its id from client submission through join/merge, intercom
/// fan-out, and the final acknowledgement; partial results are matched to
/// their step by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(Uuid);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier of one message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The three row matrices of the embedding model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatrixKind {
    /// Word vectors (the rows read as training input and updated last).
    Input,
    /// Hierarchical-softmax tree node vectors.
    HsOutput,
    /// Negative-sampling output vectors.
    NegOutput,
}

/// Dispatch key of a message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    SkipGram,
    Cbow,
    DotRequest,
    DotReply,
    RowRequest,
    RowReply,
    DeltaPush,
    Ack,
}
