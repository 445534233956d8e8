//! Error taxonomy for the GramShard cluster.
//!
//! The variants follow the failure classes of the training protocol:
//! malformed messages are rejected at ingress, routing failures and partial
//! timeouts surface to the submitter, and merge conflicts are internal
//! invariant violations. Duplicate partials are intentionally *not* an
//! error value - they are discarded and counted where they arrive.

use thiserror::Error;

use crate::types::{MatrixKind, MessageKind, ParamIndex, ShardId, StepId};

/// Errors produced by the GramShard core.
#[derive(Debug, Error)]
pub enum ShardError {
    /// A structural invariant of a message was violated (e.g. the
    /// hierarchical-softmax path lengths disagree). Never dispatched.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A parameter index has no owning shard.
    #[error("no shard owns parameter index {index} (vocab {vocab}, {shards} shard(s))")]
    RoutingFailure {
        index: ParamIndex,
        vocab: u32,
        shards: u16,
    },

    /// Cross-shard aggregation did not complete before the deadline. The
    /// step is abandoned with no partial gradient applied.
    #[error("step {step} timed out awaiting {missing} of {expected} partial(s)")]
    PartialTimeout {
        step: StepId,
        expected: usize,
        missing: usize,
    },

    /// Two messages whose kinds or targets do not admit merging were
    /// joined. Programming-contract violation, not a user-facing error.
    #[error("cannot join message kind {right:?} into {left:?}")]
    MergeConflict {
        left: MessageKind,
        right: MessageKind,
    },

    /// A row was addressed on a shard that does not own it.
    #[error("row {row} of {matrix:?} is not present on shard {shard}")]
    UnknownRow {
        matrix: MatrixKind,
        row: ParamIndex,
        shard: ShardId,
    },

    /// Vector operands of differing dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// No driver is registered for a message kind, or a driver received a
    /// payload of the wrong kind. Internal invariant failure.
    #[error("no training driver handles message kind {0:?}")]
    KindMismatch(MessageKind),

    /// The transport collaborator could not deliver a message.
    #[error("transport: {0}")]
    Transport(String),

    /// Cluster configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, ShardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_indices() {
        let err = ShardError::RoutingFailure {
            index: 42,
            vocab: 10,
            shards: 2,
        };
        let text = err.to_string();
        assert!(text.contains("42"), "{text}");
        assert!(text.contains("2 shard"), "{text}");
    }

    #[test]
    fn timeout_reports_missing_count() {
        let step = StepId::new();
        let err = ShardError::PartialTimeout {
            step,
            expected: 3,
            missing: 1,
        };
        assert!(err.to_string().contains("1 of 3"));
    }

    #[test]
    fn merge_conflict_names_both_kinds() {
        let err = ShardError::MergeConflict {
            left: MessageKind::SkipGram,
            right: MessageKind::Ack,
        };
        let text = err.to_string();
        assert!(text.contains("SkipGram"));
        assert!(text.contains("Ack"));
    }
}
