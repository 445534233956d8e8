//! Message envelope and payload dispatch model.

use serde::{Deserialize, Serialize};

use gramshard_common::{EndpointId, MessageId, MessageKind, Result, ShardError, ShardId, StepId};

use crate::intercom::{Ack, DeltaPush, DotRequest, PartialDot, RowRequest};
use crate::requests::{CbowRequest, SkipGramRequest};

/// Delivery target of an envelope.
///
/// Targets are computed by the router from the parameter indices a message
/// references - never hard-coded by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// Not yet routed.
    None,
    /// Exactly one shard.
    Shard(ShardId),
    /// Every shard in the cluster.
    Broadcast,
}

/// Tagged message payload; the variant is the dispatch key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    SkipGram(SkipGramRequest),
    Cbow(CbowRequest),
    DotRequest(DotRequest),
    DotReply(PartialDot),
    RowRequest(RowRequest),
    RowReply(PartialDot),
    DeltaPush(DeltaPush),
    Ack(Ack),
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::SkipGram(_) => MessageKind::SkipGram,
            Payload::Cbow(_) => MessageKind::Cbow,
            Payload::DotRequest(_) => MessageKind::DotRequest,
            Payload::DotReply(_) => MessageKind::DotReply,
            Payload::RowRequest(_) => MessageKind::RowRequest,
            Payload::RowReply(_) => MessageKind::RowReply,
            Payload::DeltaPush(_) => MessageKind::DeltaPush,
            Payload::Ack(_) => MessageKind::Ack,
        }
    }

    /// Whether same-target siblings of this payload may be merged.
    ///
    /// Only training requests merge: both encode the same gradient
    /// direction, so summing learning rates is commutative and
    /// associative. Intercom and acknowledgement messages depend on
    /// ordering or distinct step identities and never merge.
    pub fn is_join_supported(&self) -> bool {
        matches!(self, Payload::SkipGram(_) | Payload::Cbow(_))
    }

    /// Absorb a sibling's contribution into `self`.
    ///
    /// The kinds *and* logical targets must match; anything else is a
    /// [`ShardError::MergeConflict`] - an internal invariant failure, since
    /// the join layer only merges key-equal entries.
    pub fn join(&mut self, other: &Payload) -> Result<()> {
        match (self, other) {
            (Payload::SkipGram(a), Payload::SkipGram(b)) if a.w1 == b.w1 && a.w2 == b.w2 => {
                a.alpha += b.alpha;
                Ok(())
            }
            (Payload::Cbow(a), Payload::Cbow(b)) if a.w1 == b.w1 && a.context == b.context => {
                a.alpha += b.alpha;
                Ok(())
            }
            (me, other) => Err(ShardError::MergeConflict {
                left: me.kind(),
                right: other.kind(),
            }),
        }
    }
}

/// A routed, identified unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: MessageId,
    /// The logical training step this message belongs to.
    pub step: StepId,
    pub origin: EndpointId,
    pub target: Target,
    pub payload: Payload,
}

impl Envelope {
    /// New envelope starting a fresh logical step.
    pub fn new(origin: EndpointId, target: Target, payload: Payload) -> Self {
        Self {
            id: MessageId::new(),
            step: StepId::new(),
            origin,
            target,
            payload,
        }
    }

    /// New envelope belonging to an existing step (intercom, acks).
    pub fn for_step(step: StepId, origin: EndpointId, target: Target, payload: Payload) -> Self {
        Self {
            id: MessageId::new(),
            step,
            origin,
            target,
            payload,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gramshard_common::MessageKind;

    fn skip_gram(w1: u32, w2: u32, alpha: f64) -> Payload {
        Payload::SkipGram(SkipGramRequest {
            alpha,
            w1,
            w2,
            points: vec![1],
            codes: vec![1],
            neg_samples: 0,
            next_random: 7,
        })
    }

    #[test]
    fn join_sums_learning_rates() {
        let mut a = skip_gram(1, 2, 0.025);
        let b = skip_gram(1, 2, 0.01);
        a.join(&b).unwrap();
        match a {
            Payload::SkipGram(req) => assert!((req.alpha - 0.035).abs() < 1e-12),
            _ => unreachable!(),
        }
    }

    #[test]
    fn join_rejects_different_pairs() {
        let mut a = skip_gram(1, 2, 0.025);
        let b = skip_gram(1, 3, 0.025);
        assert!(matches!(
            a.join(&b),
            Err(ShardError::MergeConflict { .. })
        ));
    }

    #[test]
    fn join_rejects_foreign_kinds() {
        let mut a = skip_gram(1, 2, 0.025);
        let b = Payload::Ack(Ack {
            step: StepId::new(),
            outcome: crate::TrainingOutcome::Applied,
        });
        let err = a.join(&b).unwrap_err();
        assert!(matches!(
            err,
            ShardError::MergeConflict {
                left: MessageKind::SkipGram,
                right: MessageKind::Ack
            }
        ));
    }

    #[test]
    fn only_training_requests_are_joinable() {
        assert!(skip_gram(0, 1, 0.1).is_join_supported());
        let ack = Payload::Ack(Ack {
            step: StepId::new(),
            outcome: crate::TrainingOutcome::Applied,
        });
        assert!(!ack.is_join_supported());
    }

    #[test]
    fn envelope_serde_round_trip() {
        let env = Envelope::new(0x8000, Target::Shard(1), skip_gram(4, 5, 0.05));
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(env, back);
    }
}
