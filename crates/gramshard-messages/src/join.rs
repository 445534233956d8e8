//! Join/merge batching layer.
//!
//! Before a training request leaves its origin, it sits in a [`JoinBuffer`]
//! for a short window; a sibling addressed to the same logical target is
//! absorbed into the buffered envelope instead of crossing the wire as a
//! second message. A batch is force-flushed once the buffer or a single
//! entry reaches its size limit, so buffering is always bounded.

use std::collections::HashMap;
use std::time::Instant;

use tracing::debug;

use gramshard_common::{JoinConfig, ParamIndex, Result, StepId};

use crate::envelope::{Envelope, Payload};

/// Result of offering one envelope to the buffer.
#[derive(Debug)]
pub enum JoinOutcome {
    /// A new batch was started for this target.
    Buffered(StepId),
    /// Absorbed into a buffered sibling; the given step now represents
    /// both submissions.
    Merged { into: StepId },
    /// The payload kind does not support joining; send it immediately.
    Bypass(Envelope),
}

/// Logical target key of a join-eligible payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum JoinKey {
    SkipGram { w1: ParamIndex, w2: ParamIndex },
    Cbow { w1: ParamIndex, context: Vec<ParamIndex> },
}

fn join_key(payload: &Payload) -> Option<JoinKey> {
    match payload {
        Payload::SkipGram(req) => Some(JoinKey::SkipGram {
            w1: req.w1,
            w2: req.w2,
        }),
        Payload::Cbow(req) => Some(JoinKey::Cbow {
            w1: req.w1,
            context: req.context.clone(),
        }),
        _ => None,
    }
}

#[derive(Debug)]
struct BufferedEntry {
    envelope: Envelope,
    /// Siblings absorbed so far.
    joins: u32,
    buffered_at: Instant,
}

/// Bounded batching window over join-eligible envelopes.
///
/// Time is injected (`now`) rather than read, so the window behavior is
/// testable without sleeping.
#[derive(Debug)]
pub struct JoinBuffer {
    config: JoinConfig,
    entries: HashMap<JoinKey, BufferedEntry>,
}

impl JoinBuffer {
    pub fn new(config: JoinConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    /// Offer an envelope to the buffer.
    ///
    /// Join-eligible envelopes are buffered or merged; everything else is
    /// handed back for immediate dispatch. A merge failure would mean the
    /// key derivation and [`Payload::join`] disagree - surfaced, never
    /// swallowed.
    pub fn insert(&mut self, envelope: Envelope, now: Instant) -> Result<JoinOutcome> {
        let Some(key) = join_key(&envelope.payload) else {
            return Ok(JoinOutcome::Bypass(envelope));
        };
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.envelope.payload.join(&envelope.payload)?;
            entry.joins += 1;
            debug!(step = %entry.envelope.step, joins = entry.joins, "merged training request");
            return Ok(JoinOutcome::Merged {
                into: entry.envelope.step,
            });
        }
        let step = envelope.step;
        self.entries.insert(
            key,
            BufferedEntry {
                envelope,
                joins: 0,
                buffered_at: now,
            },
        );
        Ok(JoinOutcome::Buffered(step))
    }

    /// Remove and return every envelope whose batch is due: the whole
    /// buffer once `max_pending` distinct targets accumulate, otherwise
    /// entries older than the window or saturated by `max_joins`.
    pub fn flush_ready(&mut self, now: Instant) -> Vec<Envelope> {
        if self.entries.len() >= self.config.max_pending {
            debug!(pending = self.entries.len(), "join buffer full, force flush");
            return self.drain();
        }
        let window = self.config.window;
        let max_joins = self.config.max_joins;
        let due: Vec<JoinKey> = self
            .entries
            .iter()
            .filter(|(_, e)| {
                e.joins >= max_joins || now.duration_since(e.buffered_at) >= window
            })
            .map(|(k, _)| k.clone())
            .collect();
        due.into_iter()
            .filter_map(|k| self.entries.remove(&k))
            .map(|e| e.envelope)
            .collect()
    }

    /// Remove and return everything buffered.
    pub fn drain(&mut self) -> Vec<Envelope> {
        self.entries.drain().map(|(_, e)| e.envelope).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
