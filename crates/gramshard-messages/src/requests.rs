//! Client-submitted training requests.

use serde::{Deserialize, Serialize};

use gramshard_common::{ParamIndex, Result, ShardError};

/// One skip-gram training round for the pair `(w1, w2)`.
///
/// `points` and `codes` encode `w1`'s hierarchical-softmax tree path;
/// `next_random` seeds the negative-sampling sequence. Created on a
/// client, optionally merged with siblings sharing the same pair, consumed
/// exactly once by the owning shard's skip-gram driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipGramRequest {
    /// Learning rate for this round. Summed when siblings merge.
    pub alpha: f64,
    /// Target word - the input row, and the shard the request routes to.
    pub w1: ParamIndex,
    /// Context word.
    pub w2: ParamIndex,
    /// Hierarchical-softmax tree path node indices.
    pub points: Vec<ParamIndex>,
    /// Path bits, one per point, each 0 or 1.
    pub codes: Vec<u8>,
    /// Number of negative samples to draw.
    pub neg_samples: u16,
    /// Seed of the negative-sampling random sequence.
    pub next_random: u64,
}

impl SkipGramRequest {
    /// Structural invariants, checked at ingress before dispatch.
    pub fn validate(&self) -> Result<()> {
        if self.points.len() != self.codes.len() {
            return Err(ShardError::MalformedMessage(format!(
                "skip-gram path mismatch: {} points, {} codes",
                self.points.len(),
                self.codes.len()
            )));
        }
        if let Some(code) = self.codes.iter().find(|c| **c > 1) {
            return Err(ShardError::MalformedMessage(format!(
                "skip-gram code {code} is not a bit"
            )));
        }
        if !(self.alpha > 0.0 && self.alpha.is_finite()) {
            return Err(ShardError::MalformedMessage(format!(
                "learning rate {} must be positive and finite",
                self.alpha
            )));
        }
        Ok(())
    }

    /// Indices whose owning shards this request involves.
    pub fn referenced_indices(&self) -> Vec<ParamIndex> {
        let mut out = Vec::with_capacity(2 + self.points.len());
        out.push(self.w1);
        out.push(self.w2);
        out.extend_from_slice(&self.points);
        out
    }
}

/// One CBOW training round for the target word `w1`.
///
/// The input vector is the mean of the `context` rows; the same
/// hierarchical-softmax path and negative-sampling updates as skip-gram
/// run against that aggregated input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CbowRequest {
    /// Learning rate for this round. Summed when siblings merge.
    pub alpha: f64,
    /// Target word - owns the request's hierarchical-softmax path.
    pub w1: ParamIndex,
    /// Window of context words whose rows are averaged into the input.
    pub context: Vec<ParamIndex>,
    /// Hierarchical-softmax tree path node indices.
    pub points: Vec<ParamIndex>,
    /// Path bits, one per point, each 0 or 1.
    pub codes: Vec<u8>,
    /// Number of negative samples to draw.
    pub neg_samples: u16,
    /// Seed of the negative-sampling random sequence.
    pub next_random: u64,
}

impl CbowRequest {
    pub fn validate(&self) -> Result<()> {
        if self.points.len() != self.codes.len() {
            return Err(ShardError::MalformedMessage(format!(
                "cbow path mismatch: {} points, {} codes",
                self.points.len(),
                self.codes.len()
            )));
        }
        if let Some(code) = self.codes.iter().find(|c| **c > 1) {
            return Err(ShardError::MalformedMessage(format!(
                "cbow code {code} is not a bit"
            )));
        }
        if self.context.is_empty() {
            return Err(ShardError::MalformedMessage(
                "cbow request without context words".into(),
            ));
        }
        if !(self.alpha > 0.0 && self.alpha.is_finite()) {
            return Err(ShardError::MalformedMessage(format!(
                "learning rate {} must be positive and finite",
                self.alpha
            )));
        }
        Ok(())
    }

    pub fn referenced_indices(&self) -> Vec<ParamIndex> {
        let mut out = Vec::with_capacity(1 + self.context.len() + self.points.len());
        out.push(self.w1);
        out.extend_from_slice(&self.context);
        out.extend_from_slice(&self.points);
        out
    }
}
