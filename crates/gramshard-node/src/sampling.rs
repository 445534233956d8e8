//! Deterministic negative-sample drawing.
//!
//! The sampler reproduces the word2vec linear congruential sequence:
//! `state = state * 25214903917 + 11`, wrapping at the u64 boundary (the
//! generator's natural modulus), with the sampled index taken from bits
//! 16.. of the state. The same seed always yields the same sample
//! sequence - required both for testability and so a driver can know the
//! full set of sampled rows (and therefore the expected intercom
//! cardinality) before any message is sent.

use gramshard_common::ParamIndex;

pub const LCG_MULTIPLIER: u64 = 25_214_903_917;
pub const LCG_INCREMENT: u64 = 11;

/// Seeded negative-sample stream over one vocabulary.
#[derive(Debug, Clone)]
pub struct NegativeSampler {
    state: u64,
    vocab: u32,
}

impl NegativeSampler {
    /// `vocab` must be non-zero (guaranteed by config validation).
    pub fn new(seed: u64, vocab: u32) -> Self {
        Self { state: seed, vocab }
    }

    /// Advance the sequence and draw one index.
    pub fn draw(&mut self) -> ParamIndex {
        self.state = self
            .state
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        ((self.state >> 16) % u64::from(self.vocab)) as ParamIndex
    }

    /// Draw `count` times, keeping samples that differ from `exclude`.
    ///
    /// A draw that collides with the positive target is skipped, not
    /// redrawn, so the returned set can be shorter than `count` - the
    /// sequence consumed is always exactly `count` states long.
    pub fn sample_excluding(&mut self, exclude: ParamIndex, count: u16) -> Vec<ParamIndex> {
        let mut samples = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let index = self.draw();
            if index != exclude {
                samples.push(index);
            }
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = NegativeSampler::new(0xDEAD_BEEF, 1000);
        let mut b = NegativeSampler::new(0xDEAD_BEEF, 1000);
        for _ in 0..100 {
            assert_eq!(a.draw(), b.draw());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = NegativeSampler::new(1, 1_000_000);
        let mut b = NegativeSampler::new(2, 1_000_000);
        let seq_a: Vec<_> = (0..16).map(|_| a.draw()).collect();
        let seq_b: Vec<_> = (0..16).map(|_| b.draw()).collect();
        assert_ne!(seq_a, seq_b);
    }

    #[test]
    fn state_wraps_at_u64_boundary() {
        let mut sampler = NegativeSampler::new(u64::MAX, 10);
        // Must not panic on overflow; wrapping is the defined behavior.
        let index = sampler.draw();
        assert!(index < 10);
    }

    #[test]
    fn samples_stay_in_vocab() {
        let mut sampler = NegativeSampler::new(7, 13);
        for _ in 0..1000 {
            assert!(sampler.draw() < 13);
        }
    }

    #[test]
    fn excluded_target_never_sampled() {
        let mut sampler = NegativeSampler::new(99, 4);
        let samples = sampler.sample_excluding(2, 200);
        assert!(samples.iter().all(|s| *s != 2));
        assert!(samples.len() < 200, "collisions are skipped, not redrawn");
    }

    #[test]
    fn exclusion_does_not_change_the_stream() {
        // Skipping a collision consumes the state all the same.
        let mut with_skip = NegativeSampler::new(5, 3);
        let mut plain = NegativeSampler::new(5, 3);
        with_skip.sample_excluding(1, 8);
        for _ in 0..8 {
            plain.draw();
        }
        assert_eq!(with_skip.draw(), plain.draw());
    }
}
