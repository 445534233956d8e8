//! Numeric vector kernels for embedding training
//!
//! The training drivers reduce every update to three operations: a dot
//! product between two rows, an axpy-style accumulate (`y += alpha * x`),
//! and the logistic function. Implementations live behind the
//! [`VectorOps`] trait so a tuned provider can replace the scalar fallback
//! without touching the drivers; [`KernelManager`] picks one provider per
//! process and caches the selection.

use std::sync::OnceLock;

use gramshard_common::Result;

pub mod cpu;

/// Vector-operation provider.
///
/// All arithmetic is double precision. Implementations must reject
/// operands of differing dimensionality rather than truncate.
pub trait VectorOps: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_available(&self) -> bool;

    /// Inner product of two rows.
    fn dot(&self, a: &[f64], b: &[f64]) -> Result<f64>;

    /// `y += alpha * x`.
    fn axpy(&self, alpha: f64, x: &[f64], y: &mut [f64]) -> Result<()>;

    /// Standard logistic function.
    fn sigmoid(&self, x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }
}

/// Selects a [`VectorOps`] provider once and caches the choice.
pub struct KernelManager {
    providers: Vec<Box<dyn VectorOps>>,
    selected: OnceLock<usize>,
}

impl KernelManager {
    pub fn new() -> Self {
        let providers: Vec<Box<dyn VectorOps>> = vec![Box::new(cpu::ScalarKernel)];
        Self {
            providers,
            selected: OnceLock::new(),
        }
    }

    /// The active provider. Resolved on first call, in registration order.
    pub fn select(&self) -> &dyn VectorOps {
        let idx = *self.selected.get_or_init(|| {
            let idx = self
                .providers
                .iter()
                .position(|p| p.is_available())
                .unwrap_or(0);
            tracing::debug!(kernel = self.providers[idx].name(), "selected vector kernel");
            idx
        });
        self.providers[idx].as_ref()
    }
}

impl Default for KernelManager {
    fn default() -> Self {
        Self::new()
    }
}
