// ============================================================
// Layer 3 — Epoch Record and Loss Accumulator
// ============================================================
// EpochRecord is the only thing a run persists besides the
// checkpoint and the plot: one row per epoch with the summed
// training and validation loss.
//
// LossAccumulator is scoped to one epoch of one loop. Every
// token-level prediction step offers it a loss value; values
// that are NaN or infinite are counted but never summed.

use serde::{Deserialize, Serialize};

/// Loss totals for one completed epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Zero-based epoch index
    pub epoch: usize,
    pub training_loss: f64,
    pub validation_loss: f64,
}

impl EpochRecord {
    pub fn new(epoch: usize, training_loss: f64, validation_loss: f64) -> Self {
        Self { epoch, training_loss, validation_loss }
    }
}

/// Running per-epoch loss sum.
#[derive(Debug, Clone, Default)]
pub struct LossAccumulator {
    total: f64,
    steps: usize,
    skipped: usize,
}

impl LossAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero the sum and the step counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Add one step's loss. Returns `false` when the value was
    /// excluded because it is not finite.
    pub fn add(&mut self, loss: f64) -> bool {
        if loss.is_finite() {
            self.total += loss;
            self.steps += 1;
            true
        } else {
            self.skipped += 1;
            false
        }
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    /// Number of finite contributions.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Number of excluded non-finite contributions.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_finite_values_are_excluded() {
        let mut acc = LossAccumulator::new();
        assert!(acc.add(1.5));
        assert!(!acc.add(f64::INFINITY));
        assert!(!acc.add(f64::NAN));
        assert!(acc.add(0.5));
        assert_eq!(acc.total(), 2.0);
        assert_eq!(acc.steps(), 2);
        assert_eq!(acc.skipped(), 2);
    }

    #[test]
    fn test_monotonic_for_non_negative_losses() {
        let mut acc  = LossAccumulator::new();
        let mut prev = acc.total();
        for loss in [0.0, 3.2, 0.1, 7.0, 0.0, 2.5] {
            acc.add(loss);
            assert!(acc.total() >= prev);
            prev = acc.total();
        }
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut acc = LossAccumulator::new();
        acc.add(4.0);
        acc.add(f64::NEG_INFINITY);
        acc.reset();
        assert_eq!(acc.total(), 0.0);
        assert_eq!(acc.steps(), 0);
        assert_eq!(acc.skipped(), 0);
    }
}
