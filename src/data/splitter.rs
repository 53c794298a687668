// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Used when no separate validation file is given: the
// training pairs are shuffled with the run seed and the last
// `valid_fraction` of them become the validation set.
//
// A fraction of 0.0 means "validate on the training data
// itself", which is what a tiny smoke-test corpus needs.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Shuffle `samples` with `seed` and split into (train, validation).
pub fn split_train_val<T>(mut samples: Vec<T>, valid_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let n_valid  = ((total as f64) * valid_fraction.clamp(0.0, 1.0)).round() as usize;
    let split_at = total - n_valid.min(total);

    let val = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} validation",
        samples.len(),
        val.len(),
    );

    (samples, val)
}
