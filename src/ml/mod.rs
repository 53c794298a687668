// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All burn-specific code lives in this layer.
//
//   model.rs      — GPT-style causal decoder (CausalLm)
//   adapter.rs    — host token rows <-> tensors, masked NLL
//   backend.rs    — device request → compiled-in backend
//   schedule.rs   — linear lr warmup
//   sampling.rs   — greedy and top-p next-token selection
//   trainer.rs    — teacher-forced training loop + run driver
//   evaluator.rs  — self-fed evaluation loop
//   inferencer.rs — checkpoint-backed generation for `generate`

/// Causal decoder architecture
pub mod model;

/// Padding, forward-pass and loss helpers shared by both loops
pub mod adapter;

/// Backend selection and CPU fallback
pub mod backend;

/// Learning-rate warmup schedule
pub mod schedule;

/// Next-token selection
pub mod sampling;

/// Training loop, optimizer setup and the per-epoch driver
pub mod trainer;

/// Evaluation loop without gradient tracking
pub mod evaluator;

/// Generation from a saved checkpoint
pub mod inferencer;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard};

    use burn::{module::Param, prelude::*};

    use crate::ml::model::{CausalLm, CausalLmConfig};

    pub type InnerBackend = burn::backend::NdArray;
    pub type TestBackend  = burn::backend::Autodiff<InnerBackend>;

    static BACKEND: Mutex<()> = Mutex::new(());

    /// Serialises tests that initialise models: the NdArray
    /// backend draws parameters from one process-wide RNG.
    pub fn backend_lock() -> MutexGuard<'static, ()> {
        BACKEND.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn tiny_config(vocab_size: usize) -> CausalLmConfig {
        CausalLmConfig::new(vocab_size, 32, 16, 2, 1, 32).with_dropout(0.0)
    }

    /// Fill the output projection with NaN so every loss the
    /// model produces is non-finite.
    pub fn nan_head<B: Backend>(mut model: CausalLm<B>, device: &B::Device) -> CausalLm<B> {
        let dims = model.lm_head.weight.dims();
        model.lm_head.weight = Param::from_tensor(Tensor::full(dims, f32::NAN, device));
        model
    }
}
