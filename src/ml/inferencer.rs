// ============================================================
// Layer 5 — Inferencer
// ============================================================
// Loads a fine-tuned checkpoint and continues a source
// utterance token by token, the same self-fed extension the
// evaluation loop uses.

use anyhow::Result;
use burn::prelude::*;

use crate::domain::traits::TextCodec;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    adapter::{logits_to_rows, next_token_logits},
    model::CausalLm,
    sampling::Sampler,
};

pub struct Inferencer<B: Backend> {
    model:  CausalLm<B>,
    device: B::Device,
}

impl<B: Backend> Inferencer<B> {
    pub fn new(model: CausalLm<B>, device: B::Device) -> Self {
        Self { model, device }
    }

    pub fn from_checkpoint(ckpt_manager: &CheckpointManager, device: B::Device) -> Result<Self> {
        let model_cfg = ckpt_manager.load_model_config()?;
        let model     = model_cfg.with_dropout(0.0).init::<B>(&device);
        let model     = ckpt_manager.load_model(model, &device)?;
        tracing::info!("Model loaded from checkpoint");
        Ok(Self { model, device })
    }

    /// Generate up to `max_new_tokens` after `source`. Stops early
    /// on `stop_id` (not included in the output).
    pub fn generate<C: TextCodec + ?Sized>(
        &self,
        source:         &str,
        codec:          &C,
        sampler:        &mut Sampler,
        max_new_tokens: usize,
        stop_id:        Option<u32>,
    ) -> Result<String> {
        let mut row      = codec.encode(source)?;
        let prompt_len   = row.len();
        let pad_id       = codec.pad_id();

        for _ in 0..max_new_tokens {
            let logits = next_token_logits(&self.model, std::slice::from_ref(&row), pad_id, &self.device);
            let rows   = logits_to_rows(logits)?;
            let next   = sampler.sample(&rows[0], Some(pad_id));
            if Some(next) == stop_id {
                break;
            }
            row.push(next);
        }

        let reply = codec.decode(&row[prompt_len..])?;
        tracing::debug!("Generated {} tokens: '{}'", row.len() - prompt_len, reply);
        Ok(reply)
    }
}
