// ============================================================
// Layer 2 — GenerateUseCase
// ============================================================
// Continues one source utterance with a fine-tuned checkpoint:
//
//   Step 1: Load tokenizer.json   (Layer 6 - infra)
//   Step 2: Rebuild the model     (Layer 6 - infra)
//   Step 3: Sample a reply        (Layer 5 - ml)

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::infra::{
    checkpoint::CheckpointManager,
    tokenizer_store::{DialogueTokenizer, TokenizerStore, TOKENIZER_FILE},
};
use crate::ml::{
    backend::{self, Accelerator, DeviceKind},
    inferencer::Inferencer,
    sampling::{Sampler, SamplingStrategy},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateConfig {
    pub checkpoint_dir: PathBuf,
    /// Defaults to `<checkpoint_dir>/tokenizer.json`
    pub tokenizer:      Option<PathBuf>,
    pub max_new_tokens: usize,
    pub top_p:          f32,
    pub temperature:    f32,
    pub seed:           u64,
    pub device:         DeviceKind,
}

pub struct GenerateUseCase {
    config:    GenerateConfig,
    tokenizer: DialogueTokenizer,
    ckpt:      CheckpointManager,
}

impl GenerateUseCase {
    pub fn new(config: GenerateConfig) -> Result<Self> {
        let tok_path = config
            .tokenizer
            .clone()
            .unwrap_or_else(|| config.checkpoint_dir.join(TOKENIZER_FILE));
        tracing::info!("Loading tokenizer from '{}'", tok_path.display());
        let tokenizer = DialogueTokenizer::new(TokenizerStore::load(&tok_path)?)?;
        let ckpt      = CheckpointManager::open(&config.checkpoint_dir);
        Ok(Self { config, tokenizer, ckpt })
    }

    pub fn generate(&self, source: &str) -> Result<String> {
        match backend::resolve(self.config.device) {
            Accelerator::Cpu => {
                self.generate_on::<backend::CpuBackend>(source, burn::backend::ndarray::NdArrayDevice::Cpu)
            }
            #[cfg(feature = "wgpu")]
            Accelerator::Wgpu => {
                self.generate_on::<backend::WgpuBackend>(source, burn::backend::wgpu::WgpuDevice::default())
            }
        }
    }

    fn generate_on<B: burn::prelude::Backend>(&self, source: &str, device: B::Device) -> Result<String> {
        let cfg        = &self.config;
        let inferencer = Inferencer::<B>::from_checkpoint(&self.ckpt, device)?;
        let mut sampler = Sampler::new(SamplingStrategy::from_settings(cfg.top_p, cfg.temperature), cfg.seed);
        inferencer.generate(source, &self.tokenizer, &mut sampler, cfg.max_new_tokens, self.tokenizer.eos_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    use crate::infra::tokenizer_store::test_tokenizer;
    use crate::ml::{model::CausalLm, test_support::{backend_lock, tiny_config}};
    use crate::domain::traits::TextCodec;

    #[test]
    fn test_generate_from_saved_checkpoint() {
        let _guard = backend_lock();
        let dir  = tempfile::tempdir().unwrap();
        let tok  = test_tokenizer();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        TokenizerStore::new(Some(dir.path().to_path_buf())).save(tok.inner()).unwrap();

        let cfg = tiny_config(tok.vocab_size());
        let model: CausalLm<NdArray> = cfg.init(&Default::default());
        ckpt.save_model_config(&cfg).unwrap();
        ckpt.save_model(&model, 0).unwrap();

        let use_case = GenerateUseCase::new(GenerateConfig {
            checkpoint_dir: dir.path().to_path_buf(),
            tokenizer:      None,
            max_new_tokens: 3,
            top_p:          1.0,
            temperature:    1.0,
            seed:           1,
            device:         DeviceKind::Cpu,
        })
        .unwrap();
        let reply = use_case.generate("hello there").unwrap();
        assert_eq!(reply.split_whitespace().count(), 3);
    }

    #[test]
    fn test_missing_tokenizer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = GenerateUseCase::new(GenerateConfig {
            checkpoint_dir: dir.path().to_path_buf(),
            tokenizer:      None,
            max_new_tokens: 3,
            top_p:          1.0,
            temperature:    1.0,
            seed:           1,
            device:         DeviceKind::Cpu,
        });
        assert!(result.is_err());
    }
}
