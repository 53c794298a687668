// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores fine-tuned weights with Burn's named
// MessagePack + gzip recorder at full precision, so a later
// run resumes from exactly the weights training produced.
//
// Directory layout:
//   <dir>/
//     model_config.json      ← CausalLmConfig, to rebuild the model
//     finetune_config.json   ← the run configuration, for reference
//     model_epoch_<n>.mpk.gz ← weights after epoch n
//     latest_epoch.json      ← number of the newest weights file
//     tokenizer.json         ← written by the tokenizer store
//
// Loading needs model_config.json first: the recorder only
// restores parameters into a model of the matching shape.

use std::{fs, path::{Path, PathBuf}};

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};

use crate::application::train_use_case::FinetuneConfig;
use crate::domain::error::{FinetuneError, FinetuneResult};
use crate::ml::model::{CausalLm, CausalLmConfig};

const MODEL_CONFIG_FILE:    &str = "model_config.json";
const FINETUNE_CONFIG_FILE: &str = "finetune_config.json";
const LATEST_EPOCH_FILE:    &str = "latest_epoch.json";

type CheckpointRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Output checkpoint dir; created if missing.
    pub fn new(dir: impl Into<PathBuf>) -> FinetuneResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| FinetuneError::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// Existing checkpoint dir, read-only use.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the weights of `model` as epoch `epoch` and point
    /// latest_epoch.json at them.
    pub fn save_model<B: Backend>(&self, model: &CausalLm<B>, epoch: usize) -> Result<()> {
        let path = self.dir.join(format!("model_epoch_{epoch}"));

        CheckpointRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        let latest = self.dir.join(LATEST_EPOCH_FILE);
        fs::write(&latest, serde_json::to_string(&epoch)?)
            .with_context(|| format!("Failed to write '{}'", latest.display()))?;

        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// Restore the newest weights into `model`.
    pub fn load_model<B: Backend>(&self, model: CausalLm<B>, device: &B::Device) -> Result<CausalLm<B>> {
        let epoch = self.latest_epoch()?;
        let path  = self.dir.join(format!("model_epoch_{epoch}"));
        tracing::info!("Loading checkpoint from epoch {}", epoch);

        let record = CheckpointRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!("Cannot load checkpoint '{}'. Have you trained the model first?", path.display())
            })?;
        Ok(model.load_record(record))
    }

    pub fn save_model_config(&self, cfg: &CausalLmConfig) -> Result<()> {
        let path = self.dir.join(MODEL_CONFIG_FILE);
        cfg.save(&path)
            .with_context(|| format!("Cannot write model config to '{}'", path.display()))?;
        tracing::debug!("Saved model config to '{}'", path.display());
        Ok(())
    }

    pub fn load_model_config(&self) -> Result<CausalLmConfig> {
        let path = self.dir.join(MODEL_CONFIG_FILE);
        CausalLmConfig::load(&path).map_err(|e| {
            anyhow::anyhow!(
                "Cannot read model config from '{}': {e}. Is this a checkpoint directory?",
                path.display()
            )
        })
    }

    pub fn save_config(&self, cfg: &FinetuneConfig) -> Result<()> {
        let path = self.dir.join(FINETUNE_CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved run config to '{}'", path.display());
        Ok(())
    }

    fn latest_epoch(&self) -> Result<usize> {
        let path = self.dir.join(LATEST_EPOCH_FILE);
        let s = fs::read_to_string(&path)
            .with_context(|| format!("Cannot find '{}'. Have you run 'train' first?", path.display()))?;
        Ok(serde_json::from_str::<usize>(&s)?)
    }
}
