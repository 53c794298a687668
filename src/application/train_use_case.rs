// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates one fine-tuning run in order:
//
//   Step 1: Load training pairs          (Layer 4 - data)
//   Step 2: Pick validation pairs        (Layer 4 - data)
//   Step 3: Load or build tokenizer      (Layer 6 - infra)
//   Step 4: Encode datasets              (Layer 4 - data)
//   Step 5: Resolve max_length           (Layer 4 - data)
//   Step 6: Checkpoint dir + run config  (Layer 6 - infra)
//   Step 7: Metrics log                  (Layer 6 - infra)
//   Step 8: Run training loop            (Layer 5 - ml)

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::{
    batcher::derive_max_length,
    dataset::DialogueDataset,
    loader::{DelimitedLoader, MalformedRowPolicy},
    splitter::split_train_val,
};
use crate::domain::{
    dialogue_pair::DialoguePair,
    epoch_record::EpochRecord,
    error::{FinetuneError, FinetuneResult},
    traits::{PairSource, TextCodec},
};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::MetricsReporter,
    tokenizer_store::{DialogueTokenizer, TokenizerStore, TOKENIZER_FILE},
};
use crate::ml::{
    backend::DeviceKind,
    evaluator::EvalFeed,
    trainer::{run_training, OptimizerKind, TrainingRun},
};

// ─── Fine-tuning Configuration ───────────────────────────────────────────────
// Everything a run needs, built from the CLI and passed down
// explicitly. Saved as finetune_config.json next to the
// checkpoint for reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinetuneConfig {
    // data
    pub train_file:       PathBuf,
    pub valid_file:       Option<PathBuf>,
    /// Share of the training file held out when no validation
    /// file is given; 0.0 validates on the training pairs.
    pub valid_fraction:   f64,
    pub delimiter:        u8,
    pub on_malformed:     MalformedRowPolicy,

    // tokenizer
    pub tokenizer:        Option<PathBuf>,
    /// Vocabulary size of a tokenizer built from the corpus
    pub vocab_size:       usize,

    // training
    pub epochs:           usize,
    pub batch_size:       usize,
    pub lr:               f64,
    pub lr_warmup:        usize,
    /// 0 derives it as twice the longest encoded source
    pub max_length:       usize,
    /// Gradient norm clip; 0.0 disables clipping
    pub grad_clip:        f32,
    pub optimizer:        OptimizerKind,
    pub momentum:         f64,
    pub seed:             u64,
    pub device:           DeviceKind,

    // evaluation
    pub eval_feed:        EvalFeed,
    pub top_p:            f32,
    pub temperature:      f32,

    // model shape, used when no pretrained checkpoint is given
    pub pretrained:       Option<PathBuf>,
    pub context_len:      usize,
    pub d_model:          usize,
    pub num_heads:        usize,
    pub num_layers:       usize,
    pub d_ff:             usize,
    pub dropout:          f64,

    // outputs
    pub checkpoint_dir:   Option<PathBuf>,
    pub save_every_epoch: bool,
    pub log_file:         PathBuf,
    pub plot_file:        Option<PathBuf>,
    pub progress:         bool,
}

impl Default for FinetuneConfig {
    fn default() -> Self {
        Self {
            train_file:       PathBuf::from("data/dialogue_data.tsv"),
            valid_file:       None,
            valid_fraction:   0.0,
            delimiter:        b'\t',
            on_malformed:     MalformedRowPolicy::Abort,
            tokenizer:        None,
            vocab_size:       50_000,
            epochs:           2,
            batch_size:       4,
            lr:               1e-4,
            lr_warmup:        1000,
            max_length:       64,
            grad_clip:        1.0,
            optimizer:        OptimizerKind::Adam,
            momentum:         0.9,
            seed:             1,
            device:           DeviceKind::Cpu,
            eval_feed:        EvalFeed::SelfFed,
            top_p:            0.9,
            temperature:      1.0,
            pretrained:       None,
            context_len:      256,
            d_model:          256,
            num_heads:        8,
            num_layers:       6,
            d_ff:             1024,
            dropout:          0.0,
            checkpoint_dir:   Some(PathBuf::from("checkpoints")),
            save_every_epoch: false,
            log_file:         PathBuf::from("training_logs/loss.tsv"),
            plot_file:        Some(PathBuf::from("training_logs/loss.png")),
            progress:         false,
        }
    }
}

impl FinetuneConfig {
    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> FinetuneResult<()> {
        let fail = |msg: String| Err(FinetuneError::Config(msg));

        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".into());
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return fail(format!("lr must be positive, got {}", self.lr));
        }
        if !(0.0..1.0).contains(&self.valid_fraction) {
            return fail(format!("valid_fraction must be in [0, 1), got {}", self.valid_fraction));
        }
        if !(self.top_p > 0.0) || self.temperature < 0.0 {
            return fail(format!(
                "top_p must be > 0 and temperature >= 0, got top_p={} temperature={}",
                self.top_p, self.temperature,
            ));
        }
        if self.grad_clip < 0.0 {
            return fail(format!("grad_clip must be >= 0, got {}", self.grad_clip));
        }
        if self.pretrained.is_none() {
            if self.num_heads == 0 || self.d_model % self.num_heads != 0 {
                return fail(format!(
                    "d_model ({}) must be divisible by num_heads ({})",
                    self.d_model, self.num_heads,
                ));
            }
            if self.context_len == 0 {
                return fail("context_len must be at least 1".into());
            }
        }
        Ok(())
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: FinetuneConfig,
}

impl TrainUseCase {
    pub fn new(config: FinetuneConfig) -> Self {
        Self { config }
    }

    /// Run the whole pipeline; returns one record per epoch.
    pub fn execute(&self) -> Result<Vec<EpochRecord>> {
        let cfg = &self.config;
        cfg.validate()?;

        // ── Step 1: Load training pairs ──────────────────────────────────────
        tracing::info!("Loading training pairs from '{}'", cfg.train_file.display());
        let pairs = DelimitedLoader::new(&cfg.train_file, cfg.delimiter, cfg.on_malformed)
            .load_all()
            .with_context(|| format!("Cannot load '{}'", cfg.train_file.display()))?;
        if pairs.is_empty() {
            return Err(FinetuneError::Config(format!(
                "'{}' contains no dialogue pairs", cfg.train_file.display()
            ))
            .into());
        }

        // ── Step 2: Validation pairs ─────────────────────────────────────────
        let (train_pairs, valid_pairs) = self.validation_pairs(pairs)?;
        tracing::info!("Split: {} train, {} validation", train_pairs.len(), valid_pairs.len());

        // ── Step 3: Load or build tokenizer ──────────────────────────────────
        let tok_store = TokenizerStore::new(cfg.checkpoint_dir.clone());
        let corpus: Vec<String> = train_pairs
            .iter()
            .flat_map(|p| [p.source.clone(), p.target.clone()])
            .collect();
        let raw_tokenizer = tok_store.load_or_build(&self.tokenizer_candidates(), &corpus, cfg.vocab_size)?;
        let tokenizer     = DialogueTokenizer::new(raw_tokenizer)?;
        tok_store.save(tokenizer.inner())?;
        tracing::info!(
            "Tokenizer ready: {} ids, pad id {}",
            tokenizer.vocab_size(),
            tokenizer.pad_id(),
        );

        // ── Step 4: Encode datasets ──────────────────────────────────────────
        let train_dataset = DialogueDataset::encode(train_pairs, &tokenizer)?;
        let valid_dataset = DialogueDataset::encode(valid_pairs, &tokenizer)?;

        // ── Step 5: Maximum sequence length ──────────────────────────────────
        let max_length = match cfg.max_length {
            0 => {
                let derived = derive_max_length(&train_dataset);
                tracing::info!("max_length derived from the data: {}", derived);
                derived
            }
            n => n,
        };

        // ── Step 6: Checkpoint dir + run config ──────────────────────────────
        let checkpoint = cfg
            .checkpoint_dir
            .as_ref()
            .map(CheckpointManager::new)
            .transpose()?;
        if let Some(ckpt) = &checkpoint {
            ckpt.save_config(cfg)?;
        }

        // ── Step 7: Metrics log ──────────────────────────────────────────────
        let metrics = MetricsReporter::new(&cfg.log_file, cfg.plot_file.clone())?;

        // ── Step 8: Train ────────────────────────────────────────────────────
        run_training(TrainingRun {
            cfg,
            tokenizer: &tokenizer,
            train_dataset,
            valid_dataset,
            max_length,
            checkpoint,
            metrics,
        })
    }

    fn validation_pairs(&self, pairs: Vec<DialoguePair>) -> Result<(Vec<DialoguePair>, Vec<DialoguePair>)> {
        let cfg = &self.config;
        if let Some(path) = &cfg.valid_file {
            tracing::info!("Loading validation pairs from '{}'", path.display());
            let valid = DelimitedLoader::new(path, cfg.delimiter, cfg.on_malformed)
                .load_all()
                .with_context(|| format!("Cannot load '{}'", path.display()))?;
            return Ok((pairs, valid));
        }
        if cfg.valid_fraction > 0.0 {
            let (train, valid) = split_train_val(pairs, cfg.valid_fraction, cfg.seed);
            if train.is_empty() {
                return Err(FinetuneError::Config(format!(
                    "valid_fraction {} leaves no training pairs", cfg.valid_fraction
                ))
                .into());
            }
            return Ok((train, valid));
        }
        tracing::info!("No validation file: validating on the training pairs");
        Ok((pairs.clone(), pairs))
    }

    /// Explicit file, then the pretrained dir. The output dir is
    /// left out: it is overwritten by this run, not read.
    fn tokenizer_candidates(&self) -> Vec<PathBuf> {
        let cfg = &self.config;
        cfg.tokenizer
            .iter()
            .cloned()
            .chain(cfg.pretrained.iter().map(|d| d.join(TOKENIZER_FILE)))
            .collect()
    }
}
