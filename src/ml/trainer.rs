// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Teacher-forced fine-tuning, one token position at a time.
//
// Per epoch:
//   EpochStart   → reset the loss accumulator, log the lr
//   BatchStart   → next DialogueBatch (already truncated)
//   PositionStep → for i in 0..longest target:
//                    forward on the current inputs
//                    log-softmax at the last position
//                    NLL against target[i]
//                    finite?  accumulate, backward, optimizer
//                             step, advance lr schedule
//                    append target[i] to every input row
//   BatchEnd     → next batch or EpochEnd
//   EpochEnd     → accumulator total is the training loss
//
// Validation runs on model.valid(), which lives on the inner
// backend: no autodiff graph, so no gradient memory growth.

use std::time::Instant;

use anyhow::{Context, Result};
use burn::{
    data::dataloader::DataLoader,
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    optim::{momentum::MomentumConfig, AdamConfig, GradientsParams, Optimizer, SgdConfig},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use crate::application::train_use_case::FinetuneConfig;
use crate::data::{batcher::{build_loader, DialogueBatch}, dataset::DialogueDataset};
use crate::domain::{
    epoch_record::{EpochRecord, LossAccumulator},
    error::FinetuneError,
    traits::TextCodec,
};
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsReporter, tokenizer_store::DialogueTokenizer};
use crate::ml::{
    adapter::{masked_nll, next_token_logits, scalar},
    backend::{self, Accelerator},
    evaluator::EvaluationLoop,
    model::{CausalLm, CausalLmConfig},
    sampling::{Sampler, SamplingStrategy},
    schedule::WarmupSchedule,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptimizerKind {
    #[default]
    Adam,
    /// SGD with momentum
    Sgd,
}

/// What one pass of a loop over its data produced.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopSummary {
    /// Sum of the finite per-step losses
    pub loss:      f64,
    /// Position steps run
    pub positions: usize,
    /// Steps whose loss was non-finite and excluded
    pub skipped:   usize,
}

/// Everything a training run needs besides the device.
pub struct TrainingRun<'a> {
    pub cfg:           &'a FinetuneConfig,
    pub tokenizer:     &'a DialogueTokenizer,
    pub train_dataset: DialogueDataset,
    pub valid_dataset: DialogueDataset,
    pub max_length:    usize,
    pub checkpoint:    Option<CheckpointManager>,
    pub metrics:       MetricsReporter,
}

pub fn run_training(run: TrainingRun<'_>) -> Result<Vec<EpochRecord>> {
    match backend::resolve(run.cfg.device) {
        Accelerator::Cpu => {
            let device = burn::backend::ndarray::NdArrayDevice::Cpu;
            tracing::info!("Using NdArray CPU device");
            train_loop::<backend::CpuAutodiff>(run, device)
        }
        #[cfg(feature = "wgpu")]
        Accelerator::Wgpu => {
            let device = burn::backend::wgpu::WgpuDevice::default();
            tracing::info!("Using WGPU device: {:?}", device);
            train_loop::<backend::WgpuAutodiff>(run, device)
        }
    }
}

fn train_loop<B: AutodiffBackend>(run: TrainingRun<'_>, device: B::Device) -> Result<Vec<EpochRecord>> {
    let cfg = run.cfg;
    B::seed(cfg.seed);

    // ── Build or load the model ───────────────────────────────────────────────
    let (model, model_cfg) = build_model::<B>(cfg, run.tokenizer, &device)?;
    tracing::info!(
        "Model ready: {} parameters, vocab={}, context={}",
        model.num_params(), model.vocab_size(), model.context_len,
    );
    if let Some(ckpt) = &run.checkpoint {
        ckpt.save_model_config(&model_cfg)?;
    }

    // ── Optimiser (gradient clipping lives in its config) ─────────────────────
    let clipping = (cfg.grad_clip > 0.0).then(|| GradientClippingConfig::Norm(cfg.grad_clip));
    match cfg.optimizer {
        OptimizerKind::Adam => {
            let optim = AdamConfig::new()
                .with_epsilon(1e-8)
                .with_grad_clipping(clipping)
                .init::<B, CausalLm<B>>();
            fit(run, model, optim, device)
        }
        OptimizerKind::Sgd => {
            let momentum = MomentumConfig::new()
                .with_momentum(cfg.momentum)
                .with_dampening(0.0);
            let optim = SgdConfig::new()
                .with_momentum(Some(momentum))
                .with_gradient_clipping(clipping)
                .init::<B, CausalLm<B>>();
            fit(run, model, optim, device)
        }
    }
}

fn fit<B, O>(run: TrainingRun<'_>, mut model: CausalLm<B>, optim: O, device: B::Device) -> Result<Vec<EpochRecord>>
where
    B: AutodiffBackend,
    O: Optimizer<CausalLm<B>, B>,
{
    let TrainingRun { cfg, tokenizer, train_dataset, valid_dataset, max_length, checkpoint, mut metrics } = run;

    let train_batches = train_dataset.sample_count().div_ceil(cfg.batch_size.max(1));
    tracing::info!(
        "{} training / {} validation pairs, max_length={}",
        train_dataset.sample_count(), valid_dataset.sample_count(), max_length,
    );

    let train_loader = build_loader(train_dataset, cfg.batch_size, max_length, Some(cfg.seed));
    let valid_loader = build_loader(valid_dataset, cfg.batch_size, max_length, None);

    let mut trainer = TrainingLoop::<B, O>::new(
        optim,
        WarmupSchedule::new(cfg.lr, cfg.lr_warmup),
        tokenizer.pad_id(),
        device.clone(),
    );
    let mut evaluator = EvaluationLoop::new(
        Sampler::new(SamplingStrategy::from_settings(cfg.top_p, cfg.temperature), cfg.seed),
        cfg.eval_feed,
        tokenizer.pad_id(),
    );

    let started = Instant::now();
    for epoch in 0..cfg.epochs {
        let epoch_start = Instant::now();
        tracing::info!("Epoch {}/{} | lr={:.3e}", epoch, cfg.epochs, trainer.current_lr());

        // ── Training phase ────────────────────────────────────────────────────
        let progress = progress_bar(cfg.progress, train_batches, epoch);
        let (trained, train) = trainer.train_epoch(model, train_loader.as_ref(), &progress);
        model = trained;
        progress.finish_and_clear();

        // ── Validation phase ──────────────────────────────────────────────────
        let model_valid = model.valid();
        let (valid, example) = evaluator
            .evaluate(&model_valid, valid_loader.as_ref(), tokenizer, &device)
            .context("Validation pass failed")?;

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} ({} steps, {} skipped) | val_loss={:.4} ({} steps, {} skipped)",
            epoch, cfg.epochs, train.loss, train.positions, train.skipped,
            valid.loss, valid.positions, valid.skipped,
        );
        if let Some(ex) = example {
            tracing::info!("Source given: {}", ex.source);
            tracing::info!("Target:       {}", ex.target);
            tracing::info!("Predicted:    {}", ex.generated);
        }

        metrics.record(epoch, train.loss, valid.loss)?;

        if let (Some(ckpt), true) = (&checkpoint, cfg.save_every_epoch) {
            ckpt.save_model(&model, epoch)?;
        }
        tracing::info!(
            "Per epoch training + validation time: {:.2} mins",
            epoch_start.elapsed().as_secs_f64() / 60.0,
        );
    }

    metrics.finalize()?;
    if let Some(ckpt) = &checkpoint {
        ckpt.save_model(&model, cfg.epochs.saturating_sub(1))?;
        tracing::info!("Final checkpoint written to '{}'", ckpt.dir().display());
    }

    tracing::info!(
        "Total training + validation time: {:.2} mins",
        started.elapsed().as_secs_f64() / 60.0,
    );
    Ok(metrics.history().to_vec())
}

/// Fresh model from the configured shape, or the latest
/// checkpoint of `cfg.pretrained`. Returns the shape alongside
/// so it can be saved next to the fine-tuned weights.
fn build_model<B: Backend>(
    cfg:       &FinetuneConfig,
    tokenizer: &DialogueTokenizer,
    device:    &B::Device,
) -> Result<(CausalLm<B>, CausalLmConfig)> {
    let needed = tokenizer.vocab_size();

    let (model, model_cfg) = match &cfg.pretrained {
        Some(dir) => {
            let ckpt      = CheckpointManager::open(dir);
            let model_cfg = ckpt.load_model_config()?;
            tracing::info!("Loading pretrained model from '{}'", dir.display());
            let model = ckpt.load_model(model_cfg.init::<B>(device), device)?;
            (model, model_cfg)
        }
        None => {
            let model_cfg = CausalLmConfig::new(
                needed, cfg.context_len, cfg.d_model,
                cfg.num_heads, cfg.num_layers, cfg.d_ff,
            )
            .with_dropout(cfg.dropout);
            (model_cfg.init::<B>(device), model_cfg)
        }
    };

    if model.vocab_size() < needed {
        return Err(FinetuneError::Config(format!(
            "model embeds {} tokens but the tokenizer (pad included) needs {}",
            model.vocab_size(), needed,
        ))
        .into());
    }
    Ok((model, model_cfg))
}

fn progress_bar(enabled: bool, batches: usize, epoch: usize) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(batches as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} batches ({eta})")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb.set_message(format!("epoch {epoch}"));
    pb
}

// ─── TrainingLoop ─────────────────────────────────────────────────────────────
/// Owns the optimizer, the lr schedule and the epoch's loss
/// accumulator. The model is moved through every optimizer
/// step and handed back to the caller.
pub struct TrainingLoop<B: AutodiffBackend, O> {
    optim:       O,
    schedule:    WarmupSchedule,
    pad_id:      u32,
    device:      B::Device,
    accumulator: LossAccumulator,
    positions:   usize,
}

impl<B, O> TrainingLoop<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<CausalLm<B>, B>,
{
    pub fn new(optim: O, schedule: WarmupSchedule, pad_id: u32, device: B::Device) -> Self {
        Self {
            optim,
            schedule,
            pad_id,
            device,
            accumulator: LossAccumulator::new(),
            positions:   0,
        }
    }

    pub fn current_lr(&self) -> f64 {
        self.schedule.current()
    }

    /// One full pass over `loader`.
    pub fn train_epoch(
        &mut self,
        mut model: CausalLm<B>,
        loader:    &dyn DataLoader<DialogueBatch>,
        progress:  &ProgressBar,
    ) -> (CausalLm<B>, LoopSummary) {
        self.accumulator.reset();
        self.positions = 0;

        for (i, batch) in loader.iter().enumerate() {
            model = self.train_batch(model, &batch);
            progress.inc(1);
            tracing::debug!(
                "batch {} | running loss per batch {:.4} over {} finite steps",
                i + 1,
                self.accumulator.total() / (i + 1) as f64,
                self.accumulator.steps(),
            );
        }

        let summary = LoopSummary {
            loss:      self.accumulator.total(),
            positions: self.positions,
            skipped:   self.accumulator.skipped(),
        };
        (model, summary)
    }

    /// Teacher-forced position steps over one batch.
    pub fn train_batch(&mut self, mut model: CausalLm<B>, batch: &DialogueBatch) -> CausalLm<B> {
        let mut inputs = batch.sources.clone();

        for i in 0..batch.longest_target() {
            let targets: Vec<Option<u32>> = batch.targets.iter().map(|t| t.get(i).copied()).collect();
            self.positions += 1;

            let logits = next_token_logits(&model, &inputs, self.pad_id, &self.device);
            if let Some(loss) = masked_nll(logits, &targets, &self.device) {
                let value = scalar(&loss);
                if self.accumulator.add(value) {
                    let grads = loss.backward();
                    let grads = GradientsParams::from_grads(grads, &model);
                    model = self.optim.step(self.schedule.current(), model, grads);
                    self.schedule.advance();
                } else {
                    let err = FinetuneError::LossComputation { step: self.schedule.steps_taken(), value };
                    tracing::warn!("{err}; excluded from the epoch loss, no update applied");
                }
            }

            // teacher forcing: feed the true token
            for (seq, target) in inputs.iter_mut().zip(&targets) {
                if let Some(t) = target {
                    seq.push(*t);
                }
            }
        }
        model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::DialogueSample;
    use crate::domain::dialogue_pair::DialoguePair;
    use crate::infra::tokenizer_store::test_tokenizer;
    use crate::ml::test_support::{backend_lock, nan_head, tiny_config, TestBackend};

    fn one_pair_batch(tok: &DialogueTokenizer, src: &str, trg: &str, max_length: usize) -> DialogueBatch {
        use burn::data::dataloader::batcher::Batcher;
        let sample = DialogueSample {
            pair:       DialoguePair::new(src, trg),
            source_ids: tok.encode(src).unwrap(),
            target_ids: tok.encode(trg).unwrap(),
        };
        crate::data::batcher::DialogueBatcher::new(max_length).batch(vec![sample])
    }

    #[test]
    fn test_one_position_step_per_target_token() {
        let _guard = backend_lock();
        let device = Default::default();
        let tok    = test_tokenizer();
        let model: CausalLm<TestBackend> = tiny_config(tok.vocab_size()).init(&device);

        let batch = one_pair_batch(&tok, "hello there", "hi back", 20);
        let expected = tok.encode("hi back").unwrap().len();

        let mut trainer = TrainingLoop::new(
            AdamConfig::new().init::<TestBackend, CausalLm<TestBackend>>(),
            WarmupSchedule::new(1e-3, 0),
            tok.pad_id(),
            device,
        );
        let _model = trainer.train_batch(model, &batch);

        assert_eq!(trainer.positions, expected);
        assert_eq!(trainer.accumulator.steps() + trainer.accumulator.skipped(), expected);
        assert!(trainer.accumulator.total() > 0.0);
        assert_eq!(trainer.schedule.steps_taken(), trainer.accumulator.steps());
    }

    #[test]
    fn test_truncated_target_limits_position_steps() {
        let _guard = backend_lock();
        let device = Default::default();
        let tok    = test_tokenizer();
        let model: CausalLm<TestBackend> = tiny_config(tok.vocab_size()).init(&device);

        let batch = one_pair_batch(&tok, "hello there", "fine thanks how are you", 2);
        let mut trainer = TrainingLoop::new(
            AdamConfig::new().init::<TestBackend, CausalLm<TestBackend>>(),
            WarmupSchedule::new(1e-3, 0),
            tok.pad_id(),
            device,
        );
        let _model = trainer.train_batch(model, &batch);
        assert_eq!(trainer.positions, 2);
    }

    #[test]
    fn test_training_reduces_loss_on_repeated_pair() {
        let _guard = backend_lock();
        let device = Default::default();
        let tok    = test_tokenizer();
        let mut model: CausalLm<TestBackend> = tiny_config(tok.vocab_size()).init(&device);

        let batch = one_pair_batch(&tok, "hello there", "hi back", 20);
        let mut trainer = TrainingLoop::new(
            AdamConfig::new().init::<TestBackend, CausalLm<TestBackend>>(),
            WarmupSchedule::new(1e-2, 0),
            tok.pad_id(),
            device,
        );

        trainer.accumulator.reset();
        model = trainer.train_batch(model, &batch);
        let first = trainer.accumulator.total();
        for _ in 0..30 {
            trainer.accumulator.reset();
            model = trainer.train_batch(model, &batch);
        }
        assert!(trainer.accumulator.total() < first);
    }

    #[test]
    fn test_non_finite_loss_is_excluded_without_update() {
        let _guard = backend_lock();
        let device = Default::default();
        let tok    = test_tokenizer();
        let model: CausalLm<TestBackend> = tiny_config(tok.vocab_size()).init(&device);
        let model  = nan_head(model, &device);

        let batch = one_pair_batch(&tok, "hello there", "hi back", 20);
        let expected = tok.encode("hi back").unwrap().len();

        let mut trainer = TrainingLoop::new(
            AdamConfig::new().init::<TestBackend, CausalLm<TestBackend>>(),
            WarmupSchedule::new(1e-3, 0),
            tok.pad_id(),
            device,
        );
        let model = trainer.train_batch(model, &batch);

        assert_eq!(trainer.positions, expected);
        assert_eq!(trainer.accumulator.skipped(), expected);
        assert_eq!(trainer.accumulator.steps(), 0);
        assert_eq!(trainer.accumulator.total(), 0.0);
        assert_eq!(trainer.schedule.steps_taken(), 0);

        // the run carries on with the same model
        let model = trainer.train_batch(model, &batch);
        assert_eq!(trainer.accumulator.skipped(), 2 * expected);
        assert_eq!(model.vocab_size(), tok.vocab_size());
    }
}
