// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Two subcommands: `train` and `generate`.
//
// The clap argument structs convert into the application
// configs with From, so the application layer never sees
// clap types.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::application::{generate_use_case::GenerateConfig, train_use_case::FinetuneConfig};
use crate::data::loader::{parse_delimiter, MalformedRowPolicy};
use crate::ml::{backend::DeviceKind, evaluator::EvalFeed, trainer::OptimizerKind};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fine-tune a causal language model on (source, target) pairs
    Train(TrainArgs),

    /// Continue a source utterance with a fine-tuned checkpoint
    Generate(GenerateArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OptimizerArg {
    Adam,
    Sgd,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum DeviceArg {
    Cpu,
    Wgpu,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum FeedArg {
    /// Extend evaluation inputs with the model's own prediction
    #[value(name = "self")]
    SelfFed,
    /// Extend evaluation inputs with the true target token
    Teacher,
}

impl From<OptimizerArg> for OptimizerKind {
    fn from(a: OptimizerArg) -> Self {
        match a {
            OptimizerArg::Adam => OptimizerKind::Adam,
            OptimizerArg::Sgd  => OptimizerKind::Sgd,
        }
    }
}

impl From<DeviceArg> for DeviceKind {
    fn from(a: DeviceArg) -> Self {
        match a {
            DeviceArg::Cpu  => DeviceKind::Cpu,
            DeviceArg::Wgpu => DeviceKind::Wgpu,
        }
    }
}

impl From<FeedArg> for EvalFeed {
    fn from(a: FeedArg) -> Self {
        match a {
            FeedArg::SelfFed => EvalFeed::SelfFed,
            FeedArg::Teacher => EvalFeed::TeacherForced,
        }
    }
}

/// Arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Delimited file of (source, target) rows with a header
    #[arg(long, default_value = "data/dialogue_data.tsv")]
    pub train_file: PathBuf,

    /// Separate validation file; without it the training file is
    /// split (--valid-fraction) or reused
    #[arg(long)]
    pub valid_file: Option<PathBuf>,

    /// Share of the training pairs held out for validation
    #[arg(long, default_value_t = 0.0)]
    pub valid_fraction: f64,

    /// Field delimiter: `tab`, `comma` or one character
    #[arg(long, default_value = "tab", value_parser = parse_delimiter)]
    pub delimiter: u8,

    /// Skip rows with the wrong field count instead of aborting
    #[arg(long)]
    pub skip_malformed: bool,

    #[arg(long, default_value_t = 2)]
    pub epochs: usize,

    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,

    /// Linear warmup length in position steps (0 = constant lr)
    #[arg(long, default_value_t = 1000)]
    pub lr_warmup: usize,

    /// Token limit for sources and targets; 0 derives it from the data
    #[arg(long, default_value_t = 64)]
    pub max_length: usize,

    /// Gradient norm clip; 0 disables clipping
    #[arg(long, default_value_t = 1.0)]
    pub grad_clip: f32,

    #[arg(long, value_enum, default_value_t = OptimizerArg::Adam)]
    pub optimizer: OptimizerArg,

    /// SGD momentum
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,

    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    #[arg(long, value_enum, default_value_t = DeviceArg::Cpu)]
    pub device: DeviceArg,

    /// Which token extends the input during evaluation
    #[arg(long, value_enum, default_value_t = FeedArg::SelfFed)]
    pub eval_feed: FeedArg,

    /// Nucleus sampling threshold; 1.0 or more is greedy
    #[arg(long, default_value_t = 0.9)]
    pub top_p: f32,

    /// Sampling temperature; 0 is greedy
    #[arg(long, default_value_t = 1.0)]
    pub temperature: f32,

    /// tokenizer.json to use instead of building one
    #[arg(long)]
    pub tokenizer: Option<PathBuf>,

    /// Vocabulary size of a tokenizer built from the corpus
    #[arg(long, default_value_t = 50_000)]
    pub vocab_size: usize,

    /// Checkpoint directory of the model to fine-tune
    #[arg(long)]
    pub pretrained: Option<PathBuf>,

    #[arg(long, default_value_t = 256)]
    pub context_len: usize,

    #[arg(long, default_value_t = 256)]
    pub d_model: usize,

    #[arg(long, default_value_t = 8)]
    pub num_heads: usize,

    #[arg(long, default_value_t = 6)]
    pub num_layers: usize,

    #[arg(long, default_value_t = 1024)]
    pub d_ff: usize,

    #[arg(long, default_value_t = 0.0)]
    pub dropout: f64,

    /// Where the fine-tuned model, configs and tokenizer are written
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Do not write any checkpoint
    #[arg(long)]
    pub no_checkpoint: bool,

    /// Also save weights after every epoch
    #[arg(long)]
    pub save_every_epoch: bool,

    /// Append-only epoch loss log
    #[arg(long, default_value = "training_logs/loss.tsv")]
    pub log_file: PathBuf,

    #[arg(long, default_value = "training_logs/loss.png")]
    pub plot_file: PathBuf,

    /// Show a progress bar over training batches
    #[arg(long)]
    pub progress: bool,
}

impl From<TrainArgs> for FinetuneConfig {
    fn from(a: TrainArgs) -> Self {
        FinetuneConfig {
            train_file:       a.train_file,
            valid_file:       a.valid_file,
            valid_fraction:   a.valid_fraction,
            delimiter:        a.delimiter,
            on_malformed:     if a.skip_malformed { MalformedRowPolicy::Skip } else { MalformedRowPolicy::Abort },
            tokenizer:        a.tokenizer,
            vocab_size:       a.vocab_size,
            epochs:           a.epochs,
            batch_size:       a.batch_size,
            lr:               a.lr,
            lr_warmup:        a.lr_warmup,
            max_length:       a.max_length,
            grad_clip:        a.grad_clip,
            optimizer:        a.optimizer.into(),
            momentum:         a.momentum,
            seed:             a.seed,
            device:           a.device.into(),
            eval_feed:        a.eval_feed.into(),
            top_p:            a.top_p,
            temperature:      a.temperature,
            pretrained:       a.pretrained,
            context_len:      a.context_len,
            d_model:          a.d_model,
            num_heads:        a.num_heads,
            num_layers:       a.num_layers,
            d_ff:             a.d_ff,
            dropout:          a.dropout,
            checkpoint_dir:   (!a.no_checkpoint).then_some(a.checkpoint_dir),
            save_every_epoch: a.save_every_epoch,
            log_file:         a.log_file,
            plot_file:        Some(a.plot_file),
            progress:         a.progress,
        }
    }
}

/// Arguments for the `generate` command.
#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// The utterance to reply to
    #[arg(long)]
    pub source: String,

    /// Directory written by `train`
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// tokenizer.json, if not the one in the checkpoint dir
    #[arg(long)]
    pub tokenizer: Option<PathBuf>,

    #[arg(long, default_value_t = 32)]
    pub max_new_tokens: usize,

    #[arg(long, default_value_t = 0.9)]
    pub top_p: f32,

    #[arg(long, default_value_t = 1.0)]
    pub temperature: f32,

    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    #[arg(long, value_enum, default_value_t = DeviceArg::Cpu)]
    pub device: DeviceArg,
}

impl From<GenerateArgs> for GenerateConfig {
    fn from(a: GenerateArgs) -> Self {
        GenerateConfig {
            checkpoint_dir: a.checkpoint_dir,
            tokenizer:      a.tokenizer,
            max_new_tokens: a.max_new_tokens,
            top_p:          a.top_p,
            temperature:    a.temperature,
            seed:           a.seed,
            device:         a.device.into(),
        }
    }
}
