// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses the command line with clap and routes to the use
// cases in Layer 2. Only routing and printing happen here.
//
//   1. `train`    — fine-tunes the model on dialogue pairs
//   2. `generate` — replies to one utterance from a checkpoint

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, GenerateArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "dialogue-finetune",
    version = "0.1.0",
    about = "Fine-tune a causal language model on dialogue pairs, then generate replies."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Generate(args) => run_generate(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting fine-tuning on: {}", args.train_file.display());
    let log_file = args.log_file.clone();

    let records = TrainUseCase::new(args.into()).execute()?;

    if let Some(last) = records.last() {
        println!(
            "Fine-tuning complete after {} epochs: train_loss={:.4} val_loss={:.4}. Losses logged to '{}'.",
            records.len(), last.training_loss, last.validation_loss, log_file.display(),
        );
    } else {
        println!("No epochs were run.");
    }
    Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    use crate::application::generate_use_case::GenerateUseCase;

    let source   = args.source.clone();
    let use_case = GenerateUseCase::new(args.into())?;
    let reply    = use_case.generate(&source)?;
    println!("\nReply: {}", reply);
    Ok(())
}
