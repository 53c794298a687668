// ============================================================
// Layer 5 — Evaluation Loop
// ============================================================
// Mirrors the training loop without parameter updates and
// without stepping the lr schedule. It runs on the inner
// (non-autodiff) backend, so nothing is tracked for gradients.
//
// The input rows are extended with the model's own choice
// (EvalFeed::SelfFed, the default) so the loss measures
// free-running generation. EvalFeed::TeacherForced appends the
// true token instead, which gives a validation loss directly
// comparable to the training loss.

use burn::{data::dataloader::DataLoader, prelude::*};
use serde::{Deserialize, Serialize};

use crate::data::batcher::DialogueBatch;
use crate::domain::{epoch_record::LossAccumulator, error::FinetuneResult, traits::TextCodec};
use crate::ml::{
    adapter::{logits_to_rows, masked_nll, next_token_logits, scalar},
    model::CausalLm,
    sampling::Sampler,
    trainer::LoopSummary,
};

/// Which token extends the input during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvalFeed {
    #[default]
    SelfFed,
    TeacherForced,
}

/// One decoded validation row, for qualitative inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedExample {
    pub source:    String,
    pub target:    String,
    pub generated: String,
}

pub struct EvaluationLoop {
    sampler:     Sampler,
    feed:        EvalFeed,
    pad_id:      u32,
    accumulator: LossAccumulator,
}

impl EvaluationLoop {
    pub fn new(sampler: Sampler, feed: EvalFeed, pad_id: u32) -> Self {
        Self { sampler, feed, pad_id, accumulator: LossAccumulator::new() }
    }

    /// One full pass over `loader`. The example is the first row
    /// of the last batch.
    pub fn evaluate<B: Backend, C: TextCodec + ?Sized>(
        &mut self,
        model:  &CausalLm<B>,
        loader: &dyn DataLoader<DialogueBatch>,
        codec:  &C,
        device: &B::Device,
    ) -> FinetuneResult<(LoopSummary, Option<GeneratedExample>)> {
        self.accumulator.reset();
        let mut positions = 0usize;
        let mut example   = None;

        for batch in loader.iter() {
            let (inputs, steps) = self.evaluate_batch(model, &batch, device)?;
            positions += steps;

            if let (Some(pair), Some(row)) = (batch.pairs.first(), inputs.first()) {
                let continuation = &row[batch.sources[0].len().min(row.len())..];
                example = Some(GeneratedExample {
                    source:    pair.source.clone(),
                    target:    pair.target.clone(),
                    generated: codec.decode(continuation)?,
                });
            }
        }

        let summary = LoopSummary {
            loss:      self.accumulator.total(),
            positions,
            skipped:   self.accumulator.skipped(),
        };
        Ok((summary, example))
    }

    /// Position steps over one batch; returns the extended input
    /// rows and the number of steps run.
    fn evaluate_batch<B: Backend>(
        &mut self,
        model:  &CausalLm<B>,
        batch:  &DialogueBatch,
        device: &B::Device,
    ) -> FinetuneResult<(Vec<Vec<u32>>, usize)> {
        let mut inputs = batch.sources.clone();
        let steps      = batch.longest_target();

        for i in 0..steps {
            let targets: Vec<Option<u32>> = batch.targets.iter().map(|t| t.get(i).copied()).collect();

            let logits = next_token_logits(model, &inputs, self.pad_id, device);
            if let Some(loss) = masked_nll(logits.clone(), &targets, device) {
                let value = scalar(&loss);
                if !self.accumulator.add(value) {
                    tracing::warn!("non-finite validation loss {value} at position {i}; excluded");
                }
            }

            let rows = match self.feed {
                EvalFeed::SelfFed       => Some(logits_to_rows(logits)?),
                EvalFeed::TeacherForced => None,
            };
            for (r, (seq, target)) in inputs.iter_mut().zip(&targets).enumerate() {
                let Some(truth) = target else { continue };
                let next = match &rows {
                    Some(rows) => self.sampler.sample(&rows[r], Some(self.pad_id)),
                    None       => *truth,
                };
                seq.push(next);
            }
        }
        Ok((inputs, steps))
    }
}
