// ============================================================
// Layer 4 — Dialogue Batcher
// ============================================================
// Implements Burn's Batcher trait to group DialogueSamples
// into a DialogueBatch for one iteration of the loops.
//
// Unlike a classification batcher this one does not build
// tensors: both loops grow every input sequence by one token
// per position step, so the batch keeps its sequences as host
// vectors and the model adapter pads them into a tensor right
// before each forward pass.
//
// The maximum-length policy is applied here, before any
// scoring happens:
//   source longer than max_length → first max_length tokens
//   target longer than max_length → first max_length tokens
//   shorter sequences             → untouched

use std::sync::Arc;

use burn::data::{
    dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
    dataset::Dataset,
};

use crate::data::dataset::{DialogueDataset, DialogueSample};
use crate::domain::dialogue_pair::DialoguePair;

/// Pairs of one batch and their truncated token sequences,
/// in processing order.
#[derive(Debug, Clone)]
pub struct DialogueBatch {
    pub pairs:   Vec<DialoguePair>,
    pub sources: Vec<Vec<u32>>,
    pub targets: Vec<Vec<u32>>,
}

impl DialogueBatch {
    pub fn len(&self) -> usize { self.pairs.len() }

    pub fn is_empty(&self) -> bool { self.pairs.is_empty() }

    /// Number of position steps the loops run for this batch.
    pub fn longest_target(&self) -> usize {
        self.targets.iter().map(Vec::len).max().unwrap_or(0)
    }
}

#[derive(Clone, Debug)]
pub struct DialogueBatcher {
    max_length: usize,
}

impl DialogueBatcher {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl Batcher<DialogueSample, DialogueBatch> for DialogueBatcher {
    fn batch(&self, items: Vec<DialogueSample>) -> DialogueBatch {
        let mut pairs   = Vec::with_capacity(items.len());
        let mut sources = Vec::with_capacity(items.len());
        let mut targets = Vec::with_capacity(items.len());

        for item in items {
            sources.push(truncate(item.source_ids, self.max_length));
            targets.push(truncate(item.target_ids, self.max_length));
            pairs.push(item.pair);
        }

        DialogueBatch { pairs, sources, targets }
    }
}

/// Keep the first `max_length` tokens of `seq`.
pub fn truncate(mut seq: Vec<u32>, max_length: usize) -> Vec<u32> {
    seq.truncate(max_length);
    seq
}

/// Maximum length used when none is configured:
/// twice the longest encoded source.
pub fn derive_max_length(dataset: &DialogueDataset) -> usize {
    (dataset.longest_source() * 2).max(1)
}

/// Build a burn DataLoader over `dataset`. `shuffle_seed` is
/// set for training and left `None` for validation so file
/// order is kept.
pub fn build_loader(
    dataset:      DialogueDataset,
    batch_size:   usize,
    max_length:   usize,
    shuffle_seed: Option<u64>,
) -> Arc<dyn DataLoader<DialogueBatch>> {
    tracing::debug!(
        "Building loader over {} samples (batch_size={}, max_length={}, shuffle={:?})",
        dataset.len(), batch_size, max_length, shuffle_seed,
    );
    let builder = DataLoaderBuilder::new(DialogueBatcher::new(max_length))
        .batch_size(batch_size.max(1));
    match shuffle_seed {
        Some(seed) => builder.shuffle(seed).build(dataset),
        None       => builder.build(dataset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(src: &[u32], trg: &[u32]) -> DialogueSample {
        DialogueSample {
            pair:       DialoguePair::new("s", "t"),
            source_ids: src.to_vec(),
            target_ids: trg.to_vec(),
        }
    }

    #[test]
    fn test_truncates_to_exact_max_length() {
        let long: Vec<u32> = (0..50).collect();
        let out = truncate(long, 20);
        assert_eq!(out.len(), 20);
        assert_eq!(out, (0..20).collect::<Vec<u32>>());
    }

    #[test]
    fn test_shorter_sequences_untouched() {
        assert_eq!(truncate(vec![4, 5, 6], 20), vec![4, 5, 6]);
    }

    #[test]
    fn test_batch_truncates_sources_and_targets() {
        let batcher = DialogueBatcher::new(3);
        let batch = batcher.batch(vec![
            sample(&[1, 2, 3, 4, 5], &[6, 7]),
            sample(&[8], &[9, 10, 11, 12]),
        ]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.sources, vec![vec![1, 2, 3], vec![8]]);
        assert_eq!(batch.targets, vec![vec![6, 7], vec![9, 10, 11]]);
        assert_eq!(batch.longest_target(), 3);
    }

    #[test]
    fn test_loader_covers_every_pair() {
        let samples: Vec<DialogueSample> = (0..11u32)
            .map(|i| sample(&[i, i + 1], &[i]))
            .collect();
        let loader = build_loader(DialogueDataset::new(samples), 4, 8, Some(3));

        let sizes: Vec<usize> = loader.iter().map(|b| b.len()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 11);
        assert_eq!(sizes.len(), 3);
        // only the final batch may be shorter
        assert!(sizes[..2].iter().all(|&n| n == 4));
    }

    #[test]
    fn test_unshuffled_loader_keeps_file_order() {
        let samples: Vec<DialogueSample> = (0..5u32).map(|i| sample(&[i], &[i])).collect();
        let loader = build_loader(DialogueDataset::new(samples), 2, 8, None);
        let order: Vec<u32> = loader
            .iter()
            .flat_map(|b| b.sources.into_iter().map(|s| s[0]))
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_derive_max_length_doubles_longest_source() {
        let ds = DialogueDataset::new(vec![sample(&[1, 2, 3], &[1]), sample(&[1], &[1])]);
        assert_eq!(derive_max_length(&ds), 6);
    }
}
