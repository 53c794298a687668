use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use crate::domain::dialogue_pair::DialoguePair;
use crate::domain::error::FinetuneResult;
use crate::domain::traits::TextCodec;

/// One dialogue pair together with its encoded token ids.
/// Ids are stored untruncated; the batcher applies the
/// maximum-length policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueSample {
    pub pair:       DialoguePair,
    pub source_ids: Vec<u32>,
    pub target_ids: Vec<u32>,
}

pub struct DialogueDataset {
    samples: Vec<DialogueSample>,
}

impl DialogueDataset {
    pub fn new(samples: Vec<DialogueSample>) -> Self { Self { samples } }

    /// Encode every pair with `codec`, keeping file order.
    pub fn encode<C: TextCodec + ?Sized>(pairs: Vec<DialoguePair>, codec: &C) -> FinetuneResult<Self> {
        let samples = pairs
            .into_iter()
            .map(|pair| {
                let source_ids = codec.encode(&pair.source)?;
                let target_ids = codec.encode(&pair.target)?;
                Ok(DialogueSample { pair, source_ids, target_ids })
            })
            .collect::<FinetuneResult<Vec<_>>>()?;
        Ok(Self { samples })
    }

    pub fn sample_count(&self) -> usize { self.samples.len() }

    /// Longest encoded source, in tokens.
    pub fn longest_source(&self) -> usize {
        self.samples.iter().map(|s| s.source_ids.len()).max().unwrap_or(0)
    }
}

impl Dataset<DialogueSample> for DialogueDataset {
    fn get(&self, index: usize) -> Option<DialogueSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
