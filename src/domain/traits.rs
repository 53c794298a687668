// ============================================================
// Layer 3 — Core Traits
// ============================================================
// Seams between the loops and their collaborators:
//
//   PairSource — anything that yields dialogue pairs
//                (DelimitedLoader reads a CSV/TSV file)
//   TextCodec  — text <-> token ids plus the pad id
//                (DialogueTokenizer wraps a HuggingFace tokenizer)

use crate::domain::dialogue_pair::DialoguePair;
use crate::domain::error::FinetuneResult;

/// Any component that can load dialogue pairs.
pub trait PairSource {
    fn load_all(&self) -> FinetuneResult<Vec<DialoguePair>>;
}

/// Deterministic text encoding used by both loops.
pub trait TextCodec {
    fn encode(&self, text: &str) -> FinetuneResult<Vec<u32>>;

    fn decode(&self, ids: &[u32]) -> FinetuneResult<String>;

    /// Id used to pad variable-length sequences. Never a real
    /// vocabulary token.
    fn pad_id(&self) -> u32;

    /// Number of ids the model must be able to embed, pad included.
    fn vocab_size(&self) -> usize;
}
