// ============================================================
// Layer 3 — DialoguePair Domain Type
// ============================================================
// One conversational turn: the utterance the model is given
// (source) and the reply it should learn to produce (target).
// Created by the loader when a data row is parsed and never
// mutated afterwards.

use serde::{Deserialize, Serialize};

/// A (source utterance, target utterance) pair of raw text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialoguePair {
    pub source: String,
    pub target: String,
}

impl DialoguePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}
