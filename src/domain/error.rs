// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Typed failures a fine-tuning run can hit. The application
// and CLI layers wrap these in anyhow with extra context.
//
//   DataFormat      — malformed input row (abort or skip, per config)
//   Decode          — a row the CSV reader could not decode
//   LossComputation — non-finite loss, recovered by the loops
//   Device          — accelerator unavailable, recovered by CPU fallback
//   Io              — log / plot / checkpoint write failure, fatal

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FinetuneError {
    #[error("line {line}: expected {expected} fields, found {found}")]
    DataFormat {
        line:     u64,
        expected: usize,
        found:    usize,
    },

    #[error("line {line}: {reason}")]
    Decode { line: u64, reason: String },

    #[error("non-finite loss {value} at step {step}")]
    LossComputation { step: usize, value: f64 },

    #[error("device '{requested}' unavailable: {reason}")]
    Device { requested: String, reason: String },

    #[error("I/O failure on '{}': {source}", path.display())]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("tensor backend error: {0}")]
    Backend(String),

    #[error("plot rendering failed: {0}")]
    Plot(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl FinetuneError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

pub type FinetuneResult<T> = Result<T, FinetuneError>;
