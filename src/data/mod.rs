// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from the delimited file on disk to the batches
// the training and evaluation loops consume.
//
//   dialogue_data.tsv
//       │
//       ▼
//   DelimitedLoader   → reads rows, applies malformed-row policy
//       │
//       ▼
//   split_train_val   → only when no validation file is given
//       │
//       ▼
//   DialogueDataset   → encodes pairs, implements Burn's Dataset
//       │
//       ▼
//   DialogueBatcher   → truncates to max_length, groups pairs
//       │
//       ▼
//   DataLoader        → shuffled (train) or ordered (validation)

/// Reads CSV/TSV dialogue files
pub mod loader;

/// Shuffles and splits pairs into train/validation sets
pub mod splitter;

/// Implements Burn's Dataset trait for encoded dialogue pairs
pub mod dataset;

/// Implements Burn's Batcher trait and builds the data loaders
pub mod batcher;
