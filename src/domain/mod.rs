// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types describing a fine-tuning run:
//
//   dialogue_pair.rs — one (source, target) utterance pair
//   epoch_record.rs  — per-epoch loss totals and the running
//                      loss accumulator
//   error.rs         — the typed error taxonomy
//   traits.rs        — seams implemented by the data and
//                      infra layers
//
// No burn types and no file I/O live here.

pub mod dialogue_pair;

pub mod epoch_record;

pub mod error;

pub mod traits;
