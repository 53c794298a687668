// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the filesystem on behalf of a run:
//
//   checkpoint.rs      — model weights and configs on disk
//                        (Burn file recorder + JSON)
//   tokenizer_store.rs — loads or builds tokenizer.json and
//                        adds the pad token
//   metrics.rs         — epoch history and the append-only
//                        TSV loss log
//   plot.rs            — PNG loss curve (plotters)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Tokenizer lookup, building and the TextCodec wrapper
pub mod tokenizer_store;

/// Epoch loss log
pub mod metrics;

/// Loss curve rendering
pub mod plot;
