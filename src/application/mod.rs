// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Workflow coordination only: no model math, no printing, no
// direct file formats. Each use case wires the data, ml and
// infra layers together for one command.

// The fine-tuning workflow
pub mod train_use_case;

// Reply generation from a saved checkpoint
pub mod generate_use_case;
