// ============================================================
// Layer 5 — Model Adapter
// ============================================================
// Bridges host-side token sequences and the CausalLm tensors.
//
// Both loops keep one growing Vec<u32> per batch row. Before
// every forward pass the rows are left-padded to a common
// length so the newest token of every row sits in the last
// column:
//
//   row 0:  [PAD] [PAD]  12    7    40
//   row 1:   9     3     12    88   5
//                                   ^ logits read here
//
// Positions count from each row's first real token (row 0
// above: 0 0 0 1 2) and pad keys are masked, so a row scores
// the same alone as next to longer batch-mates.
//
// Rows longer than the model context keep only their most
// recent `context_len` tokens.

use burn::{
    prelude::*,
    tensor::{activation::log_softmax, ElementConversion},
};

use crate::domain::error::{FinetuneError, FinetuneResult};
use crate::ml::model::CausalLm;

/// Rows left-padded into row-major buffers of equal width.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedRows {
    pub ids:       Vec<i32>,
    /// Index of each token within its own row; 0 on padding
    pub positions: Vec<i32>,
    /// Common row length, at least 1
    pub width:     usize,
}

/// Left-pad `seqs` to a common width, keeping at most the last
/// `context_len` tokens of every row.
pub fn pad_left(seqs: &[Vec<u32>], pad_id: u32, context_len: usize) -> PaddedRows {
    let longest = seqs.iter().map(Vec::len).max().unwrap_or(0);
    let width   = longest.min(context_len).max(1);

    let mut ids       = Vec::with_capacity(seqs.len() * width);
    let mut positions = Vec::with_capacity(seqs.len() * width);
    for seq in seqs {
        let window = &seq[seq.len().saturating_sub(width)..];
        let pads   = width - window.len();
        ids.extend(std::iter::repeat(pad_id as i32).take(pads));
        ids.extend(window.iter().map(|&t| t as i32));
        positions.extend(std::iter::repeat(0).take(pads));
        positions.extend(0..window.len() as i32);
    }
    PaddedRows { ids, positions, width }
}

/// Run one forward pass over `seqs` and return the logits at
/// the last position of every row: [batch, vocab].
pub fn next_token_logits<B: Backend>(
    model:  &CausalLm<B>,
    seqs:   &[Vec<u32>],
    pad_id: u32,
    device: &B::Device,
) -> Tensor<B, 2> {
    let rows       = pad_left(seqs, pad_id, model.context_len);
    let width      = rows.width;
    let batch_size = seqs.len();

    let input_ids = Tensor::<B, 1, Int>::from_ints(rows.ids.as_slice(), device)
        .reshape([batch_size, width]);
    let positions = Tensor::<B, 1, Int>::from_ints(rows.positions.as_slice(), device)
        .reshape([batch_size, width]);
    let pad_mask  = input_ids.clone().equal_elem(pad_id as i32);

    let logits = model.forward(input_ids, positions, pad_mask);
    let vocab  = logits.dims()[2];

    logits
        .slice([0..batch_size, width - 1..width, 0..vocab])
        .reshape([batch_size, vocab])
}

/// Negative log-likelihood of `targets` under `logits`.
///
/// `targets[r]` is `None` for rows whose target sequence is
/// already exhausted; those rows are masked out and the loss
/// is averaged over the remaining ones. Returns `None` when no
/// row has a target at this position.
pub fn masked_nll<B: Backend>(
    logits:  Tensor<B, 2>,
    targets: &[Option<u32>],
    device:  &B::Device,
) -> Option<Tensor<B, 1>> {
    let active = targets.iter().filter(|t| t.is_some()).count();
    if active == 0 {
        return None;
    }
    let batch_size = targets.len();

    let ids: Vec<i32>     = targets.iter().map(|t| t.unwrap_or(0) as i32).collect();
    let weights: Vec<f32> = targets.iter().map(|t| if t.is_some() { 1.0 } else { 0.0 }).collect();

    let ids     = Tensor::<B, 1, Int>::from_ints(ids.as_slice(), device).reshape([batch_size, 1]);
    let weights = Tensor::<B, 1>::from_floats(weights.as_slice(), device);

    let log_probs = log_softmax(logits, 1);
    let picked    = log_probs.gather(1, ids).reshape([batch_size]);

    Some((picked * weights).sum().neg().div_scalar(active as f32))
}

/// Read a one-element loss tensor back to the host.
pub fn scalar<B: Backend>(loss: &Tensor<B, 1>) -> f64 {
    loss.clone().into_scalar().elem::<f64>()
}

/// Copy a [batch, vocab] logits tensor to the host, one Vec per row.
pub fn logits_to_rows<B: Backend>(logits: Tensor<B, 2>) -> FinetuneResult<Vec<Vec<f32>>> {
    let [_, vocab] = logits.dims();
    let flat: Vec<f32> = logits
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| FinetuneError::Backend(format!("{e:?}")))?;
    Ok(flat.chunks(vocab.max(1)).map(<[f32]>::to_vec).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::test_support::{backend_lock, tiny_config, TestBackend};

    #[test]
    fn test_pad_left_aligns_newest_tokens() {
        let rows = pad_left(&[vec![1, 2, 3], vec![7]], 0, 16);
        assert_eq!(rows.width, 3);
        assert_eq!(rows.ids, vec![1, 2, 3, 0, 0, 7]);
        assert_eq!(rows.positions, vec![0, 1, 2, 0, 0, 0]);
    }

    #[test]
    fn test_pad_left_keeps_recent_context() {
        let rows = pad_left(&[vec![1, 2, 3, 4, 5]], 0, 3);
        assert_eq!(rows.width, 3);
        assert_eq!(rows.ids, vec![3, 4, 5]);
        assert_eq!(rows.positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_pad_left_empty_rows_get_one_column() {
        let rows = pad_left(&[vec![], vec![]], 9, 4);
        assert_eq!(rows.width, 1);
        assert_eq!(rows.ids, vec![9, 9]);
    }

    #[test]
    fn test_masked_nll_matches_manual_log_softmax() {
        let device = Default::default();
        // row 0 is uniform over 4 tokens → -ln(1/4)
        let logits = Tensor::<TestBackend, 1>::from_floats(
            [0.0, 0.0, 0.0, 0.0, 5.0, 1.0, 1.0, 1.0].as_slice(), &device,
        ).reshape([2, 4]);

        let loss = masked_nll(logits, &[Some(2), None], &device).unwrap();
        assert!((scalar(&loss) - 4f64.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_masked_nll_none_when_all_rows_done() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::zeros([2, 4], &device);
        assert!(masked_nll(logits, &[None, None], &device).is_none());
    }

    #[test]
    fn test_next_token_logits_shape() {
        let _guard = backend_lock();
        let device = Default::default();
        let model: CausalLm<TestBackend> = tiny_config(10).init(&device);
        let logits = next_token_logits(&model, &[vec![1, 2, 3], vec![4]], 0, &device);
        assert_eq!(logits.dims(), [2, 10]);

        let rows = logits_to_rows(logits).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 10);
    }

    #[test]
    fn test_row_logits_do_not_depend_on_batch_mates() {
        let _guard = backend_lock();
        let device = Default::default();
        let model: CausalLm<TestBackend> = tiny_config(10).init(&device);

        let alone   = next_token_logits(&model, &[vec![1, 2]], 0, &device);
        let batched = next_token_logits(&model, &[vec![1, 2], vec![3, 4, 5, 6, 7]], 0, &device);

        let alone   = logits_to_rows(alone).unwrap();
        let batched = logits_to_rows(batched).unwrap();
        for (a, b) in alone[0].iter().zip(&batched[0]) {
            assert!((a - b).abs() < 1e-4, "alone {a} vs batched {b}");
        }
    }
}
