use burn::{
    nn::{
        attention::{generate_autoregressive_mask, MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
};

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct CausalLmConfig {
    pub vocab_size:  usize,
    /// Longest sequence the position embedding covers.
    pub context_len: usize,
    pub d_model:     usize,
    pub num_heads:   usize,
    pub num_layers:  usize,
    pub d_ff:        usize,
    #[config(default = 0.1)]
    pub dropout:     f64,
}

impl CausalLmConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CausalLm<B> {
        let token_embedding    = EmbeddingConfig::new(self.vocab_size, self.d_model).init(device);
        let position_embedding = EmbeddingConfig::new(self.context_len, self.d_model).init(device);
        let layers: Vec<DecoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_decoder_block(device))
            .collect();
        let final_norm = LayerNormConfig::new(self.d_model).init(device);
        let lm_head    = LinearConfig::new(self.d_model, self.vocab_size)
            .with_bias(false)
            .init(device);
        let dropout    = DropoutConfig::new(self.dropout).init();
        CausalLm {
            token_embedding, position_embedding, layers,
            final_norm, lm_head, dropout,
            context_len: self.context_len,
        }
    }

    fn build_decoder_block<B: Backend>(&self, device: &B::Device) -> DecoderBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        DecoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

/// Pre-norm decoder block: masked self-attention then a GELU
/// feed-forward, each wrapped in a residual connection.
#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> DecoderBlock<B> {
    pub fn forward(
        &self,
        x:         Tensor<B, 3>,
        attn_mask: Tensor<B, 3, Bool>,
        pad_mask:  Tensor<B, 2, Bool>,
    ) -> Tensor<B, 3> {
        let input = MhaInput::self_attn(self.norm1.forward(x.clone()))
            .mask_attn(attn_mask)
            .mask_pad(pad_mask);
        let attn_output = self.self_attn.forward(input).context;
        let x = x + self.dropout.forward(attn_output);

        let ffn_out = self.ffn_linear2.forward(
            burn::tensor::activation::gelu(self.ffn_linear1.forward(self.norm2.forward(x.clone())))
        );
        x + self.dropout.forward(ffn_out)
    }
}

/// GPT-style causal language model producing next-token logits
/// at every position.
#[derive(Module, Debug)]
pub struct CausalLm<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub layers:             Vec<DecoderBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub lm_head:            Linear<B>,
    pub dropout:            Dropout,
    pub context_len:        usize,
}

impl<B: Backend> CausalLm<B> {
    /// input_ids, positions, pad_mask: [batch, seq_len] → logits: [batch, seq_len, vocab]
    ///
    /// `pad_mask` is true at padding positions; those keys are
    /// never attended to. `positions` holds each token's index
    /// within its own row, so padding never shifts the position
    /// embeddings of real tokens. seq_len must not exceed `context_len`.
    pub fn forward(
        &self,
        input_ids: Tensor<B, 2, Int>,
        positions: Tensor<B, 2, Int>,
        pad_mask:  Tensor<B, 2, Bool>,
    ) -> Tensor<B, 3> {
        let [batch_size, seq_len] = input_ids.dims();
        let device = input_ids.device();

        let tok_emb = self.token_embedding.forward(input_ids);
        let pos_emb = self.position_embedding.forward(positions);

        let attn_mask = generate_autoregressive_mask::<B>(batch_size, seq_len, &device);

        let mut x = self.dropout.forward(tok_emb + pos_emb);
        for layer in &self.layers {
            x = layer.forward(x, attn_mask.clone(), pad_mask.clone());
        }
        let x = self.final_norm.forward(x);

        self.lm_head.forward(x)
    }

    pub fn vocab_size(&self) -> usize {
        self.token_embedding.weight.dims()[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::test_support::{backend_lock, tiny_config, TestBackend};

    fn positions(batch: usize, len: usize, device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 2, Int> {
        Tensor::<TestBackend, 1, Int>::arange(0..len as i64, device)
            .unsqueeze::<2>()
            .expand([batch, len])
    }

    #[test]
    fn test_forward_shapes() {
        let _guard = backend_lock();
        let device = Default::default();
        let model: CausalLm<TestBackend> = tiny_config(12).init(&device);

        let ids  = Tensor::<TestBackend, 1, Int>::from_ints([1, 2, 3, 4, 5, 6].as_slice(), &device)
            .reshape([2, 3]);
        let mask = ids.clone().equal_elem(0);
        let logits = model.forward(ids, positions(2, 3, &device), mask);

        assert_eq!(logits.dims(), [2, 3, 12]);
        assert_eq!(model.vocab_size(), 12);
    }

    #[test]
    fn test_causal_mask_hides_future_tokens() {
        let _guard = backend_lock();
        let device = Default::default();
        let model: CausalLm<TestBackend> = tiny_config(12).with_dropout(0.0).init(&device);

        let a = Tensor::<TestBackend, 1, Int>::from_ints([3, 4, 5].as_slice(), &device).reshape([1, 3]);
        let b = Tensor::<TestBackend, 1, Int>::from_ints([3, 4, 9].as_slice(), &device).reshape([1, 3]);
        let la = model.forward(a.clone(), positions(1, 3, &device), a.equal_elem(0));
        let lb = model.forward(b.clone(), positions(1, 3, &device), b.equal_elem(0));

        // logits at position 1 depend only on tokens 0..=1
        let pa: Vec<f32> = la.slice([0..1, 1..2, 0..12]).into_data().convert::<f32>().to_vec().unwrap();
        let pb: Vec<f32> = lb.slice([0..1, 1..2, 0..12]).into_data().convert::<f32>().to_vec().unwrap();
        for (x, y) in pa.iter().zip(&pb) {
            assert!((x - y).abs() < 1e-5);
        }
    }
}
