/// Input embeddings: token + learned absolute position, then LayerNorm and dropout
use candle_core::{DType, Module, Result, Tensor};
use candle_nn::{Dropout, Embedding, LayerNorm, VarBuilder};

pub struct EncoderEmbeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    layer_norm: LayerNorm,
    dropout: Dropout,
    max_positions: usize,
}

impl EncoderEmbeddings {
    pub fn new(
        vocab_size: usize,
        hidden_size: usize,
        max_positions: usize,
        layer_norm_eps: f64,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            word_embeddings: candle_nn::embedding(vocab_size, hidden_size, vb.pp("word_embeddings"))?,
            position_embeddings: candle_nn::embedding(
                max_positions,
                hidden_size,
                vb.pp("position_embeddings"),
            )?,
            layer_norm: candle_nn::layer_norm(hidden_size, layer_norm_eps, vb.pp("layer_norm"))?,
            dropout: Dropout::new(dropout),
            max_positions,
        })
    }

    /// `input_ids`: [batch, seq_len] -> [batch, seq_len, hidden_size]
    pub fn forward(&self, input_ids: &Tensor, train: bool) -> Result<Tensor> {
        let seq_len = input_ids.dim(1)?;
        if seq_len > self.max_positions {
            candle_core::bail!(
                "sequence length {} exceeds max_position_embeddings {}",
                seq_len,
                self.max_positions
            );
        }

        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;
        let words = self.word_embeddings.forward(&input_ids.to_dtype(DType::U32)?)?;
        let positions = self.position_embeddings.forward(&positions)?;

        let embeddings = words.broadcast_add(&positions)?;
        let embeddings = self.layer_norm.forward(&embeddings)?;
        self.dropout.forward(&embeddings, train)
    }
}
