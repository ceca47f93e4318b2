/// Multi-head self-attention for a bidirectional encoder
use candle_core::{DType, Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder};

/// Additive bias applied to masked attention scores
const MASKED_SCORE: f64 = -1e9;

/// Turn a [batch, seq_len] padding mask (1 = token, 0 = padding) into an
/// additive score bias of shape [batch, 1, 1, seq_len].
pub fn attention_bias(attention_mask: &Tensor, dtype: DType) -> Result<Tensor> {
    let (batch_size, seq_len) = attention_mask.dims2()?;
    attention_mask
        .to_dtype(dtype)?
        // 1 -> 0, 0 -> MASKED_SCORE
        .affine(-MASKED_SCORE, MASKED_SCORE)?
        .reshape((batch_size, 1, 1, seq_len))
}

/// Multi-head attention with a fused QKV projection
pub struct SelfAttention {
    num_heads: usize,
    head_dim: usize,
    qkv_proj: Linear,
    o_proj: Linear,
}

impl SelfAttention {
    pub fn new(hidden_size: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        if num_heads == 0 || hidden_size % num_heads != 0 {
            candle_core::bail!(
                "hidden_size {} not divisible by num_heads {}",
                hidden_size,
                num_heads
            );
        }

        Ok(Self {
            num_heads,
            head_dim: hidden_size / num_heads,
            qkv_proj: candle_nn::linear(hidden_size, 3 * hidden_size, vb.pp("qkv_proj"))?,
            o_proj: candle_nn::linear(hidden_size, hidden_size, vb.pp("o_proj"))?,
        })
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `hidden_states` - Input tensor [batch, seq_len, hidden_size]
    /// * `bias` - Optional additive mask from [`attention_bias`]
    pub fn forward(&self, hidden_states: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
        let (batch_size, seq_len, hidden_size) = hidden_states.dims3()?;

        // [batch, seq_len, 3, num_heads, head_dim]
        let qkv = self.qkv_proj.forward(hidden_states)?.reshape((
            batch_size,
            seq_len,
            3,
            self.num_heads,
            self.head_dim,
        ))?;

        // Each -> [batch, num_heads, seq_len, head_dim]
        let split = |i: usize| -> Result<Tensor> {
            qkv.narrow(2, i, 1)?.squeeze(2)?.transpose(1, 2)?.contiguous()
        };
        let query = split(0)?;
        let key = split(1)?;
        let value = split(2)?;

        let attn_output = scaled_dot_product_attention(&query, &key, &value, bias)?;

        // [batch, seq_len, hidden_size]
        let attn_output = attn_output
            .transpose(1, 2)?
            .reshape((batch_size, seq_len, hidden_size))?;

        self.o_proj.forward(&attn_output)
    }
}

/// softmax(Q K^T / sqrt(d) + bias) V
fn scaled_dot_product_attention(
    query: &Tensor,
    key: &Tensor,
    value: &Tensor,
    bias: Option<&Tensor>,
) -> Result<Tensor> {
    let head_dim = query.dim(3)?;
    let scale = 1.0 / (head_dim as f64).sqrt();

    let scores = (query.matmul(&key.transpose(2, 3)?.contiguous()?)? * scale)?;
    let scores = match bias {
        Some(bias) => scores.broadcast_add(bias)?,
        None => scores,
    };

    let attn_weights = candle_nn::ops::softmax_last_dim(&scores)?;
    attn_weights.matmul(value)
}
