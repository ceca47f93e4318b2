/// Position-wise feed-forward network
use candle_core::{Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder};

/// up_proj -> GELU -> down_proj
pub struct FeedForward {
    up_proj: Linear,
    down_proj: Linear,
}

impl FeedForward {
    pub fn new(hidden_size: usize, intermediate_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            up_proj: candle_nn::linear(hidden_size, intermediate_size, vb.pp("up_proj"))?,
            down_proj: candle_nn::linear(intermediate_size, hidden_size, vb.pp("down_proj"))?,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let hidden = self.up_proj.forward(x)?.gelu_erf()?;
        self.down_proj.forward(&hidden)
    }
}
