/// Sequence classification models
use candle_core::{DType, Device, IndexOp, Module, Result, Tensor};
use candle_nn::{Dropout, LayerNorm, Linear, VarBuilder, VarMap};

use crate::config::ClassifierConfig;
use crate::layers::{attention_bias, EncoderEmbeddings, FeedForward, SelfAttention};

pub mod loader;

pub use loader::load_pretrained;

/// What the trainer needs from a model.
///
/// Parameters live in a `VarMap` owned next to the model; `train` selects
/// training behaviour (dropout) versus inference.
pub trait SequenceClassifier {
    /// Class logits [batch, num_classes] for `input_ids` / `attention_mask` [batch, seq_len]
    fn forward_t(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor>;

    /// Scalar training objective. Mean cross-entropy unless overridden.
    fn loss_fn(&self, logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
        candle_nn::loss::cross_entropy(logits, labels)
    }
}

/// Post-norm encoder layer: x = LN(x + Attn(x)); x = LN(x + FFN(x))
pub struct EncoderLayer {
    attention: SelfAttention,
    attention_norm: LayerNorm,
    feed_forward: FeedForward,
    output_norm: LayerNorm,
    dropout: Dropout,
}

impl EncoderLayer {
    pub fn new(config: &ClassifierConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            attention: SelfAttention::new(config.hidden_size, config.num_heads, vb.pp("attention"))?,
            attention_norm: candle_nn::layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("attention_norm"),
            )?,
            feed_forward: FeedForward::new(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("feed_forward"),
            )?,
            output_norm: candle_nn::layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("output_norm"),
            )?,
            dropout: Dropout::new(config.hidden_dropout),
        })
    }

    pub fn forward(&self, hidden_states: &Tensor, bias: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let attn_out = self.attention.forward(hidden_states, bias)?;
        let attn_out = self.dropout.forward(&attn_out, train)?;
        let hidden_states = self.attention_norm.forward(&(hidden_states + attn_out)?)?;

        let ffn_out = self.feed_forward.forward(&hidden_states)?;
        let ffn_out = self.dropout.forward(&ffn_out, train)?;
        self.output_norm.forward(&(hidden_states + ffn_out)?)
    }
}

/// Transformer encoder with a linear head on the CLS (first) position
pub struct TransformerClassifier {
    config: ClassifierConfig,
    embeddings: EncoderEmbeddings,
    layers: Vec<EncoderLayer>,
    classifier_dropout: Dropout,
    classifier: Linear,
    device: Device,
}

impl TransformerClassifier {
    /// Build the model, creating (or reusing) variables through `vb`
    pub fn new(config: ClassifierConfig, vb: VarBuilder) -> crate::Result<Self> {
        config.validate()?;

        let device = vb.device().clone();

        let encoder_vb = vb.pp("encoder");
        let embeddings = EncoderEmbeddings::new(
            config.vocab_size,
            config.hidden_size,
            config.max_position_embeddings,
            config.layer_norm_eps,
            config.hidden_dropout,
            encoder_vb.pp("embeddings"),
        )?;

        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            layers.push(EncoderLayer::new(&config, encoder_vb.pp(format!("layer_{}", i)))?);
        }

        let classifier = candle_nn::linear(config.hidden_size, config.num_classes, vb.pp("classifier"))?;

        Ok(Self {
            classifier_dropout: Dropout::new(config.classifier_dropout),
            config,
            embeddings,
            layers,
            classifier,
            device,
        })
    }

    /// Build a freshly initialised model together with the `VarMap` holding its parameters
    pub fn with_varmap(config: ClassifierConfig, device: &Device) -> crate::Result<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        Ok((model, varmap))
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// CLS representation [batch, hidden_size]
    pub fn encode(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor> {
        let mut hidden_states = self.embeddings.forward(input_ids, train)?;
        let bias = attention_bias(attention_mask, hidden_states.dtype())?;

        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states, Some(&bias), train)?;
        }

        hidden_states.i((.., 0, ..))?.contiguous()
    }
}

impl SequenceClassifier for TransformerClassifier {
    fn forward_t(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor> {
        let cls = self.encode(input_ids, attention_mask, train)?;
        let cls = self.classifier_dropout.forward(&cls, train)?;
        self.classifier.forward(&cls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> ClassifierConfig {
        ClassifierConfig {
            vocab_size: 20,
            hidden_size: 16,
            num_layers: 2,
            num_heads: 2,
            intermediate_size: 32,
            max_position_embeddings: 8,
            num_classes: 3,
            hidden_dropout: 0.0,
            classifier_dropout: 0.0,
            layer_norm_eps: 1e-12,
        }
    }

    #[test]
    fn test_logits_shape() -> crate::Result<()> {
        let device = Device::Cpu;
        let (model, varmap) = TransformerClassifier::with_varmap(tiny_config(), &device)?;

        let ids = Tensor::new(&[[1u32, 5, 6, 0], [1, 7, 0, 0]], &device)?;
        let mask = Tensor::new(&[[1u32, 1, 1, 0], [1, 1, 0, 0]], &device)?;
        let logits = model.forward_t(&ids, &mask, false)?;

        assert_eq!(logits.dims(), &[2, 3]);
        assert!(!varmap.all_vars().is_empty());
        Ok(())
    }

    #[test]
    fn test_inference_is_deterministic() -> crate::Result<()> {
        let device = Device::Cpu;
        let config = ClassifierConfig {
            hidden_dropout: 0.5,
            classifier_dropout: 0.5,
            ..tiny_config()
        };
        let (model, _varmap) = TransformerClassifier::with_varmap(config, &device)?;

        let ids = Tensor::new(&[[1u32, 2, 3]], &device)?;
        let mask = Tensor::ones((1, 3), DType::U32, &device)?;
        let a = model.forward_t(&ids, &mask, false)?.to_vec2::<f32>()?;
        let b = model.forward_t(&ids, &mask, false)?.to_vec2::<f32>()?;

        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_default_loss_is_cross_entropy() -> crate::Result<()> {
        let device = Device::Cpu;
        let (model, _varmap) = TransformerClassifier::with_varmap(tiny_config(), &device)?;

        // Uniform logits over 3 classes: loss = ln(3)
        let logits = Tensor::zeros((4, 3), DType::F32, &device)?;
        let labels = Tensor::new(&[0u32, 1, 2, 1], &device)?;
        let loss = model.loss_fn(&logits, &labels)?.to_scalar::<f32>()?;

        assert!((loss - 3f32.ln()).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_invalid_config_rejected() {
        let device = Device::Cpu;
        let config = ClassifierConfig {
            num_heads: 3,
            ..tiny_config()
        };
        assert!(TransformerClassifier::with_varmap(config, &device).is_err());
    }
}
