/// Configuration for the transformer sequence classifier
///
/// Field names follow the usual BERT-style encoder checkpoints so that a
/// config exported next to pretrained weights can be read directly.
use std::path::Path;

use crate::training::TrainingConfig;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Vocabulary size of the upstream tokenizer
    pub vocab_size: usize,

    /// Embedding/hidden dimension
    pub hidden_size: usize,

    /// Number of encoder layers
    pub num_layers: usize,

    /// Number of attention heads
    pub num_heads: usize,

    /// Feed-forward inner dimension
    pub intermediate_size: usize,

    /// Maximum sequence length (size of the learned position table)
    pub max_position_embeddings: usize,

    /// Number of target classes
    pub num_classes: usize,

    /// Dropout probability for embeddings, attention output and FFN output
    pub hidden_dropout: f32,

    /// Dropout probability applied to the CLS representation before the head
    pub classifier_dropout: f32,

    /// Epsilon of the layer norms
    pub layer_norm_eps: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            vocab_size: 30522, // bert-base-uncased vocabulary
            hidden_size: 256,
            num_layers: 4,
            num_heads: 4,
            intermediate_size: 1024,
            max_position_embeddings: 512,
            num_classes: 2,
            hidden_dropout: 0.1,
            classifier_dropout: 0.1,
            layer_norm_eps: 1e-12,
        }
    }
}

impl ClassifierConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.hidden_size == 0 || self.vocab_size == 0 {
            return Err(crate::FinetuneError::Config(
                "hidden_size and vocab_size must be > 0".to_string(),
            ));
        }

        if self.num_heads == 0 || self.hidden_size % self.num_heads != 0 {
            return Err(crate::FinetuneError::Config(format!(
                "hidden_size {} must be divisible by num_heads {}",
                self.hidden_size, self.num_heads
            )));
        }

        if self.num_classes < 2 {
            return Err(crate::FinetuneError::Config(format!(
                "num_classes must be >= 2, got {}",
                self.num_classes
            )));
        }

        for (name, p) in [
            ("hidden_dropout", self.hidden_dropout),
            ("classifier_dropout", self.classifier_dropout),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(crate::FinetuneError::Config(format!(
                    "{} must be in [0, 1), got {}",
                    name, p
                )));
            }
        }

        Ok(())
    }

    /// Get head dimension
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }
}

/// Everything a `finetune` run needs besides data paths.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model: ClassifierConfig,
    pub training: TrainingConfig,
}

impl RunConfig {
    /// Read a run configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let config: RunConfig = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.model.validate()?;
        self.training.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ClassifierConfig::default().validate().is_ok());
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_heads_must_divide_hidden() {
        let config = ClassifierConfig {
            hidden_size: 100,
            num_heads: 3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(crate::FinetuneError::Config(_))
        ));
    }

    #[test]
    fn test_single_class_rejected() {
        let config = ClassifierConfig {
            num_classes: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() -> crate::Result<()> {
        let json = r#"{
            "model": { "num_classes": 3, "hidden_size": 64, "num_heads": 2 },
            "training": { "num_epochs": 2, "evaluation": true }
        }"#;
        let config: RunConfig = serde_json::from_str(json)?;

        assert_eq!(config.model.num_classes, 3);
        assert_eq!(config.model.head_dim(), 32);
        assert_eq!(config.model.vocab_size, 30522);
        assert_eq!(config.training.num_epochs, 2);
        assert!(config.training.evaluation);
        assert_eq!(config.training.max_grad_norm, Some(1.0));
        config.validate()
    }

    #[test]
    fn test_from_file() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{ "training": { "learning_rate": 1e-4 } }"#)?;

        let config = RunConfig::from_file(&path)?;
        assert_eq!(config.training.learning_rate, 1e-4);
        assert_eq!(config.model, ClassifierConfig::default());
        Ok(())
    }
}
