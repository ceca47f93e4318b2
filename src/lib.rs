//! Supervised fine-tuning for transformer sequence classifiers
//!
//! A small training harness on top of candle: batches of pre-tokenized
//! sequences go through a classifier, the cross-entropy loss is
//! backpropagated, gradients are clipped to a global norm, and AdamW is
//! stepped under a linear warmup/decay learning-rate schedule. An optional
//! validation pass runs after every epoch.
//!
//! # Example
//!
//! ```ignore
//! use cls_finetune::{ClassifierConfig, TransformerClassifier};
//! use cls_finetune::training::{Trainer, TrainingConfig};
//!
//! let (model, varmap) = TransformerClassifier::with_varmap(ClassifierConfig::default(), &device)?;
//! let mut trainer = Trainer::new(model, varmap, TrainingConfig::default(), device)?;
//! let history = trainer.train(&mut train_loader, Some(&mut val_loader))?;
//! ```

pub mod config;
pub mod data;
pub mod layers;
pub mod models;
pub mod training;
pub mod utils;

// Re-export commonly used items
pub use config::{ClassifierConfig, RunConfig};
pub use models::{SequenceClassifier, TransformerClassifier};

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum FinetuneError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("NumPy read error: {0}")]
    Npy(#[from] ndarray_npy::ReadNpyError),
}

pub type Result<T> = std::result::Result<T, FinetuneError>;
