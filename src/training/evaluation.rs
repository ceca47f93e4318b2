/// Held-out evaluation: mean loss and mean accuracy over validation batches
use candle_core::{DType, Device, Tensor, D};
use serde::{Deserialize, Serialize};

use crate::data::{BatchDataLoader, ClassificationBatch};
use crate::models::SequenceClassifier;
use crate::FinetuneError;

/// Validation metrics, averaged per batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub loss: f64,
    /// Percentage in [0, 100]
    pub accuracy: f64,
    pub num_batches: usize,
}

/// Percentage of rows whose arg-max logit equals the label
pub fn batch_accuracy(logits: &Tensor, labels: &Tensor) -> candle_core::Result<f64> {
    let predictions = logits.argmax(D::Minus1)?.flatten_all()?;
    let labels = labels.flatten_all()?.to_dtype(predictions.dtype())?;
    let accuracy = predictions
        .eq(&labels)?
        .to_dtype(DType::F64)?
        .mean_all()?
        .to_scalar::<f64>()?;
    Ok(accuracy * 100.0)
}

/// Inference-mode logits, detached from the graph, and the batch loss
pub(crate) fn evaluate_batch<M>(model: &M, batch: &ClassificationBatch) -> candle_core::Result<(Tensor, f64)>
where
    M: SequenceClassifier + ?Sized,
{
    let logits = model
        .forward_t(&batch.input_ids, &batch.attention_mask, false)?
        .detach();
    let loss = model
        .loss_fn(&logits, &batch.labels)?
        .to_dtype(DType::F64)?
        .to_scalar::<f64>()?;
    Ok((logits, loss))
}

/// Run `model` in inference mode over every batch of `loader`.
///
/// Logits are detached, so no gradients are tracked. The loader is reset
/// first and left exhausted.
pub fn evaluate<M, L>(model: &M, loader: &mut L, device: &Device) -> crate::Result<EvalMetrics>
where
    M: SequenceClassifier + ?Sized,
    L: BatchDataLoader + ?Sized,
{
    loader.reset();

    let mut losses = Vec::with_capacity(loader.num_batches());
    let mut accuracies = Vec::with_capacity(loader.num_batches());

    while let Some(batch) = loader.next_batch()? {
        let batch = batch.to_device(device)?;
        let (logits, loss) = evaluate_batch(model, &batch)?;

        losses.push(loss);
        accuracies.push(batch_accuracy(&logits, &batch.labels)?);
    }

    if losses.is_empty() {
        return Err(FinetuneError::Data("validation loader yielded no batches".to_string()));
    }

    let metrics = EvalMetrics {
        loss: mean(&losses),
        accuracy: mean(&accuracies),
        num_batches: losses.len(),
    };
    log::debug!(
        "Evaluation: loss={:.6}, accuracy={:.2}% over {} batches",
        metrics.loss,
        metrics.accuracy,
        metrics.num_batches
    );
    Ok(metrics)
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FixedBatches;
    use candle_core::{Result, Var};

    /// Predicts the class stored in the first token of each sequence
    struct FirstTokenOracle {
        num_classes: usize,
    }

    impl SequenceClassifier for FirstTokenOracle {
        fn forward_t(&self, input_ids: &Tensor, _mask: &Tensor, _train: bool) -> Result<Tensor> {
            let first = input_ids.narrow(1, 0, 1)?.squeeze(1)?;
            candle_nn::encoding::one_hot(first, self.num_classes, 5f32, -5f32)
        }
    }

    /// Oracle logits scaled by a trainable parameter
    struct ScaledOracle {
        oracle: FirstTokenOracle,
        scale: Var,
    }

    impl SequenceClassifier for ScaledOracle {
        fn forward_t(&self, input_ids: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
            self.oracle
                .forward_t(input_ids, mask, train)?
                .broadcast_mul(self.scale.as_tensor())
        }
    }

    fn batch(labels: &[u32], device: &Device) -> Result<ClassificationBatch> {
        let n = labels.len();
        let ids: Vec<u32> = labels.iter().flat_map(|&l| [l, 9, 9]).collect();
        ClassificationBatch::new(
            Tensor::from_vec(ids, (n, 3), device)?,
            Tensor::ones((n, 3), DType::U32, device)?,
            Tensor::new(labels, device)?,
        )
    }

    #[test]
    fn test_batch_accuracy() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[2f32, 1.0], [0.0, 3.0], [1.0, 0.5], [0.1, 0.2]], &device)?;
        let labels = Tensor::new(&[0u32, 1, 1, 0], &device)?;
        assert!((batch_accuracy(&logits, &labels)? - 50.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_perfect_predictions_score_100() -> crate::Result<()> {
        let device = Device::Cpu;
        let model = FirstTokenOracle { num_classes: 3 };
        let mut loader = FixedBatches::new(vec![
            batch(&[0, 1, 2], &device)?,
            batch(&[2, 2], &device)?,
            batch(&[1], &device)?,
        ]);

        let metrics = evaluate(&model, &mut loader, &device)?;

        assert_eq!(metrics.accuracy, 100.0);
        assert_eq!(metrics.num_batches, 3);
        // Confident correct logits give a small cross-entropy
        assert!(metrics.loss < 1e-3);
        Ok(())
    }

    #[test]
    fn test_accuracy_is_mean_of_batch_accuracies() -> crate::Result<()> {
        let device = Device::Cpu;
        let model = FirstTokenOracle { num_classes: 2 };

        // Second batch: ids say class 0, labels say [0, 1, 1, 1] -> 25%
        let wrong = ClassificationBatch::new(
            Tensor::zeros((4, 3), DType::U32, &device)?,
            Tensor::ones((4, 3), DType::U32, &device)?,
            Tensor::new(&[0u32, 1, 1, 1], &device)?,
        )?;
        let mut loader = FixedBatches::new(vec![batch(&[1], &device)?, wrong]);

        let metrics = evaluate(&model, &mut loader, &device)?;
        assert!((metrics.accuracy - 62.5).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_evaluation_logits_are_detached() -> Result<()> {
        let device = Device::Cpu;
        let model = ScaledOracle {
            oracle: FirstTokenOracle { num_classes: 2 },
            scale: Var::new(&[1f32], &device)?,
        };
        let batch = batch(&[0, 1], &device)?;

        // Training-mode forward is tracked
        let tracked = model.forward_t(&batch.input_ids, &batch.attention_mask, true)?;
        let grads = tracked.sum_all()?.backward()?;
        assert!(grads.get(model.scale.as_tensor()).is_some());

        let (logits, loss) = evaluate_batch(&model, &batch)?;
        let grads = logits.sum_all()?.backward()?;
        assert!(grads.get(model.scale.as_tensor()).is_none());
        assert!(loss < 1e-3);
        Ok(())
    }

    #[test]
    fn test_empty_loader_is_an_error() {
        let device = Device::Cpu;
        let model = FirstTokenOracle { num_classes: 2 };
        let mut loader = FixedBatches::new(Vec::new());
        assert!(matches!(
            evaluate(&model, &mut loader, &device),
            Err(FinetuneError::Data(_))
        ));
    }
}
