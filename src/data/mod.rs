/// Data loading for sequence classification
pub mod classification_dataset;

pub use classification_dataset::{ClassificationDataLoader, ClassificationDataset, DatasetMetadata};

use candle_core::{DType, Device, Result, Tensor};

/// One batch of tokenized sequences with their class labels
#[derive(Debug, Clone)]
pub struct ClassificationBatch {
    /// Token ids: [batch, seq_len], u32
    pub input_ids: Tensor,
    /// 1 for real tokens, 0 for padding: [batch, seq_len], u32
    pub attention_mask: Tensor,
    /// Class index per sequence: [batch], u32
    pub labels: Tensor,
}

impl ClassificationBatch {
    pub fn new(input_ids: Tensor, attention_mask: Tensor, labels: Tensor) -> Result<Self> {
        let (batch_size, seq_len) = input_ids.dims2()?;
        if attention_mask.dims() != [batch_size, seq_len] {
            candle_core::bail!(
                "attention_mask shape {:?} does not match input_ids shape {:?}",
                attention_mask.dims(),
                input_ids.dims()
            );
        }
        if labels.dims() != [batch_size] {
            candle_core::bail!(
                "labels shape {:?} does not match batch size {}",
                labels.dims(),
                batch_size
            );
        }
        Ok(Self {
            input_ids: input_ids.to_dtype(DType::U32)?,
            attention_mask: attention_mask.to_dtype(DType::U32)?,
            labels: labels.to_dtype(DType::U32)?,
        })
    }

    /// Number of sequences in the batch
    pub fn batch_size(&self) -> usize {
        self.labels.dims().first().copied().unwrap_or(0)
    }

    /// Move all tensors to `device` (no copy when already there)
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            input_ids: self.input_ids.to_device(device)?,
            attention_mask: self.attention_mask.to_device(device)?,
            labels: self.labels.to_device(device)?,
        })
    }
}

/// Generic batch loader
pub trait BatchDataLoader {
    /// Get next batch, `None` once the epoch is exhausted
    fn next_batch(&mut self) -> Result<Option<ClassificationBatch>>;

    /// Reset loader for new epoch
    fn reset(&mut self);

    /// Get total number of batches per epoch
    fn num_batches(&self) -> usize;
}

/// A fixed, already-built sequence of batches replayed in order every epoch.
pub struct FixedBatches {
    batches: Vec<ClassificationBatch>,
    cursor: usize,
}

impl FixedBatches {
    pub fn new(batches: Vec<ClassificationBatch>) -> Self {
        Self { batches, cursor: 0 }
    }
}

impl BatchDataLoader for FixedBatches {
    fn next_batch(&mut self) -> Result<Option<ClassificationBatch>> {
        let batch = self.batches.get(self.cursor).cloned();
        if batch.is_some() {
            self.cursor += 1;
        }
        Ok(batch)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn num_batches(&self) -> usize {
        self.batches.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(rows: usize, device: &Device) -> Result<ClassificationBatch> {
        let ids = Tensor::zeros((rows, 4), DType::U32, device)?;
        let mask = Tensor::ones((rows, 4), DType::U32, device)?;
        let labels = Tensor::zeros(rows, DType::U32, device)?;
        ClassificationBatch::new(ids, mask, labels)
    }

    #[test]
    fn test_batch_shape_checks() -> Result<()> {
        let device = Device::Cpu;
        let ids = Tensor::zeros((2, 4), DType::U32, &device)?;
        let bad_mask = Tensor::ones((2, 3), DType::U32, &device)?;
        let labels = Tensor::zeros(2, DType::U32, &device)?;
        assert!(ClassificationBatch::new(ids.clone(), bad_mask, labels.clone()).is_err());

        let mask = Tensor::ones((2, 4), DType::U32, &device)?;
        let bad_labels = Tensor::zeros(3, DType::U32, &device)?;
        assert!(ClassificationBatch::new(ids, mask, bad_labels).is_err());

        assert_eq!(batch(2, &device)?.batch_size(), 2);
        Ok(())
    }

    #[test]
    fn test_fixed_batches_replay() -> Result<()> {
        let device = Device::Cpu;
        let mut loader = FixedBatches::new(vec![batch(2, &device)?, batch(1, &device)?]);
        assert_eq!(loader.num_batches(), 2);

        for _ in 0..2 {
            let mut sizes = Vec::new();
            while let Some(b) = loader.next_batch()? {
                sizes.push(b.batch_size());
            }
            assert_eq!(sizes, vec![2, 1]);
            loader.reset();
        }
        Ok(())
    }
}
