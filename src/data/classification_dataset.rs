/// Tokenized classification dataset stored as NumPy arrays (.npy)
use candle_core::{Device, Tensor};
use ndarray::{Array1, Array2, ArrayD, Ix1, Ix2};
use ndarray_npy::ReadNpyExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{BatchDataLoader, ClassificationBatch};
use crate::FinetuneError;

/// Metadata from dataset.json
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatasetMetadata {
    /// Number of classes; 0 means "infer from the labels"
    #[serde(default)]
    pub num_classes: usize,
    #[serde(default)]
    pub seq_len: usize,
    /// Used to derive the attention mask when attention_mask.npy is absent
    #[serde(default)]
    pub pad_token_id: u32,
    #[serde(default)]
    pub description: String,
}

/// In-memory tokenized dataset
pub struct ClassificationDataset {
    input_ids: Array2<u32>,      // [N, seq_len]
    attention_mask: Array2<u32>, // [N, seq_len]
    labels: Array1<u32>,         // [N]
    metadata: DatasetMetadata,
}

fn read_npy_i64<P: AsRef<Path>>(path: P) -> crate::Result<ArrayD<i64>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        FinetuneError::Data(format!("Failed to open {}: {}", path.display(), e))
    })?;
    Ok(ArrayD::<i64>::read_npy(BufReader::new(file))?)
}

fn to_u32<D: ndarray::Dimension>(
    array: ndarray::Array<i64, D>,
    name: &str,
) -> crate::Result<ndarray::Array<u32, D>> {
    if let Some(bad) = array.iter().find(|&&x| x < 0 || x > u32::MAX as i64) {
        return Err(FinetuneError::Data(format!(
            "{} contains out-of-range value {}",
            name, bad
        )));
    }
    Ok(array.mapv(|x| x as u32))
}

impl ClassificationDataset {
    /// Load from a directory holding input_ids.npy, labels.npy and optionally
    /// attention_mask.npy and dataset.json
    pub fn from_directory<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let dir = path.as_ref();

        log::info!("Loading classification dataset from: {:?}", dir);

        let metadata_path = dir.join("dataset.json");
        let metadata: DatasetMetadata = if metadata_path.exists() {
            let reader = BufReader::new(File::open(&metadata_path)?);
            serde_json::from_reader(reader)?
        } else {
            log::warn!("dataset.json not found, inferring metadata");
            DatasetMetadata::default()
        };

        let input_ids = read_npy_i64(dir.join("input_ids.npy"))?
            .into_dimensionality::<Ix2>()
            .map_err(|e| FinetuneError::Data(format!("input_ids.npy must be 2-D: {}", e)))?;
        let input_ids = to_u32(input_ids, "input_ids")?;

        let labels = read_npy_i64(dir.join("labels.npy"))?
            .into_dimensionality::<Ix1>()
            .map_err(|e| FinetuneError::Data(format!("labels.npy must be 1-D: {}", e)))?;
        let labels = to_u32(labels, "labels")?;

        let mask_path = dir.join("attention_mask.npy");
        let attention_mask = if mask_path.exists() {
            let mask = read_npy_i64(&mask_path)?
                .into_dimensionality::<Ix2>()
                .map_err(|e| {
                    FinetuneError::Data(format!("attention_mask.npy must be 2-D: {}", e))
                })?;
            Some(to_u32(mask, "attention_mask")?)
        } else {
            log::warn!(
                "attention_mask.npy not found, deriving mask from pad_token_id={}",
                metadata.pad_token_id
            );
            None
        };

        Self::from_arrays(input_ids, attention_mask, labels, metadata)
    }

    /// Build a dataset from already tokenized arrays
    pub fn from_arrays(
        input_ids: Array2<u32>,
        attention_mask: Option<Array2<u32>>,
        labels: Array1<u32>,
        mut metadata: DatasetMetadata,
    ) -> crate::Result<Self> {
        let attention_mask = match attention_mask {
            Some(mask) => mask,
            None => {
                let pad = metadata.pad_token_id;
                input_ids.mapv(|id| u32::from(id != pad))
            }
        };

        if attention_mask.shape() != input_ids.shape() {
            return Err(FinetuneError::Data(format!(
                "Shape mismatch: input_ids {:?} != attention_mask {:?}",
                input_ids.shape(),
                attention_mask.shape()
            )));
        }

        if labels.len() != input_ids.nrows() {
            return Err(FinetuneError::Data(format!(
                "Row mismatch: {} sequences but {} labels",
                input_ids.nrows(),
                labels.len()
            )));
        }

        let max_label = labels.iter().copied().max();
        if metadata.num_classes == 0 {
            metadata.num_classes = max_label.map_or(0, |m| m as usize + 1);
        } else if let Some(m) = max_label {
            if m as usize >= metadata.num_classes {
                return Err(FinetuneError::Data(format!(
                    "label {} out of range for {} classes",
                    m, metadata.num_classes
                )));
            }
        }
        metadata.seq_len = input_ids.ncols();

        log::info!(
            "Dataset loaded: {} examples, seq_len={}, num_classes={}",
            input_ids.nrows(),
            metadata.seq_len,
            metadata.num_classes
        );

        Ok(Self {
            input_ids,
            attention_mask,
            labels,
            metadata,
        })
    }

    /// Get number of examples
    pub fn len(&self) -> usize {
        self.input_ids.nrows()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.input_ids.nrows() == 0
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }

    pub fn num_classes(&self) -> usize {
        self.metadata.num_classes
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    /// Assemble the rows at `indices` into a batch on `device`
    fn gather(&self, indices: &[usize], device: &Device) -> candle_core::Result<ClassificationBatch> {
        let seq_len = self.seq_len();
        let mut ids = Vec::with_capacity(indices.len() * seq_len);
        let mut mask = Vec::with_capacity(indices.len() * seq_len);
        let mut labels = Vec::with_capacity(indices.len());

        for &idx in indices {
            ids.extend(self.input_ids.row(idx).iter().copied());
            mask.extend(self.attention_mask.row(idx).iter().copied());
            labels.push(self.labels[idx]);
        }

        let n = indices.len();
        ClassificationBatch::new(
            Tensor::from_vec(ids, (n, seq_len), device)?,
            Tensor::from_vec(mask, (n, seq_len), device)?,
            Tensor::from_vec(labels, n, device)?,
        )
    }
}

/// Mini-batch loader over a [`ClassificationDataset`]
///
/// Batches are built on the host; the trainer moves them to its device.
pub struct ClassificationDataLoader {
    dataset: ClassificationDataset,
    batch_size: usize,
    current_idx: usize,
    indices: Vec<usize>,
    shuffle: bool,
    rng: StdRng,
}

impl ClassificationDataLoader {
    /// Create new data loader; `seed` makes shuffling reproducible
    pub fn new(
        dataset: ClassificationDataset,
        batch_size: usize,
        shuffle: bool,
        seed: Option<u64>,
    ) -> crate::Result<Self> {
        if batch_size == 0 {
            return Err(FinetuneError::Config("batch_size must be > 0".to_string()));
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut loader = Self {
            indices: (0..dataset.len()).collect(),
            dataset,
            batch_size,
            current_idx: 0,
            shuffle,
            rng,
        };
        loader.reset();
        Ok(loader)
    }

    pub fn dataset(&self) -> &ClassificationDataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl BatchDataLoader for ClassificationDataLoader {
    fn next_batch(&mut self) -> candle_core::Result<Option<ClassificationBatch>> {
        if self.current_idx >= self.indices.len() {
            return Ok(None);
        }

        let end_idx = (self.current_idx + self.batch_size).min(self.indices.len());
        let batch = self
            .dataset
            .gather(&self.indices[self.current_idx..end_idx], &Device::Cpu)?;
        self.current_idx = end_idx;

        Ok(Some(batch))
    }

    fn reset(&mut self) {
        self.current_idx = 0;

        if self.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
    }

    fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn toy_dataset() -> crate::Result<ClassificationDataset> {
        ClassificationDataset::from_arrays(
            arr2(&[[101, 7, 0], [101, 8, 9], [101, 0, 0], [101, 5, 6], [101, 4, 0]]),
            None,
            arr1(&[0, 1, 0, 1, 1]),
            DatasetMetadata::default(),
        )
    }

    #[test]
    fn test_metadata_deserialization() -> crate::Result<()> {
        let json = r#"{ "num_classes": 4, "pad_token_id": 1, "description": "AG News" }"#;
        let metadata: DatasetMetadata = serde_json::from_str(json)?;
        assert_eq!(metadata.num_classes, 4);
        assert_eq!(metadata.pad_token_id, 1);
        assert_eq!(metadata.seq_len, 0);
        Ok(())
    }

    #[test]
    fn test_mask_derived_from_padding() -> crate::Result<()> {
        let dataset = toy_dataset()?;
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.num_classes(), 2);
        assert_eq!(dataset.seq_len(), 3);
        assert_eq!(dataset.attention_mask.row(0).to_vec(), vec![1, 1, 0]);
        assert_eq!(dataset.attention_mask.row(1).to_vec(), vec![1, 1, 1]);
        Ok(())
    }

    #[test]
    fn test_label_out_of_range() {
        let result = ClassificationDataset::from_arrays(
            arr2(&[[1, 2], [3, 4]]),
            None,
            arr1(&[0, 2]),
            DatasetMetadata {
                num_classes: 2,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(FinetuneError::Data(_))));
    }

    #[test]
    fn test_row_mismatch() {
        let result = ClassificationDataset::from_arrays(
            arr2(&[[1, 2], [3, 4]]),
            None,
            arr1(&[0]),
            DatasetMetadata::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_loader_batches_cover_dataset() -> crate::Result<()> {
        let mut loader = ClassificationDataLoader::new(toy_dataset()?, 2, true, Some(7))?;
        assert_eq!(loader.num_batches(), 3);

        let mut sizes = Vec::new();
        let mut label_sum = 0u32;
        while let Some(batch) = loader.next_batch()? {
            assert_eq!(batch.input_ids.dims()[1], 3);
            sizes.push(batch.batch_size());
            label_sum += batch.labels.sum_all()?.to_scalar::<u32>()?;
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(label_sum, 3);
        Ok(())
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() -> crate::Result<()> {
        let a = ClassificationDataLoader::new(toy_dataset()?, 2, true, Some(42))?;
        let b = ClassificationDataLoader::new(toy_dataset()?, 2, true, Some(42))?;
        assert_eq!(a.indices, b.indices);
        Ok(())
    }

    #[test]
    fn test_zero_batch_size_rejected() -> crate::Result<()> {
        let result = ClassificationDataLoader::new(toy_dataset()?, 0, false, None);
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_from_directory() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let write = |name: &str, array: ArrayD<i64>| -> crate::Result<()> {
            ndarray_npy::write_npy(dir.path().join(name), &array)
                .map_err(|e| FinetuneError::Data(e.to_string()))
        };
        write("input_ids.npy", arr2(&[[101i64, 5, 0], [101, 6, 7]]).into_dyn())?;
        write("labels.npy", arr1(&[2i64, 0]).into_dyn())?;
        std::fs::write(
            dir.path().join("dataset.json"),
            r#"{ "num_classes": 3, "description": "toy" }"#,
        )?;

        let dataset = ClassificationDataset::from_directory(dir.path())?;
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.num_classes(), 3);
        assert_eq!(dataset.metadata().seq_len, 3);
        assert_eq!(dataset.attention_mask.row(0).to_vec(), vec![1, 1, 0]);
        Ok(())
    }

    #[test]
    fn test_negative_ids_rejected() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        ndarray_npy::write_npy(dir.path().join("input_ids.npy"), &arr2(&[[1i64, -3]]))
            .map_err(|e| FinetuneError::Data(e.to_string()))?;
        ndarray_npy::write_npy(dir.path().join("labels.npy"), &arr1(&[0i64]))
            .map_err(|e| FinetuneError::Data(e.to_string()))?;

        let result = ClassificationDataset::from_directory(dir.path());
        assert!(matches!(result, Err(FinetuneError::Data(_))));
        Ok(())
    }
}
