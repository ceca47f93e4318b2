/// Pretrained weight loading from safetensors files
use std::path::Path;

use candle_core::Device;
use candle_nn::VarMap;

use super::TransformerClassifier;
use crate::{ClassifierConfig, FinetuneError};

/// Which variables were filled from the checkpoint
#[derive(Debug, Default, Clone)]
pub struct LoadReport {
    /// Variables copied from the file
    pub loaded: Vec<String>,
    /// Variables absent from the file (kept at their initial value)
    pub missing: Vec<String>,
    /// Tensors in the file that match no variable
    pub unused: Vec<String>,
}

/// Copy every tensor of `weights_path` whose name matches a variable of `varmap`.
///
/// Shapes must agree. Unlike `VarMap::load`, variables missing from the file
/// are tolerated so that a fresh classification head can sit on top of a
/// pretrained encoder.
pub fn load_matching_weights<P: AsRef<Path>>(
    varmap: &VarMap,
    weights_path: P,
    device: &Device,
) -> crate::Result<LoadReport> {
    let path = weights_path.as_ref();
    let mut tensors = candle_core::safetensors::load(path, device)?;
    let mut report = LoadReport::default();

    let vars = varmap
        .data()
        .lock()
        .map_err(|e| FinetuneError::Model(format!("VarMap lock poisoned: {}", e)))?;

    let mut names: Vec<&String> = vars.keys().collect();
    names.sort();

    for name in names {
        let var = &vars[name];
        match tensors.remove(name) {
            Some(tensor) => {
                if tensor.dims() != var.dims() {
                    return Err(FinetuneError::Model(format!(
                        "shape mismatch for {}: checkpoint {:?}, model {:?}",
                        name,
                        tensor.dims(),
                        var.dims()
                    )));
                }
                var.set(&tensor.to_dtype(var.dtype())?)?;
                report.loaded.push(name.clone());
            }
            None => report.missing.push(name.clone()),
        }
    }

    report.unused = tensors.into_keys().collect();
    report.unused.sort();

    log::info!(
        "Loaded {} tensors from {:?} ({} missing, {} unused)",
        report.loaded.len(),
        path,
        report.missing.len(),
        report.unused.len()
    );
    for name in &report.missing {
        log::warn!("Not in checkpoint, keeping fresh initialisation: {}", name);
    }
    for name in &report.unused {
        log::debug!("Ignoring checkpoint tensor: {}", name);
    }

    Ok(report)
}

/// Build a classifier and initialise it from a pretrained safetensors file
pub fn load_pretrained<P: AsRef<Path>>(
    config: ClassifierConfig,
    weights_path: P,
    device: &Device,
) -> crate::Result<(TransformerClassifier, VarMap, LoadReport)> {
    let (model, varmap) = TransformerClassifier::with_varmap(config, device)?;
    let report = load_matching_weights(&varmap, weights_path, device)?;
    Ok((model, varmap, report))
}
