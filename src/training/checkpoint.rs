/// Export of the fine-tuned weights and the training history
use std::path::{Path, PathBuf};

use candle_nn::VarMap;

use super::trainer::TrainingHistory;

pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const HISTORY_FILE: &str = "training_history.json";

/// Paths written by [`export_run`]
#[derive(Debug, Clone)]
pub struct ExportedRun {
    pub weights: PathBuf,
    pub history: PathBuf,
}

/// Write `varmap` as safetensors and `history` as pretty JSON into `dir`
pub fn export_run<P: AsRef<Path>>(
    varmap: &VarMap,
    history: &TrainingHistory,
    dir: P,
) -> crate::Result<ExportedRun> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let weights = dir.join(WEIGHTS_FILE);
    log::info!("Saving fine-tuned weights to {:?}", weights);
    varmap.save(&weights)?;

    let history_path = dir.join(HISTORY_FILE);
    let file = std::fs::File::create(&history_path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), history)?;

    Ok(ExportedRun {
        weights,
        history: history_path,
    })
}

/// Read a history written by [`export_run`]
pub fn load_history<P: AsRef<Path>>(path: P) -> crate::Result<TrainingHistory> {
    let file = std::fs::File::open(path.as_ref())?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}
