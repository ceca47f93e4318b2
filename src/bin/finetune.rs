/// Fine-tune a transformer classifier on a pre-tokenized NumPy dataset
use std::path::PathBuf;

use clap::Parser;
use cls_finetune::data::{BatchDataLoader, ClassificationDataLoader, ClassificationDataset};
use cls_finetune::models::load_pretrained;
use cls_finetune::training::Trainer;
use cls_finetune::utils::{count_parameters, select_device};
use cls_finetune::{RunConfig, TransformerClassifier};

#[derive(Parser, Debug)]
#[command(name = "finetune", version, about = "Fine-tune a sequence classifier")]
struct Cli {
    /// Directory with input_ids.npy, labels.npy (and optionally attention_mask.npy, dataset.json)
    #[arg(long)]
    train_dir: PathBuf,

    /// Validation directory, same layout as --train-dir
    #[arg(long)]
    val_dir: Option<PathBuf>,

    /// JSON run configuration ({"model": {...}, "training": {...}})
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pretrained weights (safetensors) to start from
    #[arg(long)]
    pretrained: Option<PathBuf>,

    /// Override the number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Override the batch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Override the peak learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Evaluate on --val-dir after every epoch
    #[arg(long)]
    evaluate: bool,

    /// Write model.safetensors and training_history.json here
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Seed for shuffling
    #[arg(long)]
    seed: Option<u64>,

    /// Stay on CPU even if CUDA is available
    #[arg(long)]
    cpu: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut run = match &cli.config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };
    if let Some(epochs) = cli.epochs {
        run.training.num_epochs = epochs;
    }
    if let Some(batch_size) = cli.batch_size {
        run.training.batch_size = batch_size;
    }
    if let Some(lr) = cli.lr {
        run.training.learning_rate = lr;
    }
    if cli.seed.is_some() {
        run.training.shuffle_seed = cli.seed;
    }
    if cli.output_dir.is_some() {
        run.training.output_dir = cli.output_dir.clone();
    }
    run.training.evaluation |= cli.evaluate;

    let device = select_device(cli.cpu)?;
    log::info!("Using device: {:?}", device);

    let train_set = ClassificationDataset::from_directory(&cli.train_dir)?;
    if train_set.num_classes() != run.model.num_classes {
        log::warn!(
            "Dataset has {} classes, config says {}; using the dataset",
            train_set.num_classes(),
            run.model.num_classes
        );
        run.model.num_classes = train_set.num_classes();
    }
    if train_set.seq_len() > run.model.max_position_embeddings {
        anyhow::bail!(
            "sequence length {} exceeds max_position_embeddings {}",
            train_set.seq_len(),
            run.model.max_position_embeddings
        );
    }
    run.validate()?;

    let mut train_loader = ClassificationDataLoader::new(
        train_set,
        run.training.batch_size,
        true,
        run.training.shuffle_seed,
    )?;
    let mut val_loader = match &cli.val_dir {
        Some(dir) => Some(ClassificationDataLoader::new(
            ClassificationDataset::from_directory(dir)?,
            run.training.batch_size,
            false,
            None,
        )?),
        None => None,
    };
    if run.training.evaluation && val_loader.is_none() {
        anyhow::bail!("--evaluate needs --val-dir");
    }

    let (model, varmap) = match &cli.pretrained {
        Some(path) => {
            let (model, varmap, _report) = load_pretrained(run.model.clone(), path, &device)?;
            (model, varmap)
        }
        None => TransformerClassifier::with_varmap(run.model.clone(), &device)?,
    };
    log::info!(
        "Model: {} layers, hidden {}, {:.2}M parameters",
        run.model.num_layers,
        run.model.hidden_size,
        count_parameters(&varmap) as f64 / 1_000_000.0
    );

    let mut trainer = Trainer::new(model, varmap, run.training.clone(), device)?;
    let history = trainer.train(
        &mut train_loader,
        val_loader.as_mut().map(|l| l as &mut dyn BatchDataLoader),
    )?;

    if let Some(last) = history.last() {
        log::info!(
            "Final train loss {:.6} after {} steps",
            last.train_loss,
            last.global_step
        );
    }

    Ok(())
}
