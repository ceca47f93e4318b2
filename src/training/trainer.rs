/// Fine-tuning loop for sequence classifiers
use std::path::PathBuf;
use std::time::Instant;

use candle_core::{DType, Device, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use serde::{Deserialize, Serialize};

use super::checkpoint::export_run;
use super::evaluation::{self, EvalMetrics};
use super::grad_clip::clip_grad_norm;
use super::report;
use super::scheduler::LinearScheduler;
use crate::data::{BatchDataLoader, ClassificationBatch};
use crate::models::SequenceClassifier;
use crate::FinetuneError;

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of training epochs
    pub num_epochs: usize,
    /// Batch size used to build the data loaders
    pub batch_size: usize,
    /// Seed for per-epoch shuffling; random when unset
    pub shuffle_seed: Option<u64>,
    /// Peak learning rate
    pub learning_rate: f64,
    /// AdamW epsilon
    pub adam_eps: f64,
    pub beta1: f64,
    pub beta2: f64,
    /// Decoupled weight decay
    pub weight_decay: f64,
    /// Linear warmup steps
    pub warmup_steps: usize,
    /// Schedule length; defaults to batches per epoch * epochs
    pub total_steps: Option<usize>,
    /// Global gradient norm bound, `None` disables clipping
    pub max_grad_norm: Option<f64>,
    /// Evaluate on the validation loader after every epoch
    pub evaluation: bool,
    /// Log every N optimizer steps (0 = never)
    pub log_every: usize,
    /// Fail on NaN/inf loss instead of skipping the batch
    pub abort_on_non_finite_loss: bool,
    /// Where to write the final weights and history
    pub output_dir: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_epochs: 4,
            batch_size: 32,
            shuffle_seed: None,
            learning_rate: 5e-5,
            adam_eps: 1e-8,
            beta1: 0.9,
            beta2: 0.999,
            weight_decay: 0.0,
            warmup_steps: 0,
            total_steps: None,
            max_grad_norm: Some(1.0),
            evaluation: false,
            log_every: 100,
            abort_on_non_finite_loss: true,
            output_dir: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.num_epochs == 0 {
            return Err(FinetuneError::Config("num_epochs must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(FinetuneError::Config("batch_size must be > 0".to_string()));
        }
        if !(self.learning_rate >= 0.0) {
            return Err(FinetuneError::Config(format!(
                "learning_rate must be >= 0, got {}",
                self.learning_rate
            )));
        }
        if !(self.adam_eps > 0.0) {
            return Err(FinetuneError::Config("adam_eps must be > 0".to_string()));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(FinetuneError::Config(format!(
                    "{} must be in [0, 1), got {}",
                    name, beta
                )));
            }
        }
        if let Some(max_norm) = self.max_grad_norm {
            if !(max_norm > 0.0) {
                return Err(FinetuneError::Config(format!(
                    "max_grad_norm must be > 0, got {}",
                    max_norm
                )));
            }
        }
        Ok(())
    }
}

/// Result of one optimizer step
#[derive(Debug, Clone, Copy)]
pub struct StepOutput {
    pub loss: f64,
    /// Gradient norm before clipping, when clipping is enabled
    pub grad_norm: Option<f64>,
    /// Learning rate the step was taken with
    pub learning_rate: f64,
    /// False when the batch was skipped because of a non-finite loss
    pub applied: bool,
}

/// Loss of one pass over the training loader
#[derive(Debug, Clone)]
pub struct EpochLoss {
    pub mean: f64,
    pub batch_losses: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// 1-based
    pub epoch: usize,
    pub train_loss: f64,
    pub validation: Option<EvalMetrics>,
    /// Learning rate the next step would use
    pub learning_rate: f64,
    pub global_step: usize,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochSummary>,
}

impl TrainingHistory {
    pub fn last(&self) -> Option<&EpochSummary> {
        self.epochs.last()
    }

    pub fn train_losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.train_loss).collect()
    }
}

/// Drives optimisation of a [`SequenceClassifier`] whose parameters live in `varmap`
pub struct Trainer<M: SequenceClassifier> {
    model: M,
    varmap: VarMap,
    vars: Vec<Var>,
    optimizer: AdamW,
    scheduler: LinearScheduler,
    config: TrainingConfig,
    device: Device,
    step: usize,
}

impl<M: SequenceClassifier> Trainer<M> {
    pub fn new(model: M, varmap: VarMap, config: TrainingConfig, device: Device) -> crate::Result<Self> {
        config.validate()?;

        let vars = varmap.all_vars();
        if vars.is_empty() {
            return Err(FinetuneError::Config(
                "model has no trainable variables".to_string(),
            ));
        }

        let optimizer = AdamW::new(
            vars.clone(),
            ParamsAdamW {
                lr: config.learning_rate,
                beta1: config.beta1,
                beta2: config.beta2,
                eps: config.adam_eps,
                weight_decay: config.weight_decay,
            },
        )?;

        // Replaced with the real length once `train` knows the loader size
        let scheduler = LinearScheduler::new(
            config.learning_rate,
            config.warmup_steps,
            config.total_steps.unwrap_or(usize::MAX),
        );

        Ok(Self {
            model,
            varmap,
            vars,
            optimizer,
            scheduler,
            config,
            device,
            step: 0,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Optimizer steps taken so far
    pub fn global_step(&self) -> usize {
        self.step
    }

    /// Learning rate the next step will use
    pub fn current_lr(&self) -> f64 {
        self.scheduler.get_lr()
    }

    pub fn into_parts(self) -> (M, VarMap) {
        (self.model, self.varmap)
    }

    /// Forward, loss, backward, clip, optimizer and schedule step for one batch
    pub fn train_step(&mut self, batch: &ClassificationBatch) -> crate::Result<StepOutput> {
        let batch = batch.to_device(&self.device)?;

        let logits = self
            .model
            .forward_t(&batch.input_ids, &batch.attention_mask, true)?;
        let loss = self.model.loss_fn(&logits, &batch.labels)?;
        let loss_val = loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;
        let lr = self.scheduler.get_lr();

        if !loss_val.is_finite() {
            if self.config.abort_on_non_finite_loss {
                return Err(FinetuneError::Training(format!(
                    "non-finite loss {} at step {}",
                    loss_val, self.step
                )));
            }
            log::warn!("Skipping batch with non-finite loss {} at step {}", loss_val, self.step);
            return Ok(StepOutput {
                loss: loss_val,
                grad_norm: None,
                learning_rate: lr,
                applied: false,
            });
        }

        // Each backward pass yields a fresh GradStore, so nothing to zero
        let mut grads = loss.backward()?;

        let grad_norm = match self.config.max_grad_norm {
            Some(max_norm) => Some(clip_grad_norm(&mut grads, &self.vars, max_norm)?),
            None => None,
        };

        self.optimizer.set_learning_rate(lr);
        self.optimizer.step(&grads)?;
        self.scheduler.step();
        self.step += 1;

        log::debug!(
            "step {}: loss={:.6}, grad_norm={:?}, lr={:.3e}",
            self.step,
            loss_val,
            grad_norm,
            lr
        );

        Ok(StepOutput {
            loss: loss_val,
            grad_norm,
            learning_rate: lr,
            applied: true,
        })
    }

    /// One pass over `loader` in training mode
    pub fn train_epoch<L: BatchDataLoader + ?Sized>(&mut self, loader: &mut L) -> crate::Result<EpochLoss> {
        loader.reset();

        let mut batch_losses = Vec::with_capacity(loader.num_batches());
        while let Some(batch) = loader.next_batch()? {
            let output = self.train_step(&batch)?;
            if output.applied {
                batch_losses.push(output.loss);
            }

            if self.config.log_every > 0 && output.applied && self.step % self.config.log_every == 0 {
                log::info!(
                    "Step {}: loss={:.4}, lr={:.3e}",
                    self.step,
                    output.loss,
                    output.learning_rate
                );
            }
        }

        if batch_losses.is_empty() {
            return Err(FinetuneError::Data(
                "training loader yielded no usable batches".to_string(),
            ));
        }

        Ok(EpochLoss {
            mean: evaluation::mean(&batch_losses),
            batch_losses,
        })
    }

    /// Evaluate the current model in inference mode
    pub fn evaluate<L: BatchDataLoader + ?Sized>(&self, loader: &mut L) -> crate::Result<EvalMetrics> {
        evaluation::evaluate(&self.model, loader, &self.device)
    }

    /// Full training loop: `num_epochs` passes, optional evaluation after each
    pub fn train<L: BatchDataLoader + ?Sized>(
        &mut self,
        train_loader: &mut L,
        mut val_loader: Option<&mut dyn BatchDataLoader>,
    ) -> crate::Result<TrainingHistory> {
        if self.config.evaluation && val_loader.is_none() {
            return Err(FinetuneError::Config(
                "evaluation requested but no validation loader given".to_string(),
            ));
        }

        let num_batches = train_loader.num_batches();
        if num_batches == 0 {
            return Err(FinetuneError::Data("training loader is empty".to_string()));
        }

        let total_steps = self
            .config
            .total_steps
            .unwrap_or(num_batches * self.config.num_epochs);
        self.scheduler = LinearScheduler::new(
            self.config.learning_rate,
            self.config.warmup_steps,
            total_steps,
        );

        log::info!(
            "Start training: {} epochs x {} batches, {} schedule steps",
            self.config.num_epochs,
            num_batches,
            total_steps
        );

        let mut history = TrainingHistory::default();
        for epoch in 1..=self.config.num_epochs {
            let start = Instant::now();

            let epoch_loss = self.train_epoch(train_loader)?;

            let validation = match (self.config.evaluation, val_loader.as_deref_mut()) {
                (true, Some(loader)) => Some(self.evaluate(loader)?),
                _ => None,
            };

            let elapsed_secs = start.elapsed().as_secs_f64();
            report::print_epoch(epoch, epoch_loss.mean, validation.as_ref());
            log::info!(
                "Epoch {}/{} complete: train_loss={:.6}, step={}",
                epoch,
                self.config.num_epochs,
                epoch_loss.mean,
                self.step
            );

            history.epochs.push(EpochSummary {
                epoch,
                train_loss: epoch_loss.mean,
                validation,
                learning_rate: self.scheduler.get_lr(),
                global_step: self.step,
                elapsed_secs,
            });
        }

        log::info!("Training complete!");

        if let Some(dir) = &self.config.output_dir {
            export_run(&self.varmap, &history, dir)?;
        }

        Ok(history)
    }
}
