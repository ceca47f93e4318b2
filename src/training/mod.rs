/// Training infrastructure: schedule, clipping, evaluation, the trainer loop
pub mod checkpoint;
pub mod evaluation;
pub mod grad_clip;
pub mod report;
pub mod scheduler;
pub mod trainer;

pub use checkpoint::{export_run, ExportedRun};
pub use evaluation::{evaluate, EvalMetrics};
pub use grad_clip::{clip_grad_norm, global_grad_norm};
pub use scheduler::LinearScheduler;
pub use trainer::{EpochSummary, StepOutput, Trainer, TrainingConfig, TrainingHistory};
