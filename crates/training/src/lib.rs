#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod logger;
pub mod merge;
pub mod metrics;
pub mod schedule;
pub mod trainer;
pub mod util;

pub use checkpoint::{load_model_file, BinCheckpointer, CheckpointDecision, CheckpointOutcome, CheckpointState};
pub use config::{EvalMode, TrainerConfig};
pub use dataset::{collate, ImageLoader, PatchBatch, PatchLoader, PatchSample};
pub use error::{ConfigError, TrainingError, TrainingResult};
pub use logger::{LogRow, RowKind, RunLog, RUN_LOG_HEADER};
pub use merge::{merge_patches, scale_mask};
pub use metrics::{Prf1a, ScoreAccumulator};
pub use models::{ThresholdModel, ThresholdRegressor, ThresholdRegressorConfig};
pub use schedule::{ConstantLr, EpochLrSchedule, StepDecay};
pub use trainer::{segment, EvalReport, ImageReport, ThresholdEvaluator, ThresholdTrainer};
pub use util::{run_eval, run_train, EvalArgs, TrainArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
