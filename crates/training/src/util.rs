use burn::backend::Autodiff;
use burn::optim::AdamConfig;
use clap::{Parser, ValueEnum};
use data_contracts::ImageManifest;
use std::path::{Path, PathBuf};

use crate::checkpoint::load_model_file;
use crate::dataset::{image_loaders, training_loader};
use crate::{
    BinCheckpointer, EvalMode, RunLog, StepDecay, ThresholdEvaluator, ThresholdRegressor,
    ThresholdRegressorConfig, ThresholdTrainer, TrainBackend, TrainerConfig,
};

type ADBackend = Autodiff<TrainBackend>;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train a per-patch threshold regressor scored by segmentation F1"
)]
pub struct TrainArgs {
    /// JSON run configuration (missing keys take defaults).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Manifest of training images.
    #[arg(long)]
    pub train_manifest: PathBuf,
    /// Manifest of validation images.
    #[arg(long)]
    pub val_manifest: PathBuf,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Override the configured epoch count.
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Always write a checkpoint after validation.
    #[arg(long, default_value_t = false)]
    pub force_checkpoint: bool,
    /// Resume from the checkpoint in the log directory if present.
    #[arg(long, default_value_t = false)]
    pub resume: bool,
}

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a threshold regressor checkpoint and write reconstructed masks"
)]
pub struct EvalArgs {
    /// JSON run configuration (missing keys take defaults).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Manifest of images to evaluate.
    #[arg(long)]
    pub manifest: PathBuf,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Model record to evaluate (defaults to `<log_dir>/<checkpoint_name>.bin`).
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
    /// Evaluation mode: "test" writes masks, "train" feeds the checkpoint decision.
    #[arg(long, default_value = "test")]
    pub mode: String,
}

impl EvalArgs {
    fn checkpoint_path(&self, checkpointer: &BinCheckpointer) -> PathBuf {
        self.checkpoint
            .clone()
            .unwrap_or_else(|| checkpointer.model_path())
    }
}

/// Install the fmt subscriber used by the binaries (`RUST_LOG` overrides `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TrainerConfig> {
    match path {
        Some(p) => TrainerConfig::from_path(p)
            .map_err(|e| anyhow::anyhow!("failed to load config {}: {e}", p.display())),
        None => Ok(TrainerConfig::default()),
    }
}

fn load_manifest(path: &Path) -> anyhow::Result<ImageManifest> {
    ImageManifest::from_path(path)
        .map_err(|e| anyhow::anyhow!("failed to load manifest {}: {e}", path.display()))
}

fn model_config(cfg: &TrainerConfig) -> ThresholdRegressorConfig {
    ThresholdRegressorConfig {
        patch_shape: cfg.patch_shape,
        ..Default::default()
    }
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    let mut cfg = load_config(args.config.as_deref())?;
    if let Some(epochs) = args.epochs {
        cfg.epochs = epochs;
    }
    cfg.force_checkpoint |= args.force_checkpoint;
    cfg.validate()?;

    let geometry = cfg.geometry();
    let train_manifest = load_manifest(&args.train_manifest)?;
    let val_manifest = load_manifest(&args.val_manifest)?;
    let train = training_loader(&train_manifest, &geometry, cfg.batch_size)?;
    if train.is_empty() {
        anyhow::bail!(
            "training manifest {} yields no patches",
            args.train_manifest.display()
        );
    }
    let validation = image_loaders(&val_manifest, &geometry, cfg.batch_size)?;

    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let checkpointer = BinCheckpointer::new(&cfg.log_dir, &cfg.checkpoint_name);
    let mut model = ThresholdRegressor::<ADBackend>::new(model_config(&cfg), &device);
    let mut state = None;
    if args.resume {
        if let Some(saved) = checkpointer.load_state()? {
            model = checkpointer.load_model::<ADBackend, _>(model, &device)?;
            tracing::info!(epochs = saved.epochs, score = saved.score, "resumed from checkpoint");
            state = Some(saved);
        }
    }

    let mut optim = AdamConfig::new().init();
    let mut schedule = StepDecay::new(cfg.learning_rate);
    let mut trainer = ThresholdTrainer::<ADBackend, _>::new(cfg, device, checkpointer)?;
    if let Some(state) = state {
        trainer = trainer.with_checkpoint_state(state);
    }
    trainer.train(model, &mut optim, &mut schedule, &train, Some(&validation))?;

    let best = trainer.checkpoint();
    println!(
        "Training complete: epochs={}, best f1={:.4}",
        best.epochs, best.score
    );
    Ok(())
}

pub fn run_eval(args: EvalArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    let cfg = load_config(args.config.as_deref())?;
    let mode: EvalMode = args.mode.parse()?;
    let geometry = cfg.geometry();
    let manifest = load_manifest(&args.manifest)?;
    let images = image_loaders(&manifest, &geometry, cfg.batch_size)?;

    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();
    let checkpointer = BinCheckpointer::new(&cfg.log_dir, &cfg.checkpoint_name);
    let state = checkpointer.load_state()?.unwrap_or_default();
    let model = ThresholdRegressor::<TrainBackend>::new(model_config(&cfg), &device);
    let checkpoint_path = args.checkpoint_path(&checkpointer);
    let model = match load_model_file::<TrainBackend, _>(&checkpoint_path, model.clone(), &device) {
        Ok(m) => m,
        Err(e) => {
            println!(
                "Failed to load checkpoint {}; using fresh model ({e})",
                checkpoint_path.display()
            );
            model
        }
    };

    let log_path = cfg.log_dir.join(format!("{mode}_{}", cfg.log_file));
    let mut log = RunLog::create(&log_path)?;
    let force = cfg.force_checkpoint;
    let mut evaluator =
        ThresholdEvaluator::<TrainBackend, _>::new(cfg, device, checkpointer)?
            .with_checkpoint_state(state);
    let report = evaluator.evaluate(&model, &images, force, Some(&mut log), mode)?;
    if let Err(err) = log.close() {
        tracing::debug!("ignoring run log close error: {err}");
    }

    let m = report.score.prf1a();
    println!(
        "Eval complete: precision={:.3}, recall={:.3}, f1={:.3}, accuracy={:.3} (tp={}, fp={}, tn={}, fn={})",
        m.precision,
        m.recall,
        m.f1,
        m.accuracy,
        report.score.tp(),
        report.score.fp(),
        report.score.tn(),
        report.score.fn_()
    );
    for image in report.images.iter().filter_map(|r| r.mask_path.as_ref()) {
        println!("wrote {}", image.display());
    }
    Ok(())
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; the WGPU backend is used despite --backend nd-array");
        }
        _ => {}
    }
    Ok(())
}
