//! End-to-end checks of the training and evaluation loops with a model whose
//! threshold is a single learnable scalar, so segmentation is predictable.

use burn::backend::{ndarray::NdArray, Autodiff};
use burn::module::{Module, Param};
use burn::optim::AdamConfig;
use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor};
use data_contracts::SourceImageRecord;
use std::fs;
use std::path::Path;
use training::{
    BinCheckpointer, ConfigError, ConstantLr, EvalMode, ImageLoader, PatchLoader, PatchSample,
    RunLog, ScoreAccumulator, ThresholdEvaluator, ThresholdModel, ThresholdTrainer, TrainerConfig,
    TrainingError, RUN_LOG_HEADER,
};

type Inner = NdArray<f32>;
type ADBackend = Autodiff<Inner>;

#[derive(Module, Debug)]
struct ConstantThreshold<B: Backend> {
    value: Param<Tensor<B, 1>>,
}

impl<B: Backend> ConstantThreshold<B> {
    fn new(value: f32, device: &B::Device) -> Self {
        Self {
            value: Param::from_tensor(Tensor::from_floats([value], device)),
        }
    }
}

impl<B: Backend> ThresholdModel<B> for ConstantThreshold<B> {
    fn forward(&self, inputs: Tensor<B, 4>) -> Tensor<B, 2> {
        let n = inputs.dims()[0];
        self.value.val().reshape([1, 1]).expand(Shape::new([n, 1]))
    }
}

fn config(dir: &Path, patch_shape: [usize; 2]) -> TrainerConfig {
    TrainerConfig {
        epochs: 1,
        batch_size: 1,
        learning_rate: 1e-3,
        log_frequency: 1,
        validation_frequency: 1,
        force_checkpoint: false,
        patch_shape,
        patch_offset: patch_shape,
        log_dir: dir.to_path_buf(),
        log_file: "run.csv".into(),
        checkpoint_name: "thr".into(),
    }
}

fn trainer(cfg: TrainerConfig) -> ThresholdTrainer<ADBackend, BinCheckpointer> {
    let checkpointer = BinCheckpointer::new(&cfg.log_dir, &cfg.checkpoint_name);
    ThresholdTrainer::new(cfg, Default::default(), checkpointer).unwrap()
}

fn evaluator(cfg: TrainerConfig) -> ThresholdEvaluator<Inner, BinCheckpointer> {
    let checkpointer = BinCheckpointer::new(&cfg.log_dir, &cfg.checkpoint_name);
    ThresholdEvaluator::new(cfg, Default::default(), checkpointer).unwrap()
}

fn sample(prob_map: Vec<f32>, labels: Vec<bool>, target: f32) -> PatchSample {
    PatchSample {
        input: vec![0.0; prob_map.len()],
        target_threshold: target,
        prob_map,
        labels,
    }
}

/// 2x2 patch: labels [[1,1],[0,0]]; at threshold 0.5 the segmentation is [[1,0],[0,0]].
fn two_by_two() -> PatchSample {
    sample(
        vec![0.9, 0.3, 0.2, 0.1],
        vec![true, true, false, false],
        0.6,
    )
}

fn fields(line: &str) -> Vec<String> {
    line.split(',').map(str::to_string).collect()
}

fn metric(field: &str) -> f64 {
    field.parse::<f64>().unwrap()
}

#[test]
fn one_epoch_logs_batch_diagnostics_and_checkpoints() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), [2, 2]);
    let train = PatchLoader::new(vec![two_by_two()], [2, 2], 1).unwrap();
    let validation = vec![ImageLoader::new(
        SourceImageRecord::new("val.png", (2, 2)),
        PatchLoader::new(vec![two_by_two()], [2, 2], 1).unwrap(),
    )];

    let mut schedule = ConstantLr(cfg.learning_rate);
    let mut trainer = trainer(cfg);
    let device = Default::default();
    let model = ConstantThreshold::<ADBackend>::new(0.5, &device);
    let mut optim = AdamConfig::new().init();
    trainer
        .train(model, &mut optim, &mut schedule, &train, Some(&validation))
        .unwrap();

    let text = fs::read_to_string(tmp.path().join("run.csv")).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], RUN_LOG_HEADER);
    assert_eq!(lines.len(), 3, "header, one train row, one eval row");

    let row = fields(lines[1]);
    assert_eq!(&row[..4], &["0", "0", "1", "1"]);
    assert!((metric(&row[4]) - 1.0).abs() < 1e-9);
    assert!((metric(&row[5]) - 0.5).abs() < 1e-9);
    assert!((metric(&row[6]) - 0.667).abs() < 1e-3);
    assert!((metric(&row[7]) - 0.75).abs() < 1e-9);
    // (0.5 - 0.6)^2 over one prediction
    assert!((metric(&row[8]) - 0.01).abs() < 1e-4);

    let eval_row = fields(lines[2]);
    assert_eq!(&eval_row[..4], &["val.png", "1", "1", "0"]);

    let state = trainer.checkpoint();
    assert_eq!(state.epochs, 1);
    assert!((state.score - 2.0 / 3.0).abs() < 1e-9);
    assert!(tmp.path().join("thr.bin").exists());
    assert!(tmp.path().join("thr.json").exists());
}

#[test]
fn validation_runs_only_on_multiples_of_its_frequency() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = config(tmp.path(), [2, 2]);
    cfg.epochs = 3;
    cfg.validation_frequency = 2;
    let train = PatchLoader::new(vec![two_by_two()], [2, 2], 1).unwrap();
    let validation = vec![ImageLoader::new(
        SourceImageRecord::new("val.png", (2, 2)),
        PatchLoader::new(vec![two_by_two()], [2, 2], 1).unwrap(),
    )];

    let mut schedule = ConstantLr(cfg.learning_rate);
    let mut trainer = trainer(cfg);
    let model = ConstantThreshold::<ADBackend>::new(0.5, &Default::default());
    let mut optim = AdamConfig::new().init();
    trainer
        .train(model, &mut optim, &mut schedule, &train, Some(&validation))
        .unwrap();

    let text = fs::read_to_string(tmp.path().join("run.csv")).unwrap();
    let rows: Vec<Vec<String>> = text.lines().skip(1).map(fields).collect();
    let train_epochs: Vec<&str> = rows
        .iter()
        .filter(|r| r[1] == "0")
        .map(|r| r[2].as_str())
        .collect();
    let eval_epochs: Vec<&str> = rows
        .iter()
        .filter(|r| r[1] == "1")
        .map(|r| r[2].as_str())
        .collect();
    assert_eq!(train_epochs, vec!["1", "2", "3"]);
    assert_eq!(eval_epochs, vec!["2"]);
    assert_eq!(trainer.checkpoint().epochs, 3);
}

#[test]
fn training_without_validation_fails_before_any_epoch() {
    let tmp = tempfile::tempdir().unwrap();
    let train = PatchLoader::new(vec![two_by_two()], [2, 2], 1).unwrap();
    let mut trainer = trainer(config(tmp.path(), [2, 2]));
    let model = ConstantThreshold::<ADBackend>::new(0.5, &Default::default());
    let mut optim = AdamConfig::new().init();

    let mut schedule = ConstantLr(1e-3);
    let err = trainer
        .train(model, &mut optim, &mut schedule, &train, None)
        .unwrap_err();
    assert!(matches!(
        err,
        TrainingError::Config(ConfigError::MissingValidation)
    ));
    assert_eq!(trainer.checkpoint().epochs, 0);
    assert!(!tmp.path().join("run.csv").exists());
}

/// One 2x8 image cut into two 2x4 patches with confusion counts
/// (TP=3, FP=1, TN=4, FN=0) and (TP=2, FP=0, TN=5, FN=1) at threshold 0.5.
fn two_patch_image() -> ImageLoader {
    let labels = vec![true, true, true, false, false, false, false, false];
    let first = sample(
        vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        labels.clone(),
        0.5,
    );
    let second = sample(
        vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        labels,
        0.5,
    );
    ImageLoader::new(
        SourceImageRecord::new("scan.tif", (2, 8)),
        PatchLoader::new(vec![first, second], [2, 4], 1).unwrap(),
    )
}

#[test]
fn evaluation_merges_batch_scores_per_image() {
    let tmp = tempfile::tempdir().unwrap();
    let mut evaluator = evaluator(config(tmp.path(), [2, 4]));
    let model = ConstantThreshold::<Inner>::new(0.5, &Default::default());
    let images = vec![two_patch_image()];
    let mut log = RunLog::from_writer(Vec::new()).unwrap();

    let report = evaluator
        .evaluate(&model, &images, false, Some(&mut log), EvalMode::Test)
        .unwrap();

    assert_eq!(report.images.len(), 1);
    assert_eq!(
        report.images[0].score,
        ScoreAccumulator::from_counts(5, 1, 9, 1)
    );
    assert_eq!(report.score, ScoreAccumulator::from_counts(5, 1, 9, 1));

    let text = String::from_utf8(log.get_ref().clone()).unwrap();
    let rows: Vec<&str> = text.lines().skip(1).collect();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.starts_with("scan.tif,1,0,0,")));
}

#[test]
fn test_mode_writes_reconstructed_mask() {
    let tmp = tempfile::tempdir().unwrap();
    let mut evaluator = evaluator(config(tmp.path(), [2, 4]));
    let model = ConstantThreshold::<Inner>::new(0.5, &Default::default());
    let mut log = RunLog::from_writer(Vec::new()).unwrap();

    let report = evaluator
        .evaluate(&model, &[two_patch_image()], false, Some(&mut log), EvalMode::Test)
        .unwrap();

    let path = tmp.path().join("scan.png");
    assert_eq!(report.images[0].mask_path.as_deref(), Some(path.as_path()));
    let mask = image::open(&path).unwrap().to_luma8();
    assert_eq!(mask.dimensions(), (8, 2));
    assert_eq!(
        mask.as_raw(),
        &vec![
            255, 255, 255, 255, 255, 255, 0, 0, //
            0, 0, 0, 0, 0, 0, 0, 0,
        ]
    );
    // test mode never touches the checkpoint
    assert!(!tmp.path().join("thr.bin").exists());
}

#[test]
fn train_mode_evaluation_feeds_checkpoint_decision() {
    let tmp = tempfile::tempdir().unwrap();
    let mut evaluator = evaluator(config(tmp.path(), [2, 4]));
    let model = ConstantThreshold::<Inner>::new(0.5, &Default::default());
    let mut log = RunLog::from_writer(Vec::new()).unwrap();

    let report = evaluator
        .evaluate(&model, &[two_patch_image()], false, Some(&mut log), EvalMode::Train)
        .unwrap();

    assert!(report.images[0].mask_path.is_none());
    assert!(!tmp.path().join("scan.png").exists());
    assert!((evaluator.checkpoint().score - report.score.f1()).abs() < 1e-12);
    assert!(tmp.path().join("thr.bin").exists());
}

#[test]
fn evaluation_preconditions_fail_fast() {
    let tmp = tempfile::tempdir().unwrap();
    let mut evaluator = evaluator(config(tmp.path(), [2, 4]));
    let model = ConstantThreshold::<Inner>::new(0.5, &Default::default());
    let images = vec![two_patch_image()];

    let err = evaluator
        .evaluate::<_, Vec<u8>>(&model, &images, false, None, EvalMode::Test)
        .unwrap_err();
    assert!(matches!(
        err,
        TrainingError::Config(ConfigError::MissingLogger)
    ));

    let mut log = RunLog::from_writer(Vec::new()).unwrap();
    let err = evaluator
        .evaluate(
            &model,
            &images,
            false,
            Some(&mut log),
            EvalMode::Other("validate".into()),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        TrainingError::Config(ConfigError::UnsupportedMode(mode)) if mode == "validate"
    ));
    let text = String::from_utf8(log.get_ref().clone()).unwrap();
    assert_eq!(text.trim_end(), RUN_LOG_HEADER);
}
