//! Threshold regression training loop and segmentation-quality evaluation.
//!
//! Training optimizes only the MSE between predicted and target thresholds.
//! Segmentation metrics are derived from the predicted thresholds for
//! diagnostics, and the run-wide validation F1 is the only signal that
//! reaches the checkpoint decision.

use crate::checkpoint::{CheckpointDecision, CheckpointState};
use crate::config::{EvalMode, TrainerConfig};
use crate::dataset::{ImageLoader, PatchLoader};
use crate::error::{ConfigError, TrainingError, TrainingResult};
use crate::logger::{LogRow, RowKind, RunLog};
use crate::merge::{merge_patches, scale_mask};
use crate::metrics::ScoreAccumulator;
use crate::schedule::EpochLrSchedule;
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Bool, ElementConversion, Shape, Tensor};
use data_contracts::PatchGeometry;
use models::ThresholdModel;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Run-wide and per-image scores from one evaluation pass.
#[derive(Debug, Clone)]
pub struct EvalReport {
    pub score: ScoreAccumulator,
    pub images: Vec<ImageReport>,
}

#[derive(Debug, Clone)]
pub struct ImageReport {
    pub file_name: String,
    pub score: ScoreAccumulator,
    pub mean_loss: f32,
    /// Reconstructed mask written in test mode.
    pub mask_path: Option<PathBuf>,
}

/// Scores a model over per-image patch loaders and, in train mode, drives
/// the checkpoint decision. Works on any backend; no gradients are tracked.
pub struct ThresholdEvaluator<B: Backend, C> {
    config: TrainerConfig,
    device: B::Device,
    checkpoint: CheckpointState,
    checkpointer: C,
}

impl<B: Backend, C> ThresholdEvaluator<B, C> {
    pub fn new(config: TrainerConfig, device: B::Device, checkpointer: C) -> TrainingResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            device,
            checkpoint: CheckpointState::default(),
            checkpointer,
        })
    }

    /// Resume from previously persisted checkpoint state.
    pub fn with_checkpoint_state(mut self, state: CheckpointState) -> Self {
        self.checkpoint = state;
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn checkpoint(&self) -> &CheckpointState {
        &self.checkpoint
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Score `model` over each image's patches.
    ///
    /// In [`EvalMode::Train`] the run-wide F1 goes to the checkpoint decision.
    /// In [`EvalMode::Test`] a reconstructed mask is written per image.
    pub fn evaluate<M, W>(
        &mut self,
        model: &M,
        images: &[ImageLoader],
        force_checkpoint: bool,
        log: Option<&mut RunLog<W>>,
        mode: EvalMode,
    ) -> TrainingResult<EvalReport>
    where
        M: ThresholdModel<B> + Module<B>,
        C: CheckpointDecision<B, M>,
        W: Write,
    {
        let log = log.ok_or(ConfigError::MissingLogger)?;
        if let EvalMode::Other(other) = &mode {
            return Err(ConfigError::UnsupportedMode(other.clone()).into());
        }

        tracing::info!(mode = %mode, images = images.len(), "evaluation started");
        println!("\nEvaluating...");
        let geometry = self.config.geometry();
        let report = evaluate_images::<B, M, W>(
            model,
            images,
            &self.device,
            log,
            &EvalContext {
                epoch: self.checkpoint.epochs,
                mode: &mode,
                geometry: &geometry,
                out_dir: &self.config.log_dir,
            },
        )?;

        if mode == EvalMode::Train {
            self.checkpointer.save_if_better(
                &mut self.checkpoint,
                model,
                report.score.f1(),
                force_checkpoint,
            )?;
        }
        Ok(report)
    }
}

/// Threshold regression on an autodiff backend. Validation goes through a
/// [`ThresholdEvaluator`] on the inner backend.
pub struct ThresholdTrainer<B: AutodiffBackend, C> {
    evaluator: ThresholdEvaluator<B::InnerBackend, C>,
}

impl<B: AutodiffBackend, C> ThresholdTrainer<B, C> {
    pub fn new(config: TrainerConfig, device: B::Device, checkpointer: C) -> TrainingResult<Self> {
        Ok(Self {
            evaluator: ThresholdEvaluator::new(config, device, checkpointer)?,
        })
    }

    /// Resume from previously persisted checkpoint state.
    pub fn with_checkpoint_state(mut self, state: CheckpointState) -> Self {
        self.evaluator = self.evaluator.with_checkpoint_state(state);
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        self.evaluator.config()
    }

    pub fn checkpoint(&self) -> &CheckpointState {
        self.evaluator.checkpoint()
    }

    pub fn device(&self) -> &B::Device {
        self.evaluator.device()
    }

    /// Run all configured epochs and return the trained model.
    ///
    /// `schedule` supplies the learning rate at the start of every epoch.
    /// Validation runs every `validation_frequency` epochs in train mode and
    /// is the only path by which the checkpoint can change.
    pub fn train<M, O, S>(
        &mut self,
        mut model: M,
        optim: &mut O,
        schedule: &mut S,
        data: &PatchLoader,
        validation: Option<&[ImageLoader]>,
    ) -> TrainingResult<M>
    where
        M: AutodiffModule<B> + ThresholdModel<B>,
        M::InnerModule: ThresholdModel<B::InnerBackend>,
        O: Optimizer<M, B>,
        S: EpochLrSchedule,
        C: CheckpointDecision<B::InnerBackend, M::InnerModule>,
    {
        let validation = validation.ok_or(ConfigError::MissingValidation)?;
        let config = self.evaluator.config().clone();
        let mut log = RunLog::create(&config.log_path())?;
        let device = self.device().clone();
        let epochs = config.epochs;
        let log_frequency = config.log_frequency;
        let total_batches = data.len();

        tracing::info!(epochs, batches = total_batches, "training started");
        println!("Training...");
        for epoch in 1..=epochs {
            let lr = schedule.lr_for_epoch(epoch);
            let mut running_loss = 0.0f32;
            for (idx, batch) in data.iter::<B>(&device).enumerate() {
                let i = idx + 1;
                let batch = batch?;

                let thr = flatten_thresholds(model.forward(batch.inputs));
                let loss = MseLoss::new().forward(
                    thr.clone(),
                    batch.y_thresholds,
                    Reduction::Mean,
                );
                let loss_value: f32 = loss.clone().into_scalar().elem();
                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(lr, model, grads);

                let current_loss = loss_value / thr.dims()[0] as f32;
                let segmented = segment(batch.prob_map, thr);
                let mut score = ScoreAccumulator::new();
                score.add(batch.labels, segmented)?;
                let m = score.prf1a();

                running_loss += current_loss;
                if i % log_frequency == 0 {
                    println!(
                        "Epochs[{epoch}/{epochs}] Batch[{i}/{total_batches}] mse:{:.5} pre:{:.3} rec:{:.3} f1:{:.3} acc:{:.3}",
                        running_loss / log_frequency as f32,
                        m.precision,
                        m.recall,
                        m.f1,
                        m.accuracy
                    );
                    running_loss = 0.0;
                }

                log.append(&LogRow {
                    id: "0".to_string(),
                    kind: RowKind::Train,
                    epoch,
                    batch: i,
                    score: m,
                    loss: current_loss,
                })?;
            }

            self.evaluator.checkpoint.record_epoch();
            if epoch % config.validation_frequency == 0 {
                let valid = model.valid();
                self.evaluator.evaluate(
                    &valid,
                    validation,
                    config.force_checkpoint,
                    Some(&mut log),
                    EvalMode::Train,
                )?;
            }
        }

        if let Err(err) = log.close() {
            tracing::debug!("ignoring run log close error: {err}");
        }
        let state = self.checkpoint();
        tracing::info!(epochs = state.epochs, best = state.score, "training complete");
        Ok(model)
    }
}

struct EvalContext<'a> {
    epoch: usize,
    mode: &'a EvalMode,
    geometry: &'a PatchGeometry,
    out_dir: &'a Path,
}

fn evaluate_images<B: Backend, M: ThresholdModel<B>, W: Write>(
    model: &M,
    images: &[ImageLoader],
    device: &B::Device,
    log: &mut RunLog<W>,
    ctx: &EvalContext<'_>,
) -> TrainingResult<EvalReport> {
    let mut eval_score = ScoreAccumulator::new();
    let mut reports = Vec::with_capacity(images.len());

    for loader in images {
        let file_name = loader.image.file_name.clone();
        let mut img_score = ScoreAccumulator::new();
        let mut img_loss = 0.0f32;
        let mut batches = 0usize;
        let mut segmented_img: Vec<u8> = Vec::new();

        for batch in loader.patches.iter::<B>(device) {
            let batch = batch?;
            let thr = flatten_thresholds(model.forward(batch.inputs));
            let loss: f32 = MseLoss::new()
                .forward(thr.clone(), batch.y_thresholds, Reduction::Mean)
                .into_scalar()
                .elem();
            let current_loss = loss / thr.dims()[0] as f32;
            img_loss += current_loss;
            batches += 1;

            let segmented = segment(batch.prob_map, thr);
            let mut current = ScoreAccumulator::new();
            current.add(batch.labels, segmented.clone())?;
            img_score.accumulate(&current);
            eval_score.accumulate(&current);

            if *ctx.mode == EvalMode::Test {
                segmented_img.extend(scale_mask(&mask_to_host(segmented)?));
            }

            log.append(&LogRow {
                id: file_name.clone(),
                kind: RowKind::Eval,
                epoch: ctx.epoch,
                batch: 0,
                score: current.prf1a(),
                loss: current_loss,
            })?;
        }

        let mean_loss = if batches > 0 {
            img_loss / batches as f32
        } else {
            0.0
        };
        let m = img_score.prf1a();
        println!(
            "{file_name} PRF1A: [{:.3}, {:.3}, {:.3}, {:.3}] Loss: {:.5}",
            m.precision, m.recall, m.f1, m.accuracy, mean_loss
        );

        let mask_path = if *ctx.mode == EvalMode::Test {
            let merged = merge_patches(&segmented_img, loader.image.shape, ctx.geometry)?;
            std::fs::create_dir_all(ctx.out_dir).map_err(|e| TrainingError::io(ctx.out_dir, e))?;
            let path = ctx
                .out_dir
                .join(format!("{}.png", loader.image.base_name()));
            merged.save(&path).map_err(|source| TrainingError::Image {
                path: path.clone(),
                source,
            })?;
            Some(path)
        } else {
            None
        };

        reports.push(ImageReport {
            file_name,
            score: img_score,
            mean_loss,
            mask_path,
        });
    }

    Ok(EvalReport {
        score: eval_score,
        images: reports,
    })
}

/// Binarize probability maps `[batch, rows, cols]` against per-patch
/// thresholds `[batch]`.
///
/// Patch `i`'s threshold is compared with every pixel of patch `i`; a pixel
/// is foreground when its probability is greater than or equal to it.
pub fn segment<B: Backend>(prob_map: Tensor<B, 3>, thresholds: Tensor<B, 1>) -> Tensor<B, 3, Bool> {
    let [n, rows, cols] = prob_map.dims();
    let thresholds = thresholds
        .reshape([n, 1, 1])
        .expand(Shape::new([n, rows, cols]));
    prob_map.greater_equal(thresholds)
}

/// `[batch, 1]` model output to `[batch]`, matching the target layout.
fn flatten_thresholds<B: Backend>(thr: Tensor<B, 2>) -> Tensor<B, 1> {
    let n = thr.dims()[0];
    thr.reshape([n])
}

fn mask_to_host<B: Backend, const D: usize>(mask: Tensor<B, D, Bool>) -> TrainingResult<Vec<bool>> {
    mask.into_data()
        .to_vec::<bool>()
        .map_err(|e| TrainingError::Data(format!("failed to read mask: {e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn segment_compares_each_patch_with_its_own_threshold() {
        let device = Default::default();
        let prob = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![10.0f32, 20.0, 30.0, 40.0, 10.0, 20.0, 30.0, 40.0], [2, 2, 2]),
            &device,
        );
        let thr = Tensor::<TestBackend, 1>::from_data(TensorData::new(vec![20.0f32, 35.0], [2]), &device);
        let mask = mask_to_host(segment(prob, thr)).unwrap();
        assert_eq!(
            mask,
            vec![false, true, true, true, false, false, false, true]
        );
    }
}
