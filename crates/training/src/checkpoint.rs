//! Checkpoint bookkeeping and the save-if-better decision.

use crate::error::{TrainingError, TrainingResult};
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Completed epochs and the best validation F1 seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub epochs: usize,
    pub score: f64,
}

impl CheckpointState {
    pub fn record_epoch(&mut self) {
        self.epochs += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// Score beat the previous best; state persisted.
    Improved,
    /// Persisted because a checkpoint was forced.
    Forced,
    /// Nothing written.
    Skipped,
}

/// Decides whether the current model is worth persisting.
pub trait CheckpointDecision<B: Backend, M: Module<B>> {
    fn save_if_better(
        &mut self,
        state: &mut CheckpointState,
        model: &M,
        score: f64,
        force: bool,
    ) -> TrainingResult<CheckpointOutcome>;
}

/// Writes `<dir>/<name>.bin` (burn record) and `<dir>/<name>.json` (state).
///
/// Forced checkpoints always write. Otherwise a write only happens when the
/// score strictly beats the stored best. The stored best never decreases.
#[derive(Debug, Clone)]
pub struct BinCheckpointer {
    dir: PathBuf,
    name: String,
}

impl BinCheckpointer {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.name))
    }

    pub fn load_state(&self) -> TrainingResult<Option<CheckpointState>> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| TrainingError::io(&path, e))?;
        let state = serde_json::from_slice(&bytes)
            .map_err(|source| TrainingError::Json { path, source })?;
        Ok(Some(state))
    }

    pub fn load_model<B: Backend, M: Module<B>>(
        &self,
        model: M,
        device: &B::Device,
    ) -> TrainingResult<M> {
        load_model_file(&self.model_path(), model, device)
    }

    fn persist<B: Backend, M: Module<B>>(
        &self,
        state: &CheckpointState,
        model: &M,
    ) -> TrainingResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| TrainingError::io(&self.dir, e))?;
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        model.clone().save_file(self.model_path(), &recorder)?;
        write_state(&self.state_path(), state)
    }
}

impl<B: Backend, M: Module<B>> CheckpointDecision<B, M> for BinCheckpointer {
    fn save_if_better(
        &mut self,
        state: &mut CheckpointState,
        model: &M,
        score: f64,
        force: bool,
    ) -> TrainingResult<CheckpointOutcome> {
        let improved = score > state.score;
        if improved {
            state.score = score;
        }
        if force {
            self.persist::<B, M>(state, model)?;
            tracing::info!(
                score,
                best = state.score,
                epochs = state.epochs,
                "forced checkpoint written"
            );
            return Ok(CheckpointOutcome::Forced);
        }
        if improved {
            self.persist::<B, M>(state, model)?;
            tracing::info!(score, epochs = state.epochs, "score improved; checkpoint written");
            Ok(CheckpointOutcome::Improved)
        } else {
            tracing::info!(
                score,
                best = state.score,
                epochs = state.epochs,
                "score did not improve"
            );
            Ok(CheckpointOutcome::Skipped)
        }
    }
}

/// Load a burn binary record into `model`. The `.bin` extension is optional.
pub fn load_model_file<B: Backend, M: Module<B>>(
    path: &Path,
    model: M,
    device: &B::Device,
) -> TrainingResult<M> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    Ok(model.load_file(path.to_path_buf(), &recorder, device)?)
}

fn write_state(path: &Path, state: &CheckpointState) -> TrainingResult<()> {
    let json = serde_json::to_vec_pretty(state).map_err(|source| TrainingError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|e| TrainingError::io(path, e))
}
