use crate::error::{ConfigError, TrainingError, TrainingResult};
use data_contracts::PatchGeometry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Run configuration consumed read-only by the training and evaluation loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Print a progress line every N training batches.
    pub log_frequency: usize,
    /// Run validation every N epochs.
    pub validation_frequency: usize,
    pub force_checkpoint: bool,
    pub patch_shape: [usize; 2],
    pub patch_offset: [usize; 2],
    /// Directory for the run log, checkpoints, and reconstructed masks.
    pub log_dir: PathBuf,
    pub log_file: String,
    pub checkpoint_name: String,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 32,
            learning_rate: 1e-3,
            log_frequency: 10,
            validation_frequency: 1,
            force_checkpoint: false,
            patch_shape: [32, 32],
            patch_offset: [16, 16],
            log_dir: PathBuf::from("runs"),
            log_file: "thresholds.csv".to_string(),
            checkpoint_name: "threshold_regressor".to_string(),
        }
    }
}

impl TrainerConfig {
    pub fn from_path(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| TrainingError::io(path, e))?;
        let cfg: TrainerConfig =
            serde_json::from_slice(&bytes).map_err(|source| TrainingError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_frequency == 0 {
            return Err(ConfigError::Invalid("log_frequency must be > 0".into()));
        }
        if self.validation_frequency == 0 {
            return Err(ConfigError::Invalid(
                "validation_frequency must be > 0".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be > 0".into()));
        }
        self.geometry()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn geometry(&self) -> PatchGeometry {
        PatchGeometry::new(self.patch_shape, self.patch_offset)
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(&self.log_file)
    }
}

/// Which branch of the evaluation loop is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalMode {
    /// Validation during training; feeds the checkpoint decision.
    Train,
    /// Standalone evaluation; writes a reconstructed mask per image.
    Test,
    /// Anything else. Rejected by the evaluation loop.
    Other(String),
}

impl FromStr for EvalMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "train" => EvalMode::Train,
            "test" => EvalMode::Test,
            _ => EvalMode::Other(s.to_string()),
        })
    }
}

impl std::fmt::Display for EvalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalMode::Train => f.write_str("train"),
            EvalMode::Test => f.write_str("test"),
            EvalMode::Other(s) => f.write_str(s),
        }
    }
}
