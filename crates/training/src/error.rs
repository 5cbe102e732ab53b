//! Error taxonomy for the training crate.

use data_contracts::{GeometryError, ManifestError};
use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = Result<T, TrainingError>;

/// Preconditions that abort a loop before any work is done.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a validation loader is required for training")]
    MissingValidation,
    #[error("a run logger is required for evaluation")]
    MissingLogger,
    #[error("unsupported evaluation mode: {0:?}")]
    UnsupportedMode(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("{path} is {actual:?} (rows, cols) but its source image is {expected:?}")]
    ImageShape {
        path: PathBuf,
        expected: [usize; 2],
        actual: [usize; 2],
    },
    #[error("size mismatch: expected {expected} patches, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("run log error: {0}")]
    RunLog(#[from] csv::Error),
    #[error("checkpoint record error: {0}")]
    Recorder(String),
    #[error("{0}")]
    Data(String),
}

impl From<burn::record::RecorderError> for TrainingError {
    fn from(err: burn::record::RecorderError) -> Self {
        TrainingError::Recorder(format!("{err:?}"))
    }
}

impl TrainingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrainingError::Io {
            path: path.into(),
            source,
        }
    }
}
