use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("manifest lists no images")]
    Empty,
    #[error("image entry has an empty file_name")]
    MissingFileName,
    #[error("duplicate file_name in manifest: {0}")]
    DuplicateFileName(String),
    #[error("threshold for {file_name} is not finite: {value}")]
    NonFiniteThreshold { file_name: String, value: f32 },
}

/// Identity of one original image that patches were cut from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceImageRecord {
    pub file_name: String,
    /// Working array shape as `(rows, cols)`.
    pub shape: (usize, usize),
}

impl SourceImageRecord {
    pub fn new(file_name: impl Into<String>, shape: (usize, usize)) -> Self {
        Self {
            file_name: file_name.into(),
            shape,
        }
    }

    /// File name up to the first `.`, used to name reconstructed masks.
    pub fn base_name(&self) -> &str {
        self.file_name
            .split('.')
            .next()
            .unwrap_or(self.file_name.as_str())
    }
}

/// One image triple plus the upstream per-patch target thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEntry {
    pub file_name: String,
    /// Greyscale source image, relative to the manifest directory.
    pub image: PathBuf,
    /// Precomputed probability map (0..255), same size as `image`.
    pub prob_map: PathBuf,
    /// Ground-truth mask; non-zero pixels are foreground.
    pub mask: PathBuf,
    /// Target threshold per grid window, row-major.
    pub thresholds: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(skip)]
    pub root: PathBuf,
    pub images: Vec<ImageEntry>,
}

impl ImageManifest {
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let bytes = std::fs::read(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest: ImageManifest =
            serde_json::from_slice(&bytes).map_err(|source| ManifestError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        manifest.root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.images.is_empty() {
            return Err(ManifestError::Empty);
        }
        let mut seen = std::collections::HashSet::new();
        for entry in &self.images {
            if entry.file_name.trim().is_empty() {
                return Err(ManifestError::MissingFileName);
            }
            if !seen.insert(entry.file_name.as_str()) {
                return Err(ManifestError::DuplicateFileName(entry.file_name.clone()));
            }
            if let Some(value) = entry.thresholds.iter().copied().find(|v| !v.is_finite()) {
                return Err(ManifestError::NonFiniteThreshold {
                    file_name: entry.file_name.clone(),
                    value,
                });
            }
        }
        Ok(())
    }

    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }
}
