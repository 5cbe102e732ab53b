use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("patch dimensions must be non-zero: {0:?}")]
    EmptyPatch([usize; 2]),
    #[error("patch stride must be non-zero: {0:?}")]
    ZeroStride([usize; 2]),
    #[error("patch {patch:?} does not fit inside image {image:?}")]
    PatchLargerThanImage {
        patch: [usize; 2],
        image: (usize, usize),
    },
}

/// Patch shape and row/column stride used to tile a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchGeometry {
    /// Patch size as `[rows, cols]`.
    pub patch_shape: [usize; 2],
    /// Step between consecutive windows as `[rows, cols]`.
    pub offset: [usize; 2],
}

/// Half-open pixel window `[row_from, row_to) x [col_from, col_to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchWindow {
    pub row_from: usize,
    pub row_to: usize,
    pub col_from: usize,
    pub col_to: usize,
}

impl PatchWindow {
    pub fn rows(&self) -> usize {
        self.row_to - self.row_from
    }

    pub fn cols(&self) -> usize {
        self.col_to - self.col_from
    }
}

impl PatchGeometry {
    pub fn new(patch_shape: [usize; 2], offset: [usize; 2]) -> Self {
        Self {
            patch_shape,
            offset,
        }
    }

    pub fn patch_area(&self) -> usize {
        self.patch_shape[0] * self.patch_shape[1]
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.patch_shape.contains(&0) {
            return Err(GeometryError::EmptyPatch(self.patch_shape));
        }
        if self.offset.contains(&0) {
            return Err(GeometryError::ZeroStride(self.offset));
        }
        Ok(())
    }

    /// Tile an image of `(rows, cols)` into patch windows, row-major.
    ///
    /// Each axis starts at 0 and advances by the stride. A window that would
    /// run past the image edge is shifted back so it ends on the edge, and no
    /// further windows are produced along that axis.
    pub fn windows(&self, image_shape: (usize, usize)) -> Result<Vec<PatchWindow>, GeometryError> {
        self.validate()?;
        let (rows, cols) = image_shape;
        let [patch_rows, patch_cols] = self.patch_shape;
        if patch_rows > rows || patch_cols > cols {
            return Err(GeometryError::PatchLargerThanImage {
                patch: self.patch_shape,
                image: image_shape,
            });
        }

        let row_spans = axis_spans(rows, patch_rows, self.offset[0]);
        let col_spans = axis_spans(cols, patch_cols, self.offset[1]);
        let mut windows = Vec::with_capacity(row_spans.len() * col_spans.len());
        for &(row_from, row_to) in &row_spans {
            for &(col_from, col_to) in &col_spans {
                windows.push(PatchWindow {
                    row_from,
                    row_to,
                    col_from,
                    col_to,
                });
            }
        }
        Ok(windows)
    }

    pub fn window_count(&self, image_shape: (usize, usize)) -> Result<usize, GeometryError> {
        self.windows(image_shape).map(|w| w.len())
    }
}

fn axis_spans(len: usize, patch: usize, stride: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    for start in (0..len).step_by(stride) {
        if start + patch > len {
            spans.push((len - patch, len));
            break;
        }
        spans.push((start, start + patch));
    }
    spans
}
