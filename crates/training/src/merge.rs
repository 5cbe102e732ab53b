//! Reassembly of a full-resolution mask from per-patch predictions.

use crate::error::{TrainingError, TrainingResult};
use data_contracts::PatchGeometry;
use image::GrayImage;

/// Scale a binary mask to the 8-bit mask alphabet {0, 255}.
pub fn scale_mask(mask: &[bool]) -> Vec<u8> {
    mask.iter().map(|&v| if v { 255 } else { 0 }).collect()
}

/// Stitch patches back into an image of `image_shape` = `(rows, cols)`.
///
/// `patches` holds every patch row-major and back to back, in the order the
/// windows of [`PatchGeometry::windows`] are produced. Where windows overlap,
/// each output pixel is the integer mean of the non-zero values covering it,
/// and 0 when nothing non-zero covers it. For {0, 255} masks this is the
/// union of the positive predictions. The result depends only on the inputs.
pub fn merge_patches(
    patches: &[u8],
    image_shape: (usize, usize),
    geometry: &PatchGeometry,
) -> TrainingResult<GrayImage> {
    let windows = geometry.windows(image_shape)?;
    let area = geometry.patch_area();
    if patches.len() % area != 0 {
        return Err(TrainingError::Data(format!(
            "patch buffer of {} values is not a whole number of {:?} patches",
            patches.len(),
            geometry.patch_shape
        )));
    }
    let count = patches.len() / area;
    if count != windows.len() {
        return Err(TrainingError::SizeMismatch {
            expected: windows.len(),
            actual: count,
        });
    }

    let (rows, cols) = image_shape;
    let mut sum = vec![0u32; rows * cols];
    let mut hits = vec![0u32; rows * cols];
    let patch_cols = geometry.patch_shape[1];
    for (window, patch) in windows.iter().zip(patches.chunks_exact(area)) {
        for r in 0..window.rows() {
            let src = &patch[r * patch_cols..(r + 1) * patch_cols];
            let dst_base = (window.row_from + r) * cols + window.col_from;
            for (c, &v) in src.iter().enumerate() {
                if v > 0 {
                    sum[dst_base + c] += v as u32;
                    hits[dst_base + c] += 1;
                }
            }
        }
    }

    let pixels: Vec<u8> = sum
        .iter()
        .zip(hits.iter())
        .map(|(&s, &n)| if n == 0 { 0 } else { (s / n) as u8 })
        .collect();
    GrayImage::from_raw(cols as u32, rows as u32, pixels)
        .ok_or_else(|| TrainingError::Data("merged buffer does not match image size".into()))
}
