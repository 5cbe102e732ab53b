use crate::error::{TrainingError, TrainingResult};
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor, TensorData};
use data_contracts::{ImageEntry, ImageManifest, PatchGeometry, SourceImageRecord};
use image::GrayImage;
use std::path::Path;

/// One patch cut from a source image, kept on the host until collation.
#[derive(Debug, Clone)]
pub struct PatchSample {
    /// Model input, row-major `[rows, cols]`, scaled to [0, 1].
    pub input: Vec<f32>,
    pub target_threshold: f32,
    /// Upstream probability map for the patch, 0..255 scale.
    pub prob_map: Vec<f32>,
    /// Ground-truth foreground mask.
    pub labels: Vec<bool>,
}

#[derive(Debug, Clone)]
pub struct PatchBatch<B: Backend> {
    /// Shape `[batch, 1, rows, cols]`.
    pub inputs: Tensor<B, 4>,
    /// Shape `[batch]`.
    pub y_thresholds: Tensor<B, 1>,
    /// Shape `[batch, rows, cols]`.
    pub prob_map: Tensor<B, 3>,
    /// Shape `[batch, rows, cols]`.
    pub labels: Tensor<B, 3, Bool>,
}

/// Sequential, fixed-order batches over a list of patches.
#[derive(Debug, Clone)]
pub struct PatchLoader {
    samples: Vec<PatchSample>,
    patch_shape: [usize; 2],
    batch_size: usize,
}

impl PatchLoader {
    pub fn new(
        samples: Vec<PatchSample>,
        patch_shape: [usize; 2],
        batch_size: usize,
    ) -> TrainingResult<Self> {
        let area = patch_shape[0] * patch_shape[1];
        for sample in &samples {
            for len in [sample.input.len(), sample.prob_map.len(), sample.labels.len()] {
                if len != area {
                    return Err(TrainingError::ShapeMismatch {
                        expected: patch_shape.to_vec(),
                        actual: vec![len],
                    });
                }
            }
        }
        Ok(Self {
            samples,
            patch_shape,
            batch_size: batch_size.max(1),
        })
    }

    pub fn patch_shape(&self) -> [usize; 2] {
        self.patch_shape
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Number of batches one pass yields.
    pub fn len(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter<'a, B: Backend>(
        &'a self,
        device: &'a B::Device,
    ) -> impl Iterator<Item = TrainingResult<PatchBatch<B>>> + 'a {
        self.samples
            .chunks(self.batch_size)
            .map(move |chunk| collate::<B>(chunk, self.patch_shape, device))
    }
}

/// Patches of a single source image, evaluated as one unit.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    pub image: SourceImageRecord,
    pub patches: PatchLoader,
}

impl ImageLoader {
    pub fn new(image: SourceImageRecord, patches: PatchLoader) -> Self {
        Self { image, patches }
    }
}

pub fn collate<B: Backend>(
    samples: &[PatchSample],
    patch_shape: [usize; 2],
    device: &B::Device,
) -> TrainingResult<PatchBatch<B>> {
    if samples.is_empty() {
        return Err(TrainingError::Data("cannot collate empty batch".into()));
    }
    let batch = samples.len();
    let [rows, cols] = patch_shape;
    let area = rows * cols;

    let mut inputs = Vec::with_capacity(batch * area);
    let mut thresholds = Vec::with_capacity(batch);
    let mut prob_map = Vec::with_capacity(batch * area);
    let mut labels = Vec::with_capacity(batch * area);
    for sample in samples {
        inputs.extend_from_slice(&sample.input);
        thresholds.push(sample.target_threshold);
        prob_map.extend_from_slice(&sample.prob_map);
        labels.extend_from_slice(&sample.labels);
    }

    Ok(PatchBatch {
        inputs: Tensor::from_data(TensorData::new(inputs, [batch, 1, rows, cols]), device),
        y_thresholds: Tensor::from_data(TensorData::new(thresholds, [batch]), device),
        prob_map: Tensor::from_data(TensorData::new(prob_map, [batch, rows, cols]), device),
        labels: Tensor::from_data(TensorData::new(labels, [batch, rows, cols]), device),
    })
}

/// Cut every grid window of one manifest entry into a [`PatchSample`].
pub fn load_image_patches(
    manifest: &ImageManifest,
    entry: &ImageEntry,
    geometry: &PatchGeometry,
) -> TrainingResult<(SourceImageRecord, Vec<PatchSample>)> {
    let image = open_gray(&manifest.resolve(&entry.image))?;
    let prob_path = manifest.resolve(&entry.prob_map);
    let mask_path = manifest.resolve(&entry.mask);
    let prob = open_gray(&prob_path)?;
    let mask = open_gray(&mask_path)?;
    let (width, height) = image.dimensions();
    for (path, other) in [(prob_path, &prob), (mask_path, &mask)] {
        if other.dimensions() != (width, height) {
            return Err(TrainingError::ImageShape {
                path,
                expected: [height as usize, width as usize],
                actual: [other.height() as usize, other.width() as usize],
            });
        }
    }

    let shape = (height as usize, width as usize);
    let windows = geometry.windows(shape)?;
    if windows.len() != entry.thresholds.len() {
        return Err(TrainingError::SizeMismatch {
            expected: windows.len(),
            actual: entry.thresholds.len(),
        });
    }

    let cols = width as usize;
    let mut samples = Vec::with_capacity(windows.len());
    for (window, &target_threshold) in windows.iter().zip(entry.thresholds.iter()) {
        let area = window.rows() * window.cols();
        let mut input = Vec::with_capacity(area);
        let mut prob_map = Vec::with_capacity(area);
        let mut labels = Vec::with_capacity(area);
        for r in window.row_from..window.row_to {
            let start = r * cols + window.col_from;
            let end = r * cols + window.col_to;
            input.extend(image.as_raw()[start..end].iter().map(|&v| v as f32 / 255.0));
            prob_map.extend(prob.as_raw()[start..end].iter().map(|&v| v as f32));
            labels.extend(mask.as_raw()[start..end].iter().map(|&v| v > 0));
        }
        samples.push(PatchSample {
            input,
            target_threshold,
            prob_map,
            labels,
        });
    }
    Ok((SourceImageRecord::new(entry.file_name.clone(), shape), samples))
}

/// All patches of every manifest image in one sequential loader.
pub fn training_loader(
    manifest: &ImageManifest,
    geometry: &PatchGeometry,
    batch_size: usize,
) -> TrainingResult<PatchLoader> {
    let mut samples = Vec::new();
    for entry in &manifest.images {
        let (_, patches) = load_image_patches(manifest, entry, geometry)?;
        samples.extend(patches);
    }
    PatchLoader::new(samples, geometry.patch_shape, batch_size)
}

/// One loader per manifest image, in manifest order.
pub fn image_loaders(
    manifest: &ImageManifest,
    geometry: &PatchGeometry,
    batch_size: usize,
) -> TrainingResult<Vec<ImageLoader>> {
    manifest
        .images
        .iter()
        .map(|entry| {
            let (record, patches) = load_image_patches(manifest, entry, geometry)?;
            Ok(ImageLoader::new(
                record,
                PatchLoader::new(patches, geometry.patch_shape, batch_size)?,
            ))
        })
        .collect()
}

fn open_gray(path: &Path) -> TrainingResult<GrayImage> {
    image::open(path)
        .map(|img| img.to_luma8())
        .map_err(|source| TrainingError::Image {
            path: path.to_path_buf(),
            source,
        })
}
