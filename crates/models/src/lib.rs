//! Burn models that regress one binarization threshold per image patch.
//!
//! The training and evaluation loops only rely on [`ThresholdModel`]: a
//! callable that maps a batch of patches to one threshold per patch. The
//! concrete [`ThresholdRegressor`] is a small MLP over the flattened patch.
//!
//! Train/eval mode follows the backend: on an autodiff backend the dropout
//! layer is active and gradients are tracked; `AutodiffModule::valid()`
//! yields the inference copy on the inner backend with both disabled.

use burn::module::Module;
use burn::nn;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Maps patches `[batch, channels, rows, cols]` to thresholds `[batch, 1]`.
pub trait ThresholdModel<B: Backend> {
    fn forward(&self, inputs: Tensor<B, 4>) -> Tensor<B, 2>;
}

#[derive(Debug, Clone)]
pub struct ThresholdRegressorConfig {
    pub patch_shape: [usize; 2],
    pub channels: usize,
    pub hidden: usize,
    pub depth: usize,
    pub dropout: f64,
}

impl Default for ThresholdRegressorConfig {
    fn default() -> Self {
        Self {
            patch_shape: [32, 32],
            channels: 1,
            hidden: 128,
            depth: 2,
            dropout: 0.1,
        }
    }
}

impl ThresholdRegressorConfig {
    pub fn input_dim(&self) -> usize {
        self.channels.max(1) * self.patch_shape[0].max(1) * self.patch_shape[1].max(1)
    }
}

#[derive(Debug, Module)]
pub struct ThresholdRegressor<B: Backend> {
    stem: nn::Linear<B>,
    blocks: Vec<nn::Linear<B>>,
    dropout: nn::Dropout,
    head: nn::Linear<B>,
    input_dim: usize,
}

impl<B: Backend> ThresholdRegressor<B> {
    pub fn new(cfg: ThresholdRegressorConfig, device: &B::Device) -> Self {
        let input_dim = cfg.input_dim();
        let stem = nn::LinearConfig::new(input_dim, cfg.hidden).init(device);
        let mut blocks = Vec::new();
        for _ in 0..cfg.depth {
            blocks.push(nn::LinearConfig::new(cfg.hidden, cfg.hidden).init(device));
        }
        let dropout = nn::DropoutConfig::new(cfg.dropout).init();
        let head = nn::LinearConfig::new(cfg.hidden, 1).init(device);
        Self {
            stem,
            blocks,
            dropout,
            head,
            input_dim,
        }
    }
}

impl<B: Backend> ThresholdModel<B> for ThresholdRegressor<B> {
    fn forward(&self, inputs: Tensor<B, 4>) -> Tensor<B, 2> {
        let batch = inputs.dims()[0];
        let x = inputs.reshape([batch, self.input_dim]);
        let mut x = relu(self.stem.forward(x));
        for block in &self.blocks {
            x = relu(block.forward(x));
        }
        let x = self.dropout.forward(x);
        self.head.forward(x)
    }
}

pub mod prelude {
    pub use super::{ThresholdModel, ThresholdRegressor, ThresholdRegressorConfig};
}
