//! Confusion-matrix accumulation for binary segmentation masks.

use crate::error::{TrainingError, TrainingResult};
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, ElementConversion, Tensor};
use serde::{Deserialize, Serialize};

/// Running TP/FP/TN/FN counts plus the metrics derived from them.
///
/// Counts only grow. Merging accumulators is element-wise addition, so the
/// order in which partial scores are combined does not matter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreAccumulator {
    tp: u64,
    fp: u64,
    tn: u64,
    fn_: u64,
}

/// Precision, recall, F1 and accuracy, in that order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Prf1a {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
}

impl ScoreAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_counts(tp: u64, fp: u64, tn: u64, fn_: u64) -> Self {
        Self { tp, fp, tn, fn_ }
    }

    pub fn tp(&self) -> u64 {
        self.tp
    }

    pub fn fp(&self) -> u64 {
        self.fp
    }

    pub fn tn(&self) -> u64 {
        self.tn
    }

    pub fn fn_(&self) -> u64 {
        self.fn_
    }

    pub fn total(&self) -> u64 {
        self.tp + self.fp + self.tn + self.fn_
    }

    /// Compare two masks element-wise and add the resulting counts.
    ///
    /// Both masks must have the same shape; on mismatch nothing is counted.
    pub fn add<B: Backend, const D: usize>(
        &mut self,
        truth: Tensor<B, D, Bool>,
        predicted: Tensor<B, D, Bool>,
    ) -> TrainingResult<&mut Self> {
        let truth_dims = truth.dims();
        let pred_dims = predicted.dims();
        if truth_dims != pred_dims {
            return Err(TrainingError::ShapeMismatch {
                expected: truth_dims.to_vec(),
                actual: pred_dims.to_vec(),
            });
        }
        let total: usize = truth_dims.iter().product();
        if total == 0 {
            return Ok(self);
        }

        let truth = truth.int();
        let predicted = predicted.int();
        let tp = int_sum(truth.clone() * predicted.clone());
        let positives = int_sum(truth);
        let predicted_positives = int_sum(predicted);

        let fp = predicted_positives - tp;
        let fn_ = positives - tp;
        let tn = total as u64 - tp - fp - fn_;
        self.tp += tp;
        self.fp += fp;
        self.tn += tn;
        self.fn_ += fn_;
        Ok(self)
    }

    /// Fold another accumulator's counts into this one.
    pub fn accumulate(&mut self, other: &ScoreAccumulator) -> &mut Self {
        self.tp += other.tp;
        self.fp += other.fp;
        self.tn += other.tn;
        self.fn_ += other.fn_;
        self
    }

    /// Metrics with a zero denominator resolve to 0.
    pub fn prf1a(&self) -> Prf1a {
        let precision = ratio(self.tp, self.tp + self.fp);
        let recall = ratio(self.tp, self.tp + self.fn_);
        let accuracy = ratio(self.tp + self.tn, self.total());
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Prf1a {
            precision,
            recall,
            f1,
            accuracy,
        }
    }

    pub fn f1(&self) -> f64 {
        self.prf1a().f1
    }
}

impl std::ops::AddAssign<&ScoreAccumulator> for ScoreAccumulator {
    fn add_assign(&mut self, rhs: &ScoreAccumulator) {
        self.accumulate(rhs);
    }
}

fn ratio(num: u64, denom: u64) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

fn int_sum<B: Backend, const D: usize>(t: Tensor<B, D, burn::tensor::Int>) -> u64 {
    let sum: i64 = t.sum().into_scalar().elem();
    sum.max(0) as u64
}
