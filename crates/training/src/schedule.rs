/// Learning rate to use for a given (1-based) epoch.
pub trait EpochLrSchedule {
    fn lr_for_epoch(&mut self, epoch: usize) -> f64;
}

/// Multiply the rate by `factor` on every `every`-th epoch while it is still
/// at or above `floor`.
#[derive(Debug, Clone, Copy)]
pub struct StepDecay {
    lr: f64,
    pub every: usize,
    pub factor: f64,
    pub floor: f64,
}

impl StepDecay {
    pub fn new(initial_lr: f64) -> Self {
        Self {
            lr: initial_lr,
            every: 30,
            factor: 0.7,
            floor: 1e-5,
        }
    }

    pub fn current(&self) -> f64 {
        self.lr
    }
}

impl EpochLrSchedule for StepDecay {
    fn lr_for_epoch(&mut self, epoch: usize) -> f64 {
        if self.every > 0 && epoch % self.every == 0 && self.lr >= self.floor {
            self.lr *= self.factor;
        }
        self.lr
    }
}

/// Fixed rate for every epoch.
#[derive(Debug, Clone, Copy)]
pub struct ConstantLr(pub f64);

impl EpochLrSchedule for ConstantLr {
    fn lr_for_epoch(&mut self, _epoch: usize) -> f64 {
        self.0
    }
}
