/// Linear learning-rate warmup, advanced once per optimizer step:
/// `lr = base_lr * min((step + 1) / warmup_steps, 1)`.
#[derive(Debug, Clone)]
pub struct WarmupSchedule {
    base_lr:      f64,
    warmup_steps: usize,
    step:         usize,
}

impl WarmupSchedule {
    pub fn new(base_lr: f64, warmup_steps: usize) -> Self {
        Self { base_lr, warmup_steps, step: 0 }
    }

    pub fn current(&self) -> f64 {
        if self.warmup_steps == 0 {
            return self.base_lr;
        }
        let factor = ((self.step + 1) as f64 / self.warmup_steps as f64).min(1.0);
        self.base_lr * factor
    }

    pub fn advance(&mut self) {
        self.step += 1;
    }

    pub fn steps_taken(&self) -> usize {
        self.step
    }
}
