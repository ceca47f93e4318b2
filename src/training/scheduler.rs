/// Linear learning rate schedule with warmup
///
/// The multiplier rises linearly from 0 to 1 over `warmup_steps`, then falls
/// linearly to 0 at `total_steps` and stays there.
#[derive(Debug, Clone)]
pub struct LinearScheduler {
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    current_step: usize,
}

impl LinearScheduler {
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps,
            current_step: 0,
        }
    }

    /// Multiplier applied to the base learning rate at `step`
    pub fn multiplier_at_step(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return step as f64 / self.warmup_steps.max(1) as f64;
        }
        let remaining = self.total_steps.saturating_sub(step) as f64;
        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        (remaining / decay_steps).max(0.0)
    }

    /// Learning rate for a specific step
    pub fn get_lr_at_step(&self, step: usize) -> f64 {
        self.base_lr * self.multiplier_at_step(step)
    }

    /// Learning rate for the current step
    pub fn get_lr(&self) -> f64 {
        self.get_lr_at_step(self.current_step)
    }

    pub fn step(&mut self) {
        self.current_step += 1;
    }

    pub fn get_step(&self) -> usize {
        self.current_step
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }
}
