//! Step-indexed value schedules (learning-rate annealing)

/// Trait for schedules indexed by global environment step
pub trait Schedule: Send + Sync {
    /// Value at step `t`
    fn value(&self, t: u64) -> f64;
}

/// Linear interpolation from `start` to `end` over `steps`, then held at `end`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSchedule {
    /// Starting value
    pub start: f64,
    /// Ending value
    pub end: f64,
    /// Number of steps for the decay
    pub steps: u64,
}

impl LinearSchedule {
    /// Create a new linear schedule
    #[must_use]
    pub fn new(start: f64, end: f64, steps: u64) -> Self {
        Self { start, end, steps }
    }
}

impl Schedule for LinearSchedule {
    fn value(&self, t: u64) -> f64 {
        if t >= self.steps {
            self.end
        } else {
            let progress = t as f64 / self.steps as f64;
            self.start + (self.end - self.start) * progress
        }
    }
}

/// Constant schedule
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantSchedule {
    /// Constant value
    pub value: f64,
}

impl Schedule for ConstantSchedule {
    fn value(&self, _t: u64) -> f64 {
        self.value
    }
}

/// Learning-rate schedule for a run: linear decay to zero when annealing
#[must_use]
pub fn learning_rate_schedule(
    learning_rate: f64,
    anneal: bool,
    total_timesteps: u64,
) -> Box<dyn Schedule> {
    if anneal {
        Box::new(LinearSchedule::new(learning_rate, 0.0, total_timesteps))
    } else {
        Box::new(ConstantSchedule { value: learning_rate })
    }
}
