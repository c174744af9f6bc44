use crate::{common::*, config::LearningRateSchedule};

/// Computes the learning rate of each epoch and validation.
#[derive(Debug, Clone)]
pub enum LrScheduler {
    Constant {
        lr: f64,
    },
    StepWise {
        lr: f64,
        epochs: Vec<(usize, f64)>,
    },
    ReduceOnPlateau {
        lr: f64,
        factor: f64,
        patience: usize,
        min_lr: f64,
        best_loss: Option<f64>,
        num_bad_validations: usize,
    },
}

impl LrScheduler {
    pub fn new(config: &LearningRateSchedule, init_epoch: usize) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut scheduler = match *config {
            LearningRateSchedule::Constant { lr } => Self::Constant { lr: lr.raw() },
            LearningRateSchedule::StepWise { ref epochs } => Self::StepWise {
                lr: epochs[0].1.raw(),
                epochs: epochs
                    .iter()
                    .map(|&(epoch, lr)| (epoch, lr.raw()))
                    .collect(),
            },
            LearningRateSchedule::ReduceOnPlateau {
                lr,
                factor,
                patience,
                min_lr,
            } => Self::ReduceOnPlateau {
                lr: lr.raw(),
                factor: factor.raw(),
                patience,
                min_lr: min_lr.raw(),
                best_loss: None,
                num_bad_validations: 0,
            },
        };
        scheduler.set_epoch(init_epoch);

        Ok(scheduler)
    }

    pub fn lr(&self) -> f64 {
        match *self {
            Self::Constant { lr } => lr,
            Self::StepWise { lr, .. } => lr,
            Self::ReduceOnPlateau { lr, .. } => lr,
        }
    }

    /// Update the learning rate at the start of an epoch.
    pub fn set_epoch(&mut self, epoch: usize) -> f64 {
        if let Self::StepWise { lr, epochs } = self {
            let index = match epochs.binary_search_by_key(&epoch, |(start, _)| *start) {
                Ok(index) => index,
                Err(index) => index.saturating_sub(1),
            };
            *lr = epochs[index].1;
        }
        self.lr()
    }

    /// Update the learning rate with a validation loss.
    pub fn on_validation(&mut self, loss: f64) -> f64 {
        if let Self::ReduceOnPlateau {
            lr,
            factor,
            patience,
            min_lr,
            best_loss,
            num_bad_validations,
        } = self
        {
            if best_loss.map_or(true, |best| loss < best) {
                *best_loss = Some(loss);
                *num_bad_validations = 0;
            } else {
                *num_bad_validations += 1;
            }

            if *num_bad_validations > *patience {
                let new_lr = (*lr * *factor).max(*min_lr);
                if new_lr < *lr {
                    info!("reduce learning rate from {:e} to {:e}", *lr, new_lr);
                }
                *lr = new_lr;
                *num_bad_validations = 0;
            }
        }
        self.lr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_wise_transitions() {
        let config = LearningRateSchedule::StepWise {
            epochs: vec![(0, r64(0.1)), (3, r64(0.01)), (6, r64(0.001))],
        };
        let mut scheduler = LrScheduler::new(&config, 0).unwrap();
        let lrs: Vec<_> = (0..8).map(|epoch| scheduler.set_epoch(epoch)).collect();
        assert_eq!(lrs, [0.1, 0.1, 0.1, 0.01, 0.01, 0.01, 0.001, 0.001]);

        // resuming picks the rate of the epoch
        let scheduler = LrScheduler::new(&config, 4).unwrap();
        assert_eq!(scheduler.lr(), 0.01);
    }

    #[test]
    fn reduce_on_plateau() {
        let config = LearningRateSchedule::ReduceOnPlateau {
            lr: r64(1.0),
            factor: r64(0.5),
            patience: 1,
            min_lr: r64(0.2),
        };
        let mut scheduler = LrScheduler::new(&config, 0).unwrap();

        assert_eq!(scheduler.on_validation(1.0), 1.0);
        assert_eq!(scheduler.on_validation(0.9), 1.0);
        // the first bad validation is tolerated
        assert_eq!(scheduler.on_validation(0.95), 1.0);
        assert_eq!(scheduler.on_validation(0.9), 0.5);
        assert_eq!(scheduler.on_validation(0.8), 0.5);
        assert_eq!(scheduler.on_validation(0.8), 0.5);
        assert_eq!(scheduler.on_validation(0.8), 0.25);
        assert_eq!(scheduler.on_validation(0.8), 0.25);
        // clamped by min_lr
        assert_eq!(scheduler.on_validation(0.8), 0.2);

        // epochs do not change it
        assert_eq!(scheduler.set_epoch(10), 0.2);
    }

    #[test]
    fn constant_rate() {
        let config = LearningRateSchedule::Constant { lr: r64(0.01) };
        let mut scheduler = LrScheduler::new(&config, 5).unwrap();
        assert_eq!(scheduler.set_epoch(6), 0.01);
        assert_eq!(scheduler.on_validation(1.0), 0.01);

        let config = LearningRateSchedule::Constant { lr: r64(-0.01) };
        assert!(LrScheduler::new(&config, 0).is_err());
    }
}
