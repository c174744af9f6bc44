//! The training loop.

mod worker;

pub use worker::*;

use std::{fmt, path::PathBuf};

/// The stage of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Initializing,
    Training,
    Validating,
    Checkpointing,
    Testing,
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Training => "training",
            Self::Validating => "validating",
            Self::Checkpointing => "checkpointing",
            Self::Testing => "testing",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Tracks the current phase and logs every transition.
#[derive(Debug)]
pub struct PhaseTracker {
    phase: Phase,
    history: Vec<Phase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        tracing::info!("phase: {}", Phase::Initializing);
        Self {
            phase: Phase::Initializing,
            history: vec![Phase::Initializing],
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The visited phases in order, without repeats of the same phase.
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    pub fn enter(&mut self, phase: Phase) {
        if phase != self.phase {
            tracing::info!("phase: {} -> {}", self.phase, phase);
            self.phase = phase;
            self.history.push(phase);
        }
    }
}

/// The outcome of a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    /// The epoch training started from.
    pub init_epoch: usize,
    pub completed_epochs: usize,
    pub num_validations: usize,
    /// The number of checkpoint files written in this run.
    pub num_checkpoints: usize,
    pub best_auroc: Option<f64>,
    pub early_stopped: bool,
    /// The checkpoint evaluated on the test split, or `None` if the last
    /// model was evaluated or there is no test split.
    pub tested_checkpoint: Option<PathBuf>,
    pub phases: Vec<Phase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// The mean of losses since the last reset.
#[derive(Debug, Clone, Default)]
pub struct RunningLoss {
    sum: f64,
    count: usize,
}

impl RunningLoss {
    pub fn add(&mut self, loss: f64) {
        self.sum += loss;
        self.count += 1;
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_loss() {
        let mut running = RunningLoss::default();
        assert_eq!(running.mean(), None);
        running.add(1.0);
        running.add(2.0);
        assert_eq!(running.mean(), Some(1.5));
        running.reset();
        assert_eq!(running.mean(), None);
    }

    #[test]
    fn phase_transitions() {
        let mut tracker = PhaseTracker::new();
        assert_eq!(tracker.phase(), Phase::Initializing);
        tracker.enter(Phase::Training);
        tracker.enter(Phase::Validating);
        tracker.enter(Phase::Validating);
        assert_eq!(tracker.phase(), Phase::Validating);
        assert_eq!(
            tracker.history(),
            [Phase::Initializing, Phase::Training, Phase::Validating]
        );
        assert_eq!(Phase::Checkpointing.to_string(), "checkpointing");
    }
}
