/// Counts validations without improvement of the monitored score.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: Option<usize>,
    best: Option<f64>,
    num_bad_validations: usize,
}

impl EarlyStopping {
    /// Create a counter. It never stops if `patience` is `None`.
    pub fn new(patience: Option<usize>, best: Option<f64>) -> Self {
        Self {
            patience,
            best,
            num_bad_validations: 0,
        }
    }

    pub fn num_bad_validations(&self) -> usize {
        self.num_bad_validations
    }

    /// Record a score where higher is better. An undefined score counts as
    /// no improvement. Returns true if training should stop.
    pub fn step(&mut self, score: Option<f64>) -> bool {
        match (score, self.best) {
            (Some(score), Some(best)) if score <= best => self.num_bad_validations += 1,
            (Some(score), _) => {
                self.best = Some(score);
                self.num_bad_validations = 0;
            }
            (None, _) => self.num_bad_validations += 1,
        }

        self.patience
            .map_or(false, |patience| self.num_bad_validations >= patience)
    }
}
