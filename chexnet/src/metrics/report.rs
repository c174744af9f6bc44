use super::binary::{best_f1_threshold, roc_auc, BinaryCounts};
use crate::common::*;
use ndarray::{Array2, ArrayView2};

/// Per-class decision thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThresholdsInit {
    /// The threshold of findings without an override.
    #[serde(default = "default_threshold")]
    pub default: R64,
    /// Thresholds of specific findings.
    #[serde(default)]
    pub overrides: IndexMap<Finding, R64>,
}

fn default_threshold() -> R64 {
    r64(0.5)
}

impl Default for ThresholdsInit {
    fn default() -> Self {
        Self {
            default: default_threshold(),
            overrides: IndexMap::new(),
        }
    }
}

impl ThresholdsInit {
    pub fn build(self) -> Result<Thresholds, ConfigError> {
        let Self { default, overrides } = self;
        let in_range = |value: R64| (0.0..=1.0).contains(&value.raw());

        crate::ensure_config!(
            in_range(default),
            "thresholds",
            "must be in range [0, 1], but get {}",
            default
        );
        if let Some((finding, &value)) = overrides.iter().find(|(_, value)| !in_range(**value)) {
            return Err(ConfigError::new(
                "thresholds",
                format!(
                    "threshold of {} must be in range [0, 1], but get {}",
                    finding, value
                ),
            ));
        }

        let mut values = [default.raw(); NUM_FINDINGS];
        overrides.iter().for_each(|(finding, value)| {
            values[finding.index()] = value.raw();
        });

        Ok(Thresholds { values })
    }
}

/// The validated per-class thresholds in canonical order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    values: [f64; NUM_FINDINGS],
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            values: [0.5; NUM_FINDINGS],
        }
    }
}

impl Thresholds {
    pub fn get(&self, finding: Finding) -> f64 {
        self.values[finding.index()]
    }

    pub fn values(&self) -> &[f64; NUM_FINDINGS] {
        &self.values
    }
}

/// Threshold-dependent and ranking metrics of one finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub finding: Finding,
    pub num_positives: usize,
    pub threshold: f64,
    pub counts: BinaryCounts,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Undefined when the targets contain a single value.
    pub auroc: Option<f64>,
}

/// The F1-optimal threshold of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestThreshold {
    pub finding: Finding,
    pub threshold: f64,
    pub f1: f64,
}

/// The evaluation result over a whole dataset split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub num_samples: usize,
    pub classes: Vec<ClassMetrics>,
    pub macro_accuracy: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    /// The mean over findings with a defined AUC-ROC.
    pub macro_auroc: Option<f64>,
    pub mean_loss: Option<f64>,
    pub best_threshold: Option<BestThreshold>,
}

impl EvaluationReport {
    /// Compute metrics from `[N, C]` probabilities and binary targets.
    pub fn compute(
        probs: ArrayView2<'_, f32>,
        targets: ArrayView2<'_, bool>,
        thresholds: &Thresholds,
        target_finding: Option<Finding>,
        mean_loss: Option<f64>,
    ) -> Self {
        debug_assert_eq!(probs.dim(), targets.dim());
        debug_assert_eq!(probs.ncols(), NUM_FINDINGS);
        let num_samples = probs.nrows();

        let columns: Vec<_> = Finding::all()
            .map(|finding| {
                let index = finding.index();
                let probs = probs.column(index).to_vec();
                let targets = targets.column(index).to_vec();
                (finding, probs, targets)
            })
            .collect();

        let classes: Vec<_> = columns
            .iter()
            .map(|(finding, probs, targets)| {
                let threshold = thresholds.get(*finding);
                let counts = BinaryCounts::new(probs, targets, threshold);
                ClassMetrics {
                    finding: *finding,
                    num_positives: counts.true_pos + counts.false_neg,
                    threshold,
                    counts,
                    accuracy: counts.accuracy(),
                    precision: counts.precision(),
                    recall: counts.recall(),
                    f1: counts.f1(),
                    auroc: roc_auc(probs, targets),
                }
            })
            .collect();

        let mean = |values: Vec<f64>| -> Option<f64> {
            (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
        };
        let macro_of =
            |get: fn(&ClassMetrics) -> f64| mean(classes.iter().map(get).collect()).unwrap_or(0.0);

        let best_threshold = target_finding.and_then(|finding| {
            let (_, probs, targets) = &columns[finding.index()];
            let (threshold, f1) = best_f1_threshold(probs, targets)?;
            Some(BestThreshold {
                finding,
                threshold,
                f1,
            })
        });

        Self {
            num_samples,
            macro_accuracy: macro_of(|class| class.accuracy),
            macro_precision: macro_of(|class| class.precision),
            macro_recall: macro_of(|class| class.recall),
            macro_f1: macro_of(|class| class.f1),
            macro_auroc: mean(classes.iter().filter_map(|class| class.auroc).collect()),
            classes,
            mean_loss,
            best_threshold,
        }
    }

    /// Compute metrics from owned arrays.
    pub fn from_arrays(
        probs: &Array2<f32>,
        targets: &Array2<bool>,
        thresholds: &Thresholds,
        target_finding: Option<Finding>,
        mean_loss: Option<f64>,
    ) -> Self {
        Self::compute(
            probs.view(),
            targets.view(),
            thresholds,
            target_finding,
            mean_loss,
        )
    }

    pub fn class(&self, finding: Finding) -> &ClassMetrics {
        &self.classes[finding.index()]
    }

    /// Write the report to the log, one line per finding.
    pub fn log(&self, title: &str) {
        info!(
            "{}: {} samples, loss {}, macro auroc {}, accuracy {:.4}, precision {:.4}, recall {:.4}, f1 {:.4}",
            title,
            self.num_samples,
            fmt_option(self.mean_loss),
            fmt_option(self.macro_auroc),
            self.macro_accuracy,
            self.macro_precision,
            self.macro_recall,
            self.macro_f1
        );
        self.classes.iter().for_each(|class| {
            info!(
                "{}: {:<18} pos {:>6} auroc {} accuracy {:.4} precision {:.4} recall {:.4} f1 {:.4} @ {:.2}",
                title,
                class.finding.to_string(),
                class.num_positives,
                fmt_option(class.auroc),
                class.accuracy,
                class.precision,
                class.recall,
                class.f1,
                class.threshold
            );
        });
        if let Some(best) = &self.best_threshold {
            info!(
                "{}: best f1 of {} is {:.4} at threshold {:.4}",
                title, best.finding, best.f1, best.threshold
            );
        }
    }
}

fn fmt_option(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{:.4}", value),
        None => "n/a".into(),
    }
}
