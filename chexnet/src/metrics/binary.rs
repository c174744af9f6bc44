//! Metrics of a single binary class.

use crate::common::*;

/// The confusion matrix of a binary classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinaryCounts {
    pub true_pos: usize,
    pub false_pos: usize,
    pub true_neg: usize,
    pub false_neg: usize,
}

impl BinaryCounts {
    /// Count predictions. A probability is positive if it is at least the threshold.
    pub fn new(probs: &[f32], targets: &[bool], threshold: f64) -> Self {
        debug_assert_eq!(probs.len(), targets.len());

        probs
            .iter()
            .zip(targets)
            .fold(Self::default(), |mut counts, (&prob, &target)| {
                let pred = prob as f64 >= threshold;
                match (pred, target) {
                    (true, true) => counts.true_pos += 1,
                    (true, false) => counts.false_pos += 1,
                    (false, false) => counts.true_neg += 1,
                    (false, true) => counts.false_neg += 1,
                }
                counts
            })
    }

    pub fn total(&self) -> usize {
        self.true_pos + self.false_pos + self.true_neg + self.false_neg
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_pos + self.true_neg, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_pos, self.true_pos + self.false_pos)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_pos, self.true_pos + self.false_neg)
    }

    pub fn f1(&self) -> f64 {
        ratio(
            2 * self.true_pos,
            2 * self.true_pos + self.false_pos + self.false_neg,
        )
    }
}

/// Zero if the denominator is zero.
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// The end of the run of equal probabilities starting at `start` in the
/// sorted order. The run holds at least one element, NaN included.
fn tie_end(order: &[usize], probs: &[f32], start: usize) -> usize {
    let value = probs[order[start]];
    order[start + 1..]
        .iter()
        .position(|&index| probs[index].total_cmp(&value) != Ordering::Equal)
        .map(|offset| start + 1 + offset)
        .unwrap_or(order.len())
}

/// The area under the ROC curve, computed from ranks of probabilities.
///
/// Tied probabilities get averaged ranks. It is undefined if the targets are
/// all positive or all negative.
pub fn roc_auc(probs: &[f32], targets: &[bool]) -> Option<f64> {
    debug_assert_eq!(probs.len(), targets.len());

    let num_pos = targets.iter().filter(|&&target| target).count();
    let num_neg = targets.len() - num_pos;
    if num_pos == 0 || num_neg == 0 {
        return None;
    }

    let order: Vec<usize> = (0..probs.len())
        .sorted_by(|&lhs, &rhs| probs[lhs].total_cmp(&probs[rhs]))
        .collect();

    // sum of 1-based ranks of positives
    let mut pos_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let end = tie_end(&order, probs, start);

        let avg_rank = (start + 1 + end) as f64 / 2.0;
        let num_tied_pos = order[start..end]
            .iter()
            .filter(|&&index| targets[index])
            .count();
        pos_rank_sum += avg_rank * num_tied_pos as f64;
        start = end;
    }

    let num_pos = num_pos as f64;
    let num_neg = num_neg as f64;
    Some((pos_rank_sum - num_pos * (num_pos + 1.0) / 2.0) / (num_pos * num_neg))
}

/// The threshold maximizing F1 on the precision/recall curve and the F1 there.
///
/// Candidate thresholds are the distinct probabilities. It is undefined if
/// there is no positive target.
pub fn best_f1_threshold(probs: &[f32], targets: &[bool]) -> Option<(f64, f64)> {
    debug_assert_eq!(probs.len(), targets.len());

    let num_pos = targets.iter().filter(|&&target| target).count();
    if num_pos == 0 {
        return None;
    }

    // sweep thresholds from high to low
    let order: Vec<usize> = (0..probs.len())
        .sorted_by(|&lhs, &rhs| probs[rhs].total_cmp(&probs[lhs]))
        .collect();

    let mut best: Option<(f64, f64)> = None;
    let mut true_pos = 0;
    let mut false_pos = 0;
    let mut start = 0;
    while start < order.len() {
        let value = probs[order[start]];
        let end = tie_end(&order, probs, start);

        order[start..end].iter().for_each(|&index| {
            if targets[index] {
                true_pos += 1;
            } else {
                false_pos += 1;
            }
        });

        let f1 = ratio(2 * true_pos, true_pos + false_pos + num_pos);
        if best.map_or(true, |(_, best_f1)| f1 > best_f1) {
            best = Some((value as f64, f1));
        }
        start = end;
    }

    best
}
