use super::*;
use crate::common::*;

/// The records of the train, validation and test splits.
#[derive(Debug, Clone, Default)]
pub struct DataSplit {
    pub train: Vec<Arc<ImageRecord>>,
    pub val: Vec<Arc<ImageRecord>>,
    pub test: Vec<Arc<ImageRecord>>,
}

/// Options to split records into train, validation and test sets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitInit {
    /// The fraction of records in the validation split.
    pub val_ratio: R64,
    /// The fraction of records in the test split.
    pub test_ratio: R64,
    /// Keep all images of a patient in the same split.
    pub group_by_patient: bool,
    pub seed: u64,
}

impl SplitInit {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Self {
            val_ratio,
            test_ratio,
            ..
        } = *self;
        let unit = r64(0.0)..r64(1.0);
        crate::ensure_config!(
            unit.contains(&val_ratio),
            "val_ratio",
            "must be in range [0, 1), but get {}",
            val_ratio
        );
        crate::ensure_config!(
            unit.contains(&test_ratio),
            "test_ratio",
            "must be in range [0, 1), but get {}",
            test_ratio
        );
        crate::ensure_config!(
            (val_ratio + test_ratio).raw() < 1.0,
            "val_ratio",
            "val_ratio + test_ratio must be less than 1"
        );
        Ok(())
    }

    /// Partition the records randomly.
    ///
    /// The shuffle is applied to groups, which are single records or patients
    /// if `group_by_patient` is set. Each split keeps the input order.
    pub fn split(&self, records: &[Arc<ImageRecord>]) -> Result<DataSplit, ConfigError> {
        self.validate()?;
        let Self {
            val_ratio,
            test_ratio,
            group_by_patient,
            seed,
        } = *self;

        let group_of = |index: usize| -> u64 {
            if group_by_patient {
                records[index].patient_id() as u64
            } else {
                index as u64
            }
        };

        let mut groups: Vec<u64> = (0..records.len())
            .map(group_of)
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        groups.shuffle(&mut StdRng::seed_from_u64(seed));

        let num_groups = groups.len();
        let num_test = (num_groups as f64 * test_ratio.raw()).round() as usize;
        let num_val = ((num_groups as f64 * val_ratio.raw()).round() as usize)
            .min(num_groups - num_test);

        let test_groups: HashSet<_> = groups[..num_test].iter().copied().collect();
        let val_groups: HashSet<_> = groups[num_test..(num_test + num_val)]
            .iter()
            .copied()
            .collect();

        let mut split = DataSplit::default();
        records.iter().enumerate().for_each(|(index, record)| {
            let group = group_of(index);
            let dst = if test_groups.contains(&group) {
                &mut split.test
            } else if val_groups.contains(&group) {
                &mut split.val
            } else {
                &mut split.train
            };
            dst.push(record.clone());
        });

        info!(
            "split {} records into {} train, {} validation and {} test records",
            records.len(),
            split.train.len(),
            split.val.len(),
            split.test.len()
        );

        Ok(split)
    }
}

/// Balance the records on one finding.
///
/// Positives are drawn with replacement until they are as many as negatives,
/// then the result is shuffled. Records are returned unchanged if there are no
/// positives or no fewer positives than negatives.
pub fn oversample_positives<R>(
    records: &[Arc<ImageRecord>],
    finding: Finding,
    rng: &mut R,
) -> Vec<Arc<ImageRecord>>
where
    R: Rng + ?Sized,
{
    let (positives, negatives): (Vec<_>, Vec<_>) = records
        .iter()
        .cloned()
        .partition(|record| record.labels().contains(finding));

    if positives.is_empty() || positives.len() >= negatives.len() {
        return records.to_vec();
    }

    let num_negatives = negatives.len();
    let mut output = negatives;
    output.extend((0..num_negatives).filter_map(|_| positives.choose(rng).cloned()));
    output.shuffle(rng);

    info!(
        "oversampled {} {} positives to {} records",
        positives.len(),
        finding,
        output.len()
    );
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::make_record;

    fn make_records() -> Vec<Arc<ImageRecord>> {
        (0..100)
            .map(|index| {
                let labels = if index % 10 == 0 { "Pneumonia" } else { "" };
                make_record(
                    &format!("{:08}_{:03}.png", index / 4, index % 4),
                    labels,
                    index / 4,
                )
            })
            .collect()
    }

    #[test]
    fn split_is_disjoint() {
        let records = make_records();
        let init = SplitInit {
            val_ratio: r64(0.2),
            test_ratio: r64(0.2),
            group_by_patient: false,
            seed: 7,
        };
        let DataSplit { train, val, test } = init.split(&records).unwrap();

        assert_eq!(train.len(), 60);
        assert_eq!(val.len(), 20);
        assert_eq!(test.len(), 20);

        let all: HashSet<_> = train
            .iter()
            .chain(&val)
            .chain(&test)
            .map(|record| record.identifier())
            .collect();
        assert_eq!(all.len(), 100);

        // the original order is kept
        assert!(train
            .iter()
            .tuple_windows()
            .all(|(lhs, rhs)| lhs.identifier() < rhs.identifier()));

        // deterministic for a fixed seed
        let again = init.split(&records).unwrap();
        assert_eq!(
            again.val.iter().map(|r| r.identifier()).collect::<Vec<_>>(),
            val.iter().map(|r| r.identifier()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn split_by_patient() {
        let records = make_records();
        let init = SplitInit {
            val_ratio: r64(0.2),
            test_ratio: r64(0.2),
            group_by_patient: true,
            seed: 3,
        };
        let DataSplit { train, val, test } = init.split(&records).unwrap();
        assert_eq!(train.len() + val.len() + test.len(), 100);

        let patients = |records: &[Arc<ImageRecord>]| -> HashSet<u32> {
            records.iter().map(|record| record.patient_id()).collect()
        };
        let (train, val, test) = (patients(&train), patients(&val), patients(&test));
        assert_eq!(train.len(), 15);
        assert_eq!(val.len(), 5);
        assert_eq!(test.len(), 5);
        assert!(train.is_disjoint(&val));
        assert!(train.is_disjoint(&test));
        assert!(val.is_disjoint(&test));
    }

    #[test]
    fn reject_invalid_ratios() {
        let records = make_records();
        let init = SplitInit {
            val_ratio: r64(0.6),
            test_ratio: r64(0.4),
            group_by_patient: false,
            seed: 0,
        };
        assert!(init.split(&records).is_err());

        let init = SplitInit {
            val_ratio: r64(-0.1),
            test_ratio: r64(0.0),
            group_by_patient: false,
            seed: 0,
        };
        assert_eq!(init.validate().unwrap_err().field, "val_ratio");
    }

    #[test]
    fn oversample_balance() {
        let records = make_records();
        let mut rng = StdRng::seed_from_u64(1);
        let output = oversample_positives(&records, Finding::Pneumonia, &mut rng);

        let num_pos = output
            .iter()
            .filter(|record| record.labels().contains(Finding::Pneumonia))
            .count();
        assert_eq!(num_pos, 90);
        assert_eq!(output.len(), 180);

        // nothing to balance
        let output = oversample_positives(&records, Finding::Hernia, &mut rng);
        assert_eq!(output.len(), 100);
    }
}
