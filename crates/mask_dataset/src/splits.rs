//! Deterministic train/val/test partitioning.

use crate::types::{DatasetError, DatasetResult, ImageDataset, LabeledImage};
use rand::{seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

const PROPORTION_TOLERANCE: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitProportions {
    pub train: f32,
    pub val: f32,
    pub test: f32,
}

impl Default for SplitProportions {
    fn default() -> Self {
        Self {
            train: 0.8,
            val: 0.1,
            test: 0.1,
        }
    }
}

impl SplitProportions {
    pub fn new(train: f32, val: f32, test: f32) -> Self {
        Self { train, val, test }
    }

    pub fn validate(&self) -> DatasetResult<()> {
        for (name, p) in [("train", self.train), ("val", self.val), ("test", self.test)] {
            if !p.is_finite() || !(0.0..=1.0).contains(&p) {
                return Err(DatasetError::InvalidSplit(format!(
                    "{name} proportion {p} outside [0, 1]"
                )));
            }
        }
        let sum = self.train + self.val + self.test;
        if (sum - 1.0).abs() > PROPORTION_TOLERANCE {
            return Err(DatasetError::InvalidSplit(format!(
                "proportions sum to {sum}, expected 1.0"
            )));
        }
        Ok(())
    }

    /// Partition sizes for `n` samples: train and val are rounded, test takes the remainder.
    pub fn sizes(&self, n: usize) -> (usize, usize, usize) {
        let train = ((n as f64 * self.train as f64).round() as usize).min(n);
        let val = ((n as f64 * self.val as f64).round() as usize).min(n - train);
        (train, val, n - train - val)
    }
}

/// An ordered, owned partition of the dataset.
#[derive(Debug, Clone, Default)]
pub struct Split {
    pub samples: Vec<LabeledImage>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }
}

#[derive(Debug, Clone)]
pub struct DatasetSplits {
    pub classes: Vec<String>,
    pub train: Split,
    pub val: Split,
    pub test: Split,
}

impl DatasetSplits {
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}

/// Shuffle with `seed`, then cut into train/val/test. The same seed always yields the same partition.
pub fn split_dataset(
    dataset: ImageDataset,
    proportions: SplitProportions,
    seed: u64,
) -> DatasetResult<DatasetSplits> {
    proportions.validate()?;
    let ImageDataset {
        classes,
        mut samples,
    } = dataset;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let (train_len, val_len, _) = proportions.sizes(samples.len());
    let mut rest = samples.split_off(train_len);
    let test = rest.split_off(val_len);
    Ok(DatasetSplits {
        classes,
        train: Split { samples },
        val: Split { samples: rest },
        test: Split { samples: test },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn synthetic(n: usize) -> ImageDataset {
        ImageDataset {
            classes: vec!["a".into(), "b".into(), "c".into()],
            samples: (0..n)
                .map(|i| LabeledImage {
                    path: PathBuf::from(format!("img_{i:03}.png")),
                    label: i % 3,
                    image: image::RgbImage::new(1, 1),
                })
                .collect(),
        }
    }

    #[test]
    fn thirty_samples_split_24_3_3() {
        let splits = split_dataset(synthetic(30), SplitProportions::default(), 7).unwrap();
        assert_eq!(splits.train.len(), 24);
        assert_eq!(splits.val.len(), 3);
        assert_eq!(splits.test.len(), 3);
    }

    #[test]
    fn partitions_are_disjoint_and_cover_everything() {
        for n in [0usize, 1, 7, 30, 101] {
            let splits =
                split_dataset(synthetic(n), SplitProportions::new(0.6, 0.25, 0.15), 3).unwrap();
            let mut seen = HashSet::new();
            for s in splits
                .train
                .samples
                .iter()
                .chain(&splits.val.samples)
                .chain(&splits.test.samples)
            {
                assert!(seen.insert(s.path.clone()), "duplicate {:?}", s.path);
            }
            assert_eq!(seen.len(), n);
        }
    }

    #[test]
    fn same_seed_same_partition() {
        let a = split_dataset(synthetic(30), SplitProportions::default(), 11).unwrap();
        let b = split_dataset(synthetic(30), SplitProportions::default(), 11).unwrap();
        let paths = |s: &Split| s.samples.iter().map(|x| x.path.clone()).collect::<Vec<_>>();
        assert_eq!(paths(&a.test), paths(&b.test));
        assert_eq!(paths(&a.train), paths(&b.train));
    }

    #[test]
    fn rejects_proportions_not_summing_to_one() {
        let err = split_dataset(synthetic(10), SplitProportions::new(0.8, 0.1, 0.2), 0);
        assert!(matches!(err, Err(DatasetError::InvalidSplit(_))));
        assert!(SplitProportions::new(-0.1, 0.6, 0.5).validate().is_err());
    }
}
