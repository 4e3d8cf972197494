//! Classification metrics over a single prediction pass: loss, accuracy, balanced accuracy,
//! confusion matrix and one-vs-rest ROC-AUC.

use std::fmt;

use crate::{TrainingError, TrainingResult};

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before taking the log.
const EPSILON: f64 = 1e-7;

/// One test-split sample: its true label and the class probabilities the model produced for it.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub label: usize,
    pub scores: Vec<f32>,
}

impl PredictionRecord {
    pub fn predicted(&self) -> usize {
        argmax(&self.scores)
    }
}

/// Index of the largest score; the first one wins ties.
pub fn argmax(scores: &[f32]) -> usize {
    let mut best = 0;
    for (i, s) in scores.iter().enumerate() {
        if *s > scores[best] {
            best = i;
        }
    }
    best
}

/// Confusion matrix: `counts[true][predicted]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: vec![vec![0; num_classes]; num_classes],
        }
    }

    /// Labels outside `0..num_classes` are ignored.
    pub fn from_predictions(y_true: &[usize], y_pred: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&t, &p) in y_true.iter().zip(y_pred) {
            if t < num_classes && p < num_classes {
                cm.counts[t][p] += 1;
            }
        }
        cm
    }

    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    pub fn get(&self, true_label: usize, predicted: usize) -> usize {
        self.counts[true_label][predicted]
    }

    pub fn rows(&self) -> &[Vec<usize>] {
        &self.counts
    }

    /// Number of samples whose true label is `class`.
    pub fn support(&self, class: usize) -> usize {
        self.counts[class].iter().sum()
    }

    /// Per-class recall; `None` for classes absent from the true labels.
    pub fn recalls(&self) -> Vec<Option<f64>> {
        (0..self.num_classes())
            .map(|c| {
                let support = self.support(c);
                (support > 0).then(|| self.counts[c][c] as f64 / support as f64)
            })
            .collect()
    }

    /// Mean recall over the classes present in the true labels.
    pub fn balanced_accuracy(&self) -> f64 {
        let present: Vec<f64> = self.recalls().into_iter().flatten().collect();
        if present.is_empty() {
            return 0.0;
        }
        present.iter().sum::<f64>() / present.len() as f64
    }
}

/// Matrix layout as numpy prints it: `[[1 0]\n [2 3]]`, entries right-aligned to a common width.
impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .counts
            .iter()
            .flatten()
            .map(|c| c.to_string().len())
            .max()
            .unwrap_or(1);
        write!(f, "[")?;
        for (i, row) in self.counts.iter().enumerate() {
            if i > 0 {
                write!(f, "\n ")?;
            }
            write!(f, "[")?;
            for (j, c) in row.iter().enumerate() {
                if j > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{c:>width$}")?;
            }
            write!(f, "]")?;
        }
        write!(f, "]")
    }
}

pub fn balanced_accuracy(y_true: &[usize], y_pred: &[usize], num_classes: usize) -> f64 {
    ConfusionMatrix::from_predictions(y_true, y_pred, num_classes).balanced_accuracy()
}

/// Area under the ROC curve for one binary problem, via the rank-sum statistic.
/// Tied scores share their average rank, so a tie counts as half a correct ordering.
fn binary_auc(positive: &[bool], scores: &[f32]) -> Option<f64> {
    let n = scores.len();
    let n_pos = positive.iter().filter(|p| **p).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    let mut ranks = vec![0.0f64; n];
    let mut start = 0;
    while start < n {
        let mut end = start;
        while end + 1 < n && scores[order[end + 1]] == scores[order[start]] {
            end += 1;
        }
        let avg = (start + end) as f64 / 2.0 + 1.0;
        for &idx in &order[start..=end] {
            ranks[idx] = avg;
        }
        start = end + 1;
    }

    let pos_rank_sum: f64 = ranks
        .iter()
        .zip(positive)
        .filter(|(_, p)| **p)
        .map(|(r, _)| r)
        .sum();
    let n_pos = n_pos as f64;
    Some((pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}

/// Macro-averaged one-vs-rest ROC-AUC. `scores[i]` holds the per-class scores of sample `i`.
///
/// Fails when any class has no positive or no negative sample, since its AUC is undefined.
pub fn roc_auc_ovr(
    y_true: &[usize],
    scores: &[Vec<f32>],
    num_classes: usize,
) -> TrainingResult<f64> {
    if y_true.len() != scores.len() {
        return Err(TrainingError::Metric(format!(
            "{} labels but {} score rows",
            y_true.len(),
            scores.len()
        )));
    }
    if let Some(row) = scores.iter().find(|row| row.len() != num_classes) {
        return Err(TrainingError::Metric(format!(
            "score row has {} entries, expected {num_classes}",
            row.len()
        )));
    }
    if num_classes < 2 {
        return Err(TrainingError::Metric("ROC-AUC needs at least two classes".into()));
    }

    let mut total = 0.0;
    for class in 0..num_classes {
        let positive: Vec<bool> = y_true.iter().map(|&y| y == class).collect();
        let column: Vec<f32> = scores.iter().map(|row| row[class]).collect();
        total += binary_auc(&positive, &column).ok_or_else(|| {
            TrainingError::Metric(format!(
                "ROC-AUC undefined: class {class} needs both positive and negative samples"
            ))
        })?;
    }
    Ok(total / num_classes as f64)
}

/// Everything one evaluation pass over a split produces.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub num_classes: usize,
    pub records: Vec<PredictionRecord>,
    /// Mean sparse categorical cross-entropy of the predicted probabilities.
    pub loss: f64,
    pub accuracy: f64,
}

impl Evaluation {
    pub fn from_records(records: Vec<PredictionRecord>, num_classes: usize) -> TrainingResult<Self> {
        if records.is_empty() {
            return Err(TrainingError::Metric(
                "cannot evaluate an empty prediction set".into(),
            ));
        }
        let n = records.len() as f64;
        let loss = records
            .iter()
            .map(|r| {
                let p = r.scores.get(r.label).copied().unwrap_or(0.0) as f64;
                -p.clamp(EPSILON, 1.0 - EPSILON).ln()
            })
            .sum::<f64>()
            / n;
        let correct = records.iter().filter(|r| r.predicted() == r.label).count();
        Ok(Self {
            num_classes,
            records,
            loss,
            accuracy: correct as f64 / n,
        })
    }

    pub fn labels(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.label).collect()
    }

    pub fn predictions(&self) -> Vec<usize> {
        self.records.iter().map(PredictionRecord::predicted).collect()
    }

    pub fn confusion_matrix(&self) -> ConfusionMatrix {
        ConfusionMatrix::from_predictions(&self.labels(), &self.predictions(), self.num_classes)
    }

    pub fn balanced_accuracy(&self) -> f64 {
        self.confusion_matrix().balanced_accuracy()
    }

    pub fn roc_auc(&self) -> TrainingResult<f64> {
        let scores: Vec<Vec<f32>> = self.records.iter().map(|r| r.scores.clone()).collect();
        roc_auc_ovr(&self.labels(), &scores, self.num_classes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn balanced_accuracy_averages_class_recall() {
        let y_true = [0, 0, 1, 1, 2, 2];
        let y_pred = [0, 1, 1, 1, 2, 0];
        let score = balanced_accuracy(&y_true, &y_pred, 3);
        assert!((score - 2.0 / 3.0).abs() < 1e-9, "{score}");
    }

    #[test]
    fn balanced_accuracy_skips_classes_missing_from_truth() {
        // Class 2 is only ever predicted, never true.
        let score = balanced_accuracy(&[0, 0, 1], &[0, 2, 1], 3);
        assert!((score - 0.75).abs() < 1e-9, "{score}");
    }

    #[test]
    fn confusion_matrix_counts_and_prints_like_numpy() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 1, 1, 2, 2], &[0, 1, 1, 1, 2, 0], 3);
        assert_eq!(cm.get(0, 1), 1);
        assert_eq!(cm.get(1, 1), 2);
        assert_eq!(cm.support(2), 2);
        assert_eq!(cm.to_string(), "[[1 1 0]\n [0 2 0]\n [1 0 1]]");

        let wide = ConfusionMatrix::from_predictions(&[0; 12], &[0; 12], 2);
        assert_eq!(wide.to_string(), "[[12  0]\n [ 0  0]]");
    }

    #[test]
    fn argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[0.2, 0.5, 0.3]), 1);
        assert_eq!(argmax(&[0.4, 0.4, 0.2]), 0);
    }

    #[test]
    fn roc_auc_is_one_on_separable_scores() {
        let y_true = [0, 1, 2, 0, 1, 2];
        let scores: Vec<Vec<f32>> = y_true
            .iter()
            .map(|&y| {
                let mut row = vec![0.1; 3];
                row[y] = 0.8;
                row
            })
            .collect();
        let auc = roc_auc_ovr(&y_true, &scores, 3).unwrap();
        assert!((auc - 1.0).abs() < 1e-12, "{auc}");
    }

    #[test]
    fn roc_auc_is_near_half_on_random_scores() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let n = 3000;
        let y_true: Vec<usize> = (0..n).map(|_| rng.random_range(0..3)).collect();
        let scores: Vec<Vec<f32>> = (0..n)
            .map(|_| {
                let raw: Vec<f32> = (0..3).map(|_| rng.random::<f32>()).collect();
                let sum: f32 = raw.iter().sum();
                raw.iter().map(|v| v / sum).collect()
            })
            .collect();
        let auc = roc_auc_ovr(&y_true, &scores, 3).unwrap();
        assert!((auc - 0.5).abs() < 0.05, "{auc}");
    }

    #[test]
    fn roc_auc_counts_ties_as_half() {
        // Every score ties, so each class sits at exactly 0.5.
        let y_true = [0, 1, 0, 1];
        let scores = vec![vec![0.5, 0.5]; 4];
        let auc = roc_auc_ovr(&y_true, &scores, 2).unwrap();
        assert!((auc - 0.5).abs() < 1e-12, "{auc}");
    }

    #[test]
    fn roc_auc_rejects_a_class_without_positives() {
        let scores = vec![vec![0.6, 0.3, 0.1]; 3];
        let err = roc_auc_ovr(&[0, 1, 0], &scores, 3);
        assert!(matches!(err, Err(TrainingError::Metric(_))));
    }

    #[test]
    fn evaluation_loss_uses_clipped_probabilities() {
        let records = vec![
            PredictionRecord {
                label: 0,
                scores: vec![1.0, 0.0, 0.0],
            },
            PredictionRecord {
                label: 1,
                scores: vec![1.0, 0.0, 0.0],
            },
        ];
        let eval = Evaluation::from_records(records, 3).unwrap();
        let expected = (-(1.0f64 - 1e-7).ln() - (1e-7f64).ln()) / 2.0;
        assert!((eval.loss - expected).abs() < 1e-9, "{}", eval.loss);
        assert_eq!(eval.accuracy, 0.5);
        assert_eq!(eval.predictions(), vec![0, 0]);
    }

    #[test]
    fn empty_evaluation_is_an_error() {
        assert!(Evaluation::from_records(Vec::new(), 3).is_err());
    }
}
