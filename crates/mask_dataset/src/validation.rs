//! Dataset validation and quality checks.

use crate::loader::summarize_dataset;
use crate::types::{
    DatasetResult, DatasetSummary, ValidationOutcome, ValidationReport, ValidationThresholds,
};
use std::path::Path;

fn escalate(outcome: &mut ValidationOutcome, to: ValidationOutcome) {
    let rank = |o: ValidationOutcome| match o {
        ValidationOutcome::Pass => 0,
        ValidationOutcome::Warn => 1,
        ValidationOutcome::Fail => 2,
    };
    if rank(to) > rank(*outcome) {
        *outcome = to;
    }
}

pub fn validate_summary(
    summary: DatasetSummary,
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    let mut outcome = ValidationOutcome::Pass;
    let mut reasons = Vec::new();

    for class in &summary.classes {
        if class.files == 0 {
            escalate(&mut outcome, ValidationOutcome::Fail);
            reasons.push(format!("class {}: no images", class.name));
            continue;
        }
        if let Some(min) = thresholds.min_per_class {
            if class.files < min {
                escalate(&mut outcome, ValidationOutcome::Fail);
                reasons.push(format!(
                    "class {}: {} images below min {min}",
                    class.name, class.files
                ));
            }
        }
    }

    if summary.unreadable > 0 {
        match thresholds.max_unreadable {
            Some(max) if summary.unreadable > max => {
                escalate(&mut outcome, ValidationOutcome::Fail);
                reasons.push(format!(
                    "unreadable images: {} exceeds max {max}",
                    summary.unreadable
                ));
            }
            _ => {
                escalate(&mut outcome, ValidationOutcome::Warn);
                reasons.push(format!("unreadable images: {} observed", summary.unreadable));
            }
        }
    }

    if let Some(max_ratio) = thresholds.max_imbalance_ratio {
        let largest = summary.classes.iter().map(|c| c.files).max().unwrap_or(0);
        let smallest = summary.classes.iter().map(|c| c.files).min().unwrap_or(0);
        if smallest > 0 {
            let ratio = largest as f32 / smallest as f32;
            if ratio > max_ratio {
                escalate(&mut outcome, ValidationOutcome::Warn);
                reasons.push(format!(
                    "class imbalance: ratio {:.3} exceeds max {:.3}",
                    ratio, max_ratio
                ));
            }
        }
    }

    ValidationReport {
        outcome,
        reasons,
        summary,
    }
}

pub fn summarize_root_with_thresholds(
    root: &Path,
    thresholds: &ValidationThresholds,
) -> DatasetResult<ValidationReport> {
    let summary = summarize_dataset(root)?;
    Ok(validate_summary(summary, thresholds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassSummary;

    fn summary(counts: &[usize], unreadable: usize) -> DatasetSummary {
        DatasetSummary {
            classes: counts
                .iter()
                .enumerate()
                .map(|(i, &files)| ClassSummary {
                    name: format!("class_{i}"),
                    label: i,
                    files,
                    unreadable: 0,
                })
                .collect(),
            total: counts.iter().sum(),
            unreadable,
        }
    }

    #[test]
    fn empty_class_fails() {
        let report = validate_summary(summary(&[10, 0, 10], 0), &ValidationThresholds::default());
        assert_eq!(report.outcome, ValidationOutcome::Fail);
        assert_eq!(report.outcome.as_str(), "fail");
    }

    #[test]
    fn unreadable_without_threshold_warns() {
        let report = validate_summary(summary(&[10, 10, 10], 2), &ValidationThresholds::default());
        assert_eq!(report.outcome, ValidationOutcome::Warn);
        assert_eq!(report.reasons.len(), 1);
    }

    #[test]
    fn imbalance_over_ratio_warns() {
        let thresholds = ValidationThresholds {
            max_imbalance_ratio: Some(1.5),
            ..Default::default()
        };
        let report = validate_summary(summary(&[30, 10, 10], 0), &thresholds);
        assert_eq!(report.outcome, ValidationOutcome::Warn);
    }

    #[test]
    fn balanced_set_passes() {
        let report = validate_summary(summary(&[10, 10, 10], 0), &ValidationThresholds::default());
        assert_eq!(report.outcome, ValidationOutcome::Pass);
        assert_eq!(report.outcome.as_str(), "pass");
        assert!(report.reasons.is_empty());
    }
}
