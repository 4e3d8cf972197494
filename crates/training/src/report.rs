//! Plain-text evaluation report, appended one block per evaluation point.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::metrics::Evaluation;
use crate::{TrainingError, TrainingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    BeforeTraining,
    /// Pretrained only: after the frozen-backbone phase, before unfreezing.
    BetweenPhases,
    AfterTraining,
}

impl Phase {
    pub fn header(&self) -> &'static str {
        match self {
            Phase::BeforeTraining => "BEFORE TRAINING EVALUATION",
            Phase::BetweenPhases => "AFTER FINE TUNING EVALUATION",
            Phase::AfterTraining => "AFTER TRAINING EVALUATION",
        }
    }
}

/// Metric values for one report block. The detailed fields are `None` for summary reports.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub phase: Phase,
    pub loss: f64,
    pub accuracy: f64,
    pub balanced_accuracy: f64,
    pub confusion_matrix: Option<Vec<Vec<usize>>>,
    #[serde(skip)]
    confusion_text: Option<String>,
    pub roc_auc: Option<f64>,
}

impl EvaluationReport {
    /// ROC-AUC failures propagate when `detailed` is set.
    pub fn from_evaluation(
        phase: Phase,
        eval: &Evaluation,
        detailed: bool,
    ) -> TrainingResult<Self> {
        let cm = eval.confusion_matrix();
        let (confusion_matrix, confusion_text, roc_auc) = if detailed {
            (
                Some(cm.rows().to_vec()),
                Some(cm.to_string()),
                Some(eval.roc_auc()?),
            )
        } else {
            (None, None, None)
        };
        Ok(Self {
            phase,
            loss: eval.loss,
            accuracy: eval.accuracy,
            balanced_accuracy: cm.balanced_accuracy(),
            confusion_matrix,
            confusion_text,
            roc_auc,
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(self.phase.header());
        out.push('\n');
        out.push_str(&format!(
            "MODEL EVALUATION (loss, metrics): [{}, {}]\n",
            self.loss, self.accuracy
        ));
        out.push_str(&format!("BALANCED ACCURACY: {}\n", self.balanced_accuracy));
        if let Some(text) = &self.confusion_text {
            out.push_str(&format!("CONFUSION MATRIX: {text}\n"));
        }
        if let Some(auc) = self.roc_auc {
            out.push_str(&format!("ROC AUC SCORE: {auc}\n"));
        }
        out
    }
}

/// Appends report blocks to a text file. The file is opened in append mode for every block and
/// never truncated, so repeated runs accumulate.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    path: PathBuf,
}

impl ReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, report: &EvaluationReport) -> TrainingResult<()> {
        let io_err = |source| TrainingError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(report.render().as_bytes()).map_err(io_err)?;
        info!(
            phase = report.phase.header(),
            loss = report.loss,
            accuracy = report.accuracy,
            balanced_accuracy = report.balanced_accuracy,
            path = %self.path.display(),
            "appended evaluation block"
        );
        Ok(())
    }
}
