#![recursion_limit = "256"]

//! Training, evaluation and metric reporting for the face-mask classifier.
//!
//! The two pipelines (`pretrained`, `untrained`) share one skeleton:
//! load → split → build → compile → evaluate → fit → evaluate, with every
//! evaluation appended to a plain-text report. See [`pipeline::run_pipeline`].

pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod report;
pub mod trainer;
pub mod util;

use mask_dataset::DatasetError;
use models::ModelError;
use std::path::PathBuf;
use thiserror::Error;

pub use config::{ModelVariant, OptimizerConfig, PipelineConfig, CONFIG_ENV_VAR};
pub use metrics::{
    argmax, balanced_accuracy, roc_auc_ovr, ConfusionMatrix, Evaluation, PredictionRecord,
};
pub use pipeline::{run_pipeline, PipelineOutcome};
pub use report::{EvaluationReport, Phase, ReportWriter};
pub use trainer::{compile, evaluate, EpochStats, FitConfig, Session, StepOutcome};
pub use util::{init_tracing, run_train, validate_backend_choice, BackendKind, TrainArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

pub type TrainingResult<T> = Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config error at {path}: {msg}")]
    Config { path: PathBuf, msg: String },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("dataset at {root} failed validation: {reasons}")]
    InvalidDataset { root: PathBuf, reasons: String },
    #[error("{split} split is empty")]
    EmptySplit { split: &'static str },
    #[error("metric error: {0}")]
    Metric(String),
}
