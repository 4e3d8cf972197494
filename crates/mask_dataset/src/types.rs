//! Core types, error definitions, and data structures for mask_dataset.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no class directories found under {root}")]
    NoClasses { root: PathBuf },
    #[error("invalid split proportions: {0}")]
    InvalidSplit(String),
    #[error("{0}")]
    Other(String),
}

/// One image file found under `<root>/<class>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIndex {
    pub path: PathBuf,
    pub label: usize,
}

/// A class directory and the image files it holds, in sorted order.
#[derive(Debug, Clone)]
pub struct ClassIndex {
    pub name: String,
    pub label: usize,
    pub files: Vec<PathBuf>,
}

/// A decoded, resized RGB image with its class label.
#[derive(Debug, Clone)]
pub struct LabeledImage {
    pub path: PathBuf,
    pub label: usize,
    pub image: image::RgbImage,
}

/// Full labeled collection; immutable once loaded.
#[derive(Debug, Clone)]
pub struct ImageDataset {
    pub classes: Vec<String>,
    pub samples: Vec<LabeledImage>,
}

impl ImageDataset {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassSummary {
    pub name: String,
    pub label: usize,
    pub files: usize,
    pub unreadable: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub classes: Vec<ClassSummary>,
    pub total: usize,
    pub unreadable: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Warn,
    Fail,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Pass => "pass",
            ValidationOutcome::Warn => "warn",
            ValidationOutcome::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationThresholds {
    /// Smallest acceptable file count for any single class.
    pub min_per_class: Option<usize>,
    pub max_unreadable: Option<usize>,
    /// Largest/smallest class size ratio before the dataset counts as imbalanced.
    pub max_imbalance_ratio: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub summary: DatasetSummary,
}
