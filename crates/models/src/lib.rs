//! Burn modules for the face-mask classifier.
//!
//! - `ResNet`: bottleneck feature extractor (ResNet-50 layout), no classification top.
//! - `ClassifierHead`: global average pooling, dropout, dense projection.
//! - `MaskClassifier`: preprocessing + backbone + head, with frozen-backbone training support.
//!
//! These are pure Burn modules; optimizer binding and the training loop live in `training`.

use std::path::PathBuf;
use thiserror::Error;

pub mod classifier;
pub mod resnet;

pub use classifier::{
    preprocess, ClassifierConfig, ClassifierHead, MaskClassifier, Trainability, IMAGENET_BGR_MEAN,
};
pub use resnet::{Bottleneck, NormMode, ResNet, ResNetConfig};

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("weights file not found: {path}")]
    MissingWeights { path: PathBuf },
    #[error("record error at {path}: {msg}")]
    Record { path: PathBuf, msg: String },
}

pub mod prelude {
    pub use super::{ClassifierConfig, MaskClassifier, ResNetConfig, Trainability};
}
