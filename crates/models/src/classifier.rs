use burn::module::{AutodiffModule, Module};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::activation::softmax;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::resnet::{NormMode, ResNet, ResNetConfig};
use crate::{ModelError, ModelResult};

/// Per-channel means subtracted after the RGB→BGR swap, on the 0..255 scale.
pub const IMAGENET_BGR_MEAN: [f32; 3] = [103.939, 116.779, 123.68];

/// Whether the backbone receives gradient updates, and how its batch-norm layers normalise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trainability {
    /// No gradient reaches the backbone; batch norm uses running statistics.
    Frozen,
    /// Backbone weights train; batch norm keeps its running statistics fixed.
    FineTune,
    /// Everything trains, batch norm included (batch statistics, running-stat updates).
    Trainable,
}

impl Trainability {
    pub fn is_frozen(&self) -> bool {
        matches!(self, Trainability::Frozen)
    }

    pub fn norm_mode(&self) -> NormMode {
        match self {
            Trainability::Trainable => NormMode::Auto,
            Trainability::Frozen | Trainability::FineTune => NormMode::Running,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub num_classes: usize,
    pub dropout: f64,
    pub backbone: ResNetConfig,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            num_classes: 3,
            dropout: 0.2,
            backbone: ResNetConfig::resnet50(),
        }
    }
}

/// ResNet "caffe" input convention: [0,1] RGB → [0,255] BGR minus ImageNet means.
pub fn preprocess<B: Backend>(images: Tensor<B, 4>) -> Tensor<B, 4> {
    let [n, _, h, w] = images.dims();
    let x = images.mul_scalar(255.0);
    let r = x.clone().slice([0..n, 0..1, 0..h, 0..w]);
    let g = x.clone().slice([0..n, 1..2, 0..h, 0..w]);
    let b = x.slice([0..n, 2..3, 0..h, 0..w]);
    let bgr = Tensor::cat(vec![b, g, r], 1);
    let mean = Tensor::<B, 1>::from_floats(IMAGENET_BGR_MEAN, &bgr.device()).reshape([1, 3, 1, 1]);
    bgr - mean
}

/// Global average pool → dropout → dense projection to class logits.
#[derive(Debug, Module)]
pub struct ClassifierHead<B: Backend> {
    pool: AdaptiveAvgPool2d,
    dropout: Dropout,
    dense: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(in_features: usize, num_classes: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(dropout).init(),
            dense: LinearConfig::new(in_features, num_classes).init(device),
        }
    }

    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let [n, c, _, _] = features.dims();
        let pooled = self.pool.forward(features).reshape([n, c]);
        self.dense.forward(self.dropout.forward(pooled))
    }
}

#[derive(Debug, Module)]
pub struct MaskClassifier<B: Backend> {
    backbone: ResNet<B>,
    head: ClassifierHead<B>,
}

impl<B: Backend> MaskClassifier<B> {
    pub fn new(cfg: &ClassifierConfig, device: &B::Device) -> Self {
        Self {
            backbone: ResNet::new(&cfg.backbone, device),
            head: ClassifierHead::new(
                cfg.backbone.feature_channels(),
                cfg.num_classes,
                cfg.dropout,
                device,
            ),
        }
    }

    pub fn backbone(&self) -> &ResNet<B> {
        &self.backbone
    }

    /// Class logits, `[B, num_classes]`. Every layer participates in autodiff.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(preprocess(images));
        self.head.forward(features)
    }

    /// Softmax class probabilities.
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// Replace the backbone weights with a record saved by [`MaskClassifier::save_backbone`]
    /// (or converted from a pretrained ImageNet checkpoint into the same layout).
    pub fn load_backbone(mut self, path: &Path, device: &B::Device) -> ModelResult<Self> {
        if !path.exists() {
            return Err(ModelError::MissingWeights {
                path: path.to_path_buf(),
            });
        }
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.backbone = self
            .backbone
            .load_file(path, &recorder, device)
            .map_err(|e| ModelError::Record {
                path: path.to_path_buf(),
                msg: e.to_string(),
            })?;
        Ok(self)
    }

    pub fn save_backbone(&self, path: &Path) -> ModelResult<()> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.backbone
            .clone()
            .save_file(path, &recorder)
            .map_err(|e| ModelError::Record {
                path: path.to_path_buf(),
                msg: e.to_string(),
            })
    }

    pub fn save_checkpoint(&self, path: &Path) -> ModelResult<()> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.clone()
            .save_file(path, &recorder)
            .map_err(|e| ModelError::Record {
                path: path.to_path_buf(),
                msg: e.to_string(),
            })
    }

    pub fn load_checkpoint(
        cfg: &ClassifierConfig,
        path: &Path,
        device: &B::Device,
    ) -> ModelResult<Self> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        Self::new(cfg, device)
            .load_file(path, &recorder, device)
            .map_err(|e| ModelError::Record {
                path: path.to_path_buf(),
                msg: e.to_string(),
            })
    }
}

impl<B: AutodiffBackend> MaskClassifier<B> {
    /// Training-time forward. A frozen backbone runs on the inner backend so no gradient
    /// reaches its weights. Fine-tuning trains the backbone against its running statistics.
    pub fn forward_train(&self, images: Tensor<B, 4>, backbone: Trainability) -> Tensor<B, 2> {
        if backbone.is_frozen() {
            let frozen = self.backbone.valid();
            let features = frozen.forward(preprocess(images.inner()));
            return self.head.forward(Tensor::from_inner(features));
        }
        let features = self
            .backbone
            .forward_with(preprocess(images), backbone.norm_mode());
        self.head.forward(features)
    }
}
