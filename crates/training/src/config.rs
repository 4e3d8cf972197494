//! Pipeline parameters: per-variant presets, an optional TOML file layer, CLI overrides on top.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use mask_dataset::{SplitProportions, TransformPipeline, ValidationThresholds};
use models::{ClassifierConfig, ResNetConfig, Trainability};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{TrainingError, TrainingResult};

/// Environment variable naming a TOML config file, used when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "MASKFIT_CONFIG";

const DEFAULT_DATASET_DIR: &str = "archive/balanced";
const DEFAULT_BACKBONE_WEIGHTS: &str = "weights/resnet50_imagenet.bin";

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// Pretrained backbone, frozen for the first phase, then fine-tuned.
    Pretrained,
    /// Randomly initialised backbone trained end to end.
    Untrained,
}

impl ModelVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::Pretrained => "pretrained",
            ModelVariant::Untrained => "untrained",
        }
    }

    /// Backbone trainability during the first training phase.
    pub fn initial_trainability(&self) -> Trainability {
        match self {
            ModelVariant::Pretrained => Trainability::Frozen,
            ModelVariant::Untrained => Trainability::Trainable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
    pub beta_1: f32,
    pub beta_2: f32,
    pub epsilon: f32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-7,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub variant: ModelVariant,
    pub dataset_dir: PathBuf,
    pub split: SplitProportions,
    /// (width, height) every image is resized to.
    pub image_size: (u32, u32),
    pub batch_size: usize,
    pub seed: u64,
    /// First phase (frozen backbone for `pretrained`).
    pub epochs: usize,
    /// Second phase after unfreezing; ignored by `untrained`.
    pub fine_tune_epochs: usize,
    pub dropout: f64,
    pub rotation_factor: f32,
    pub optimizer: OptimizerConfig,
    pub backbone: ResNetConfig,
    /// Required by `pretrained`.
    pub backbone_weights: Option<PathBuf>,
    pub output_path: PathBuf,
    /// Adds the confusion matrix and ROC-AUC lines to each report block.
    pub detailed_report: bool,
    /// Write a report block between the frozen and fine-tune phases.
    pub evaluate_between_phases: bool,
    pub validate_dataset: bool,
    pub validation: ValidationThresholds,
    pub checkpoint_out: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn pretrained() -> Self {
        Self {
            variant: ModelVariant::Pretrained,
            dataset_dir: PathBuf::from(DEFAULT_DATASET_DIR),
            split: SplitProportions::default(),
            image_size: (64, 64),
            batch_size: 32,
            seed: 0,
            epochs: 20,
            fine_tune_epochs: 10,
            dropout: 0.2,
            rotation_factor: 0.2,
            optimizer: OptimizerConfig::default(),
            backbone: ResNetConfig::resnet50(),
            backbone_weights: Some(PathBuf::from(DEFAULT_BACKBONE_WEIGHTS)),
            output_path: PathBuf::from("pretrained-output.txt"),
            detailed_report: false,
            evaluate_between_phases: true,
            validate_dataset: true,
            validation: ValidationThresholds::default(),
            checkpoint_out: None,
        }
    }

    pub fn untrained() -> Self {
        Self {
            variant: ModelVariant::Untrained,
            epochs: 30,
            fine_tune_epochs: 0,
            dropout: 0.5,
            backbone_weights: None,
            output_path: PathBuf::from("untrained-output.txt"),
            detailed_report: true,
            evaluate_between_phases: false,
            ..Self::pretrained()
        }
    }

    pub fn preset(variant: ModelVariant) -> Self {
        match variant {
            ModelVariant::Pretrained => Self::pretrained(),
            ModelVariant::Untrained => Self::untrained(),
        }
    }

    /// Preset for `variant` with values from the TOML file at `path` layered on top.
    pub fn from_path(path: &Path, variant: ModelVariant) -> TrainingResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| TrainingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: PipelineConfigFile = toml::from_str(&raw).map_err(|e| TrainingError::Config {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })?;
        let cfg = Self::preset(variant).merge(file);
        cfg.validate().map_err(|msg| TrainingError::Config {
            path: path.to_path_buf(),
            msg,
        })?;
        Ok(cfg)
    }

    /// `explicit` path, else `$MASKFIT_CONFIG`, else the bare preset.
    pub fn load(variant: ModelVariant, explicit: Option<&Path>) -> TrainingResult<Self> {
        if let Some(path) = explicit {
            return Self::from_path(path, variant);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Self::from_path(Path::new(&path), variant);
            }
        }
        Ok(Self::preset(variant))
    }

    fn merge(mut self, file: PipelineConfigFile) -> Self {
        if let Some(dataset) = file.dataset {
            if let Some(dir) = dataset.dir {
                self.dataset_dir = dir;
            }
            if let Some(split) = dataset.split {
                self.split = split;
            }
            if let Some([w, h]) = dataset.image_size {
                self.image_size = (w, h);
            }
            if let Some(validate) = dataset.validate {
                self.validate_dataset = validate;
            }
            if let Some(thresholds) = dataset.validation {
                self.validation = thresholds;
            }
        }
        if let Some(training) = file.training {
            if let Some(v) = training.batch_size {
                self.batch_size = v;
            }
            if let Some(v) = training.seed {
                self.seed = v;
            }
            if let Some(v) = training.epochs {
                self.epochs = v;
            }
            if let Some(v) = training.fine_tune_epochs {
                self.fine_tune_epochs = v;
            }
            if let Some(v) = training.dropout {
                self.dropout = v;
            }
            if let Some(v) = training.rotation_factor {
                self.rotation_factor = v;
            }
            if let Some(v) = training.optimizer {
                self.optimizer = v;
            }
            if let Some(v) = training.checkpoint_out {
                self.checkpoint_out = Some(v);
            }
        }
        if let Some(model) = file.model {
            if let Some(v) = model.backbone {
                self.backbone = v;
            }
            if let Some(v) = model.backbone_weights {
                self.backbone_weights = Some(v);
            }
        }
        if let Some(report) = file.report {
            if let Some(v) = report.output {
                self.output_path = v;
            }
            if let Some(v) = report.detailed {
                self.detailed_report = v;
            }
            if let Some(v) = report.evaluate_between_phases {
                self.evaluate_between_phases = v;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        self.split.validate().map_err(|e| e.to_string())?;
        if self.batch_size == 0 {
            return Err("batch_size must be at least 1".into());
        }
        if self.image_size.0 == 0 || self.image_size.1 == 0 {
            return Err(format!(
                "image_size {}x{} has a zero dimension",
                self.image_size.0, self.image_size.1
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(format!("dropout {} outside [0, 1)", self.dropout));
        }
        if self.variant == ModelVariant::Pretrained && self.backbone_weights.is_none() {
            return Err("pretrained variant needs backbone_weights".into());
        }
        if self.variant == ModelVariant::Untrained && self.fine_tune_epochs > 0 {
            warn!(
                fine_tune_epochs = self.fine_tune_epochs,
                "untrained variant has a single phase; fine_tune_epochs is ignored"
            );
        }
        Ok(())
    }

    pub fn classifier(&self, num_classes: usize) -> ClassifierConfig {
        ClassifierConfig {
            num_classes,
            dropout: self.dropout,
            backbone: self.backbone.clone(),
        }
    }

    pub fn augmentation(&self) -> TransformPipeline {
        TransformPipeline::flip_and_rotate(self.rotation_factor, Some(self.seed))
    }
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    dataset: Option<DatasetSection>,
    training: Option<TrainingSection>,
    model: Option<ModelSection>,
    report: Option<ReportSection>,
}

#[derive(Debug, Deserialize, Default)]
struct DatasetSection {
    dir: Option<PathBuf>,
    split: Option<SplitProportions>,
    image_size: Option<[u32; 2]>,
    validate: Option<bool>,
    validation: Option<ValidationThresholds>,
}

#[derive(Debug, Deserialize, Default)]
struct TrainingSection {
    batch_size: Option<usize>,
    seed: Option<u64>,
    epochs: Option<usize>,
    fine_tune_epochs: Option<usize>,
    dropout: Option<f64>,
    rotation_factor: Option<f32>,
    optimizer: Option<OptimizerConfig>,
    checkpoint_out: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelSection {
    backbone: Option<ResNetConfig>,
    backbone_weights: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ReportSection {
    output: Option<PathBuf>,
    detailed: Option<bool>,
    evaluate_between_phases: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_the_two_pipelines() {
        let pre = PipelineConfig::pretrained();
        assert_eq!((pre.epochs, pre.fine_tune_epochs), (20, 10));
        assert_eq!(pre.dropout, 0.2);
        assert!(!pre.detailed_report);
        assert_eq!(pre.output_path, PathBuf::from("pretrained-output.txt"));
        assert_eq!(pre.variant.initial_trainability(), Trainability::Frozen);

        let un = PipelineConfig::untrained();
        assert_eq!((un.epochs, un.fine_tune_epochs), (30, 0));
        assert_eq!(un.dropout, 0.5);
        assert!(un.detailed_report);
        assert!(un.backbone_weights.is_none());
        assert_eq!(un.variant.initial_trainability(), Trainability::Trainable);

        for cfg in [pre, un] {
            assert_eq!(cfg.image_size, (64, 64));
            assert_eq!(cfg.batch_size, 32);
            assert_eq!(cfg.dataset_dir, PathBuf::from("archive/balanced"));
            assert!(cfg.validate().is_ok());
        }
    }

    #[test]
    fn file_sections_override_the_preset() {
        let file: PipelineConfigFile = toml::from_str(
            r#"
            [dataset]
            dir = "data/masks"
            image_size = [32, 48]
            split = { train = 0.6, val = 0.2, test = 0.2 }

            [training]
            epochs = 2
            fine_tune_epochs = 1

            [model]
            backbone = { layers = [1, 1, 1, 1], base_width = 8 }

            [report]
            detailed = true
            "#,
        )
        .unwrap();
        let cfg = PipelineConfig::pretrained().merge(file);
        assert_eq!(cfg.dataset_dir, PathBuf::from("data/masks"));
        assert_eq!(cfg.image_size, (32, 48));
        assert_eq!(cfg.split, SplitProportions::new(0.6, 0.2, 0.2));
        assert_eq!((cfg.epochs, cfg.fine_tune_epochs), (2, 1));
        assert_eq!(cfg.backbone.layers, [1, 1, 1, 1]);
        assert!(cfg.detailed_report);
        // Untouched fields keep the preset.
        assert_eq!(cfg.dropout, 0.2);
        assert_eq!(cfg.batch_size, 32);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = PipelineConfig::untrained();
        cfg.split = SplitProportions::new(0.8, 0.1, 0.2);
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::untrained();
        cfg.batch_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::pretrained();
        cfg.backbone_weights = None;
        assert!(cfg.validate().is_err());
    }
}
