//! The end-to-end run: load → split → build → compile → evaluate → fit → evaluate.
//!
//! `pretrained` inserts a second phase: optional mid evaluation, unfreeze, recompile, fit again.

use std::path::PathBuf;

use burn::module::{AutodiffModule, Module};
use burn::tensor::backend::{AutodiffBackend, Backend};
use mask_dataset::{
    load_dataset, split_dataset, summarize_root_with_thresholds, DatasetSplits, LoaderConfig,
    ValidationOutcome,
};
use models::{MaskClassifier, Trainability};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ModelVariant, PipelineConfig};
use crate::report::{EvaluationReport, Phase, ReportWriter};
use crate::trainer::{compile, evaluate, EpochStats, FitConfig};
use crate::{TrainingError, TrainingResult};

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub variant: ModelVariant,
    pub classes: Vec<String>,
    /// (train, val, test) sample counts.
    pub split_sizes: (usize, usize, usize),
    pub reports: Vec<EvaluationReport>,
    pub history: Vec<EpochStats>,
    pub report_path: PathBuf,
    pub checkpoint: Option<PathBuf>,
}

pub fn run_pipeline<B: AutodiffBackend>(
    cfg: &PipelineConfig,
    device: &B::Device,
) -> TrainingResult<PipelineOutcome> {
    cfg.validate().map_err(TrainingError::InvalidConfig)?;
    let splits = prepare_splits(cfg)?;
    info!(
        backend = std::any::type_name::<B>(),
        devices = 1,
        loader_threads = rayon::current_num_threads(),
        "device setup"
    );

    let classifier = cfg.classifier(splits.num_classes());
    let mut model = MaskClassifier::<B>::new(&classifier, device);
    if cfg.variant == ModelVariant::Pretrained {
        let weights = cfg.backbone_weights.as_deref().ok_or_else(|| {
            TrainingError::InvalidConfig("pretrained variant needs backbone_weights".into())
        })?;
        model = model.load_backbone(weights, device)?;
        info!(path = %weights.display(), "loaded pretrained backbone");
    }
    info!(
        variant = cfg.variant.as_str(),
        params = model.num_params(),
        dropout = cfg.dropout,
        "model built"
    );

    let writer = ReportWriter::new(&cfg.output_path);
    let mut reports = Vec::new();
    let mut session = compile(
        model,
        cfg.variant.initial_trainability(),
        cfg.optimizer,
        device,
    );

    reports.push(evaluate_and_append(
        &session.model().valid(),
        Phase::BeforeTraining,
        &splits,
        cfg,
        &writer,
        device,
    )?);

    let mut history = session.fit(&splits, cfg.epochs, &fit_config(cfg, 0))?;

    let model = match cfg.variant {
        ModelVariant::Pretrained => {
            if cfg.evaluate_between_phases {
                reports.push(evaluate_and_append(
                    &session.model().valid(),
                    Phase::BetweenPhases,
                    &splits,
                    cfg,
                    &writer,
                    device,
                )?);
            }
            let mut session = session.recompile(Trainability::FineTune);
            history.extend(session.fit(
                &splits,
                cfg.fine_tune_epochs,
                &fit_config(cfg, cfg.epochs),
            )?);
            session.into_model()
        }
        ModelVariant::Untrained => session.into_model(),
    };

    reports.push(evaluate_and_append(
        &model.valid(),
        Phase::AfterTraining,
        &splits,
        cfg,
        &writer,
        device,
    )?);

    if let Some(path) = &cfg.checkpoint_out {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| TrainingError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        model.save_checkpoint(path)?;
        info!(path = %path.display(), "saved checkpoint");
    }

    Ok(PipelineOutcome {
        variant: cfg.variant,
        split_sizes: (splits.train.len(), splits.val.len(), splits.test.len()),
        classes: splits.classes,
        reports,
        history,
        report_path: cfg.output_path.clone(),
        checkpoint: cfg.checkpoint_out.clone(),
    })
}

fn prepare_splits(cfg: &PipelineConfig) -> TrainingResult<DatasetSplits> {
    if cfg.validate_dataset {
        let report = summarize_root_with_thresholds(&cfg.dataset_dir, &cfg.validation)?;
        match report.outcome {
            ValidationOutcome::Fail => {
                return Err(TrainingError::InvalidDataset {
                    root: cfg.dataset_dir.clone(),
                    reasons: report.reasons.join("; "),
                })
            }
            ValidationOutcome::Warn => warn!(
                outcome = report.outcome.as_str(),
                reasons = ?report.reasons,
                "dataset validation warnings"
            ),
            ValidationOutcome::Pass => info!(outcome = report.outcome.as_str(), "dataset validated"),
        }
    }

    let dataset = load_dataset(
        &cfg.dataset_dir,
        &LoaderConfig {
            image_size: cfg.image_size,
        },
    )?;
    let splits = split_dataset(dataset, cfg.split, cfg.seed)?;
    info!(
        classes = ?splits.classes,
        train = splits.train.len(),
        val = splits.val.len(),
        test = splits.test.len(),
        "dataset split"
    );
    if splits.train.is_empty() {
        return Err(TrainingError::EmptySplit { split: "train" });
    }
    if splits.test.is_empty() {
        return Err(TrainingError::EmptySplit { split: "test" });
    }
    Ok(splits)
}

fn fit_config(cfg: &PipelineConfig, epoch_offset: usize) -> FitConfig {
    FitConfig {
        batch_size: cfg.batch_size,
        seed: cfg.seed,
        transform: cfg.augmentation(),
        epoch_offset,
    }
}

fn evaluate_and_append<B: Backend>(
    model: &MaskClassifier<B>,
    phase: Phase,
    splits: &DatasetSplits,
    cfg: &PipelineConfig,
    writer: &ReportWriter,
    device: &B::Device,
) -> TrainingResult<EvaluationReport> {
    let eval = evaluate(
        model,
        &splits.test,
        splits.num_classes(),
        cfg.batch_size,
        device,
    )?;
    let report = EvaluationReport::from_evaluation(phase, &eval, cfg.detailed_report)?;
    writer.append(&report)?;
    Ok(report)
}
