use std::fs;
use std::path::{Path, PathBuf};

use burn::backend::Autodiff;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{ModelVariant, PipelineConfig};
use crate::pipeline::{run_pipeline, PipelineOutcome};
use crate::TrainBackend;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Fine-tune the face-mask classifier (pretrained or from scratch) and append evaluation reports"
)]
pub struct TrainArgs {
    /// Pipeline to run.
    #[arg(long, value_enum, default_value_t = ModelVariant::Pretrained)]
    pub variant: ModelVariant,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// TOML config layered over the variant preset (falls back to $MASKFIT_CONFIG).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Dataset root with one subdirectory per class.
    #[arg(long)]
    pub dataset_dir: Option<PathBuf>,
    /// Report file; blocks are appended, never truncated.
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Epochs for the first phase.
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Epochs after unfreezing the backbone (pretrained only).
    #[arg(long)]
    pub fine_tune_epochs: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub lr: Option<f64>,
    /// Seed for the split, shuffles and augmentation.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Square input resolution (pixels per side).
    #[arg(long)]
    pub image_size: Option<u32>,
    /// Pretrained backbone record (BinFileRecorder, full precision).
    #[arg(long)]
    pub backbone_weights: Option<PathBuf>,
    /// Add confusion matrix and ROC-AUC lines to every report block.
    #[arg(long, conflicts_with = "summary_report")]
    pub detailed_report: bool,
    /// Only loss, accuracy and balanced accuracy in report blocks.
    #[arg(long)]
    pub summary_report: bool,
    /// Skip the report block between the frozen and fine-tune phases.
    #[arg(long)]
    pub skip_mid_eval: bool,
    /// Skip the dataset validation scan before loading.
    #[arg(long)]
    pub skip_validation: bool,
    /// Final classifier checkpoint output path.
    #[arg(long)]
    pub checkpoint_out: Option<PathBuf>,
    /// Write the run outcome (reports + epoch history) as JSON.
    #[arg(long)]
    pub summary_out: Option<PathBuf>,
}

impl TrainArgs {
    /// Variant preset, then the config file, then explicit flags.
    pub fn resolve_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut cfg = PipelineConfig::load(self.variant, self.config.as_deref())?;
        if let Some(v) = &self.dataset_dir {
            cfg.dataset_dir = v.clone();
        }
        if let Some(v) = &self.output {
            cfg.output_path = v.clone();
        }
        if let Some(v) = self.epochs {
            cfg.epochs = v;
        }
        if let Some(v) = self.fine_tune_epochs {
            cfg.fine_tune_epochs = v;
        }
        if let Some(v) = self.batch_size {
            cfg.batch_size = v;
        }
        if let Some(v) = self.lr {
            cfg.optimizer.learning_rate = v;
        }
        if let Some(v) = self.seed {
            cfg.seed = v;
        }
        if let Some(v) = self.image_size {
            cfg.image_size = (v, v);
        }
        if let Some(v) = &self.backbone_weights {
            cfg.backbone_weights = Some(v.clone());
        }
        if self.detailed_report {
            cfg.detailed_report = true;
        }
        if self.summary_report {
            cfg.detailed_report = false;
        }
        if self.skip_mid_eval {
            cfg.evaluate_between_phases = false;
        }
        if self.skip_validation {
            cfg.validate_dataset = false;
        }
        if let Some(v) = &self.checkpoint_out {
            cfg.checkpoint_out = Some(v.clone());
        }
        cfg.validate().map_err(|msg| anyhow::anyhow!("invalid config: {msg}"))?;
        Ok(cfg)
    }
}

/// Install the global `tracing` subscriber (`RUST_LOG`, default `info`). Safe to call twice.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    let cfg = args.resolve_config()?;
    info!(
        variant = cfg.variant.as_str(),
        dataset = %cfg.dataset_dir.display(),
        output = %cfg.output_path.display(),
        epochs = cfg.epochs,
        fine_tune_epochs = cfg.fine_tune_epochs,
        "starting run"
    );

    let device = <Autodiff<TrainBackend> as burn::tensor::backend::Backend>::Device::default();
    let outcome = run_pipeline::<Autodiff<TrainBackend>>(&cfg, &device)
        .map_err(|e| anyhow::anyhow!("{} pipeline failed: {e}", cfg.variant.as_str()))?;

    for report in &outcome.reports {
        info!(
            phase = report.phase.header(),
            loss = report.loss,
            accuracy = report.accuracy,
            balanced_accuracy = report.balanced_accuracy,
            roc_auc = ?report.roc_auc,
            "evaluation"
        );
    }
    if let Some(path) = &args.summary_out {
        write_summary(path, &outcome)?;
    }
    info!(report = %outcome.report_path.display(), "run complete");
    Ok(())
}

fn write_summary(path: &Path, outcome: &PipelineOutcome) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(outcome)?;
    fs::write(path, json)
        .map_err(|e| anyhow::anyhow!("failed to write summary {}: {e}", path.display()))?;
    info!(path = %path.display(), "wrote run summary");
    Ok(())
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_preset() {
        let args = TrainArgs::parse_from([
            "train",
            "--variant",
            "untrained",
            "--epochs",
            "3",
            "--image-size",
            "32",
            "--summary-report",
        ]);
        let cfg = args.resolve_config().unwrap();
        assert_eq!(cfg.variant, ModelVariant::Untrained);
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.image_size, (32, 32));
        assert!(!cfg.detailed_report);
        assert_eq!(cfg.dropout, 0.5);
    }

    #[test]
    fn skip_mid_eval_turns_off_the_between_phase_block() {
        let args = TrainArgs::parse_from(["train", "--skip-mid-eval"]);
        let cfg = args.resolve_config().unwrap();
        assert_eq!(cfg.variant, ModelVariant::Pretrained);
        assert!(!cfg.evaluate_between_phases);
    }

    #[test]
    fn wgpu_needs_the_feature() {
        let result = validate_backend_choice(BackendKind::Wgpu);
        assert_eq!(result.is_err(), !cfg!(feature = "backend-wgpu"));
    }
}
