//! Full pipeline runs on a synthetic 30-image dataset with a tiny backbone.

use burn::backend::{ndarray::NdArray, Autodiff};
use image::{Rgb, RgbImage};
use mask_dataset::SplitProportions;
use models::{MaskClassifier, ResNetConfig};
use std::fs;
use std::path::{Path, PathBuf};
use training::{run_pipeline, ModelVariant, Phase, PipelineConfig, TrainingError};

type Backend = NdArray<f32>;
type ADBackend = Autodiff<Backend>;

const CLASSES: [&str; 3] = ["mask_weared_incorrect", "with_mask", "without_mask"];

fn create_dataset(root: &Path) -> anyhow::Result<()> {
    for (c, class) in CLASSES.iter().enumerate() {
        let dir = root.join(class);
        fs::create_dir_all(&dir)?;
        for i in 0..10 {
            let img = RgbImage::from_fn(20, 20, |x, y| {
                Rgb([(c * 110) as u8, (x * 12) as u8, (y as usize * 6 + i * 10) as u8])
            });
            img.save(dir.join(format!("{class}_{i:02}.png")))?;
        }
    }
    Ok(())
}

fn tiny_backbone() -> ResNetConfig {
    ResNetConfig {
        layers: [1, 1, 1, 1],
        base_width: 4,
    }
}

fn base_config(variant: ModelVariant, root: &Path) -> PipelineConfig {
    let mut cfg = PipelineConfig::preset(variant);
    cfg.dataset_dir = root.join("data");
    cfg.output_path = root.join(format!("{}-output.txt", variant.as_str()));
    cfg.image_size = (32, 32);
    cfg.batch_size = 8;
    cfg.seed = 11;
    cfg.epochs = 1;
    cfg.fine_tune_epochs = 1;
    cfg.backbone = tiny_backbone();
    cfg
}

/// Stand-in for converted ImageNet weights: a saved backbone with the same layout.
fn write_backbone_weights(cfg: &PipelineConfig, root: &Path) -> anyhow::Result<PathBuf> {
    let path = root.join("backbone.bin");
    let model = MaskClassifier::<Backend>::new(&cfg.classifier(3), &Default::default());
    model.save_backbone(&path)?;
    Ok(path)
}

fn headers(text: &str) -> Vec<&str> {
    text.lines()
        .filter(|l| l.ends_with("EVALUATION"))
        .collect()
}

#[test]
fn pretrained_run_writes_blocks_in_phase_order() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_dataset(&tmp.path().join("data"))?;
    let mut cfg = base_config(ModelVariant::Pretrained, tmp.path());
    cfg.backbone_weights = Some(write_backbone_weights(&cfg, tmp.path())?);

    let outcome = run_pipeline::<ADBackend>(&cfg, &Default::default())?;
    assert_eq!(outcome.split_sizes, (24, 3, 3));
    assert_eq!(outcome.history.len(), 2);
    assert_eq!(
        outcome.reports.iter().map(|r| r.phase).collect::<Vec<_>>(),
        vec![
            Phase::BeforeTraining,
            Phase::BetweenPhases,
            Phase::AfterTraining
        ]
    );

    let text = fs::read_to_string(&cfg.output_path)?;
    assert_eq!(
        headers(&text),
        vec![
            "BEFORE TRAINING EVALUATION",
            "AFTER FINE TUNING EVALUATION",
            "AFTER TRAINING EVALUATION"
        ]
    );
    assert_eq!(text.matches("BALANCED ACCURACY: ").count(), 3);
    assert!(!text.contains("ROC AUC SCORE"));
    Ok(())
}

#[test]
fn pretrained_run_without_mid_evaluation_writes_two_blocks() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_dataset(&tmp.path().join("data"))?;
    let mut cfg = base_config(ModelVariant::Pretrained, tmp.path());
    cfg.backbone_weights = Some(write_backbone_weights(&cfg, tmp.path())?);
    cfg.evaluate_between_phases = false;

    run_pipeline::<ADBackend>(&cfg, &Default::default())?;

    let text = fs::read_to_string(&cfg.output_path)?;
    assert_eq!(
        headers(&text),
        vec!["BEFORE TRAINING EVALUATION", "AFTER TRAINING EVALUATION"]
    );
    assert_eq!(text.lines().count(), 6);
    Ok(())
}

#[test]
fn untrained_run_writes_detailed_blocks_and_appends() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_dataset(&tmp.path().join("data"))?;
    let mut cfg = base_config(ModelVariant::Untrained, tmp.path());
    // A large test split keeps every class present, so ROC-AUC is defined.
    cfg.split = SplitProportions::new(0.1, 0.0, 0.9);

    let outcome = run_pipeline::<ADBackend>(&cfg, &Default::default())?;
    assert_eq!(outcome.split_sizes, (3, 0, 27));
    assert_eq!(outcome.history.len(), 1);
    assert!(outcome.history[0].val_loss.is_none());
    assert!(outcome.reports.iter().all(|r| r.roc_auc.is_some()));
    for report in &outcome.reports {
        let total: usize = report
            .confusion_matrix
            .as_ref()
            .map(|m| m.iter().flatten().sum())
            .unwrap_or(0);
        assert_eq!(total, 27);
    }

    let first = fs::read_to_string(&cfg.output_path)?;
    assert_eq!(
        headers(&first),
        vec!["BEFORE TRAINING EVALUATION", "AFTER TRAINING EVALUATION"]
    );
    assert_eq!(first.matches("CONFUSION MATRIX: [[").count(), 2);
    assert_eq!(first.matches("ROC AUC SCORE: ").count(), 2);

    run_pipeline::<ADBackend>(&cfg, &Default::default())?;
    let second = fs::read_to_string(&cfg.output_path)?;
    assert!(second.starts_with(&first));
    assert_eq!(headers(&second).len(), 4);
    Ok(())
}

#[test]
fn run_saves_a_loadable_checkpoint() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_dataset(&tmp.path().join("data"))?;
    let mut cfg = base_config(ModelVariant::Untrained, tmp.path());
    cfg.detailed_report = false;
    cfg.checkpoint_out = Some(tmp.path().join("checkpoints").join("classifier.bin"));

    let outcome = run_pipeline::<ADBackend>(&cfg, &Default::default())?;
    let path = outcome.checkpoint.expect("checkpoint path");
    assert!(path.exists());
    MaskClassifier::<Backend>::load_checkpoint(&cfg.classifier(3), &path, &Default::default())?;
    Ok(())
}

#[test]
fn pretrained_run_without_weights_fails_before_writing() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_dataset(&tmp.path().join("data"))?;
    let mut cfg = base_config(ModelVariant::Pretrained, tmp.path());
    cfg.backbone_weights = Some(tmp.path().join("missing.bin"));

    let err = run_pipeline::<ADBackend>(&cfg, &Default::default());
    assert!(matches!(
        err,
        Err(TrainingError::Model(models::ModelError::MissingWeights { .. }))
    ));
    assert!(!cfg.output_path.exists());
    Ok(())
}

#[test]
fn missing_dataset_root_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = base_config(ModelVariant::Untrained, tmp.path());
    assert!(run_pipeline::<ADBackend>(&cfg, &Default::default()).is_err());
    assert!(!cfg.output_path.exists());
}
