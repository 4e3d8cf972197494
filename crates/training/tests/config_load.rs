use std::fs;
use std::path::PathBuf;

use training::{ModelVariant, PipelineConfig, TrainingError};

#[test]
fn loads_partial_config_over_the_untrained_preset() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("maskfit.toml");
    fs::write(
        &path,
        "[dataset]\ndir = \"faces\"\n\n[training]\nepochs = 5\n\n[report]\noutput = \"logs/untrained.txt\"\n",
    )
    .unwrap();

    let cfg = PipelineConfig::from_path(&path, ModelVariant::Untrained).unwrap();
    assert_eq!(cfg.dataset_dir, PathBuf::from("faces"));
    assert_eq!(cfg.epochs, 5);
    assert_eq!(cfg.output_path, PathBuf::from("logs/untrained.txt"));
    assert_eq!(cfg.dropout, 0.5);
    assert!(cfg.detailed_report);
}

#[test]
fn rejects_proportions_that_do_not_sum_to_one() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("bad.toml");
    fs::write(
        &path,
        "[dataset]\nsplit = { train = 0.7, val = 0.1, test = 0.1 }\n",
    )
    .unwrap();

    let err = PipelineConfig::from_path(&path, ModelVariant::Pretrained);
    assert!(matches!(err, Err(TrainingError::Config { .. })));
}

#[test]
fn missing_file_is_an_io_error() {
    let err = PipelineConfig::from_path(
        std::path::Path::new("no/such/maskfit.toml"),
        ModelVariant::Pretrained,
    );
    assert!(matches!(err, Err(TrainingError::Io { .. })));
}
