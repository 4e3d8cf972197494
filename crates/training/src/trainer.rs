//! Optimizer binding, the epoch loop and single-pass evaluation.

use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::TensorData;
use mask_dataset::{BatchConfig, DatasetSplits, ImageBatch, Split, TransformPipeline};
use models::{MaskClassifier, Trainability};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::OptimizerConfig;
use crate::metrics::{argmax, Evaluation, PredictionRecord};
use crate::{TrainingError, TrainingResult};

/// Bind a fresh Adam optimizer to `model`. Optimizer state starts empty; weights are untouched.
pub fn compile<B: AutodiffBackend>(
    model: MaskClassifier<B>,
    backbone: Trainability,
    optimizer: OptimizerConfig,
    device: &B::Device,
) -> Session<B, impl Optimizer<MaskClassifier<B>, B>> {
    let optim = AdamConfig::new()
        .with_beta_1(optimizer.beta_1)
        .with_beta_2(optimizer.beta_2)
        .with_epsilon(optimizer.epsilon)
        .init();
    debug!(
        lr = optimizer.learning_rate,
        backbone = ?backbone,
        "compiled model with a fresh Adam optimizer"
    );
    Session {
        model,
        optim,
        backbone,
        optimizer,
        device: device.clone(),
    }
}

#[derive(Debug, Clone)]
pub struct FitConfig {
    pub batch_size: usize,
    pub seed: u64,
    pub transform: TransformPipeline,
    /// Added to the epoch index when seeding shuffles and augmentation, so a second phase
    /// does not replay the first phase's sample order.
    pub epoch_offset: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepOutcome {
    /// Mean loss over the batch.
    pub loss: f64,
    pub correct: usize,
    pub samples: usize,
}

/// A model bound to an optimizer and a backbone trainability setting.
pub struct Session<B: AutodiffBackend, O> {
    model: MaskClassifier<B>,
    optim: O,
    backbone: Trainability,
    optimizer: OptimizerConfig,
    device: B::Device,
}

impl<B, O> Session<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<MaskClassifier<B>, B>,
{
    pub fn model(&self) -> &MaskClassifier<B> {
        &self.model
    }

    pub fn into_model(self) -> MaskClassifier<B> {
        self.model
    }

    pub fn backbone(&self) -> Trainability {
        self.backbone
    }

    /// Change backbone trainability and rebind a fresh optimizer. Weights carry over.
    pub fn recompile(
        self,
        backbone: Trainability,
    ) -> Session<B, impl Optimizer<MaskClassifier<B>, B>> {
        info!(from = ?self.backbone, to = ?backbone, "recompiling");
        compile(self.model, backbone, self.optimizer, &self.device)
    }

    /// One optimizer step on `batch`.
    pub fn train_step(&mut self, batch: ImageBatch<B>) -> TrainingResult<StepOutcome> {
        let samples = batch.labels.len();
        let logits = self.model.forward_train(batch.images, self.backbone);
        let [_, num_classes] = logits.dims();
        let loss = CrossEntropyLossConfig::new()
            .init(&self.device)
            .forward(logits.clone(), batch.targets);

        let loss_val = host_values(loss.clone().detach().into_data(), "loss")?
            .first()
            .copied()
            .unwrap_or(0.0);
        let records = pair_records(
            host_values(logits.detach().into_data(), "logits")?,
            batch.labels,
            num_classes,
        )?;
        let correct = records
            .iter()
            .filter(|r| argmax(&r.scores) == r.label)
            .count();

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self
            .optim
            .step(self.optimizer.learning_rate, self.model.clone(), grads);

        Ok(StepOutcome {
            loss: loss_val as f64,
            correct,
            samples,
        })
    }

    /// Train for `epochs` full passes over `splits.train`, checking `splits.val` after each.
    pub fn fit(
        &mut self,
        splits: &DatasetSplits,
        epochs: usize,
        cfg: &FitConfig,
    ) -> TrainingResult<Vec<EpochStats>> {
        let mut history = Vec::with_capacity(epochs);
        info!(
            epochs,
            backbone = ?self.backbone,
            train = splits.train.len(),
            val = splits.val.len(),
            augmentation = %cfg.transform.describe(),
            "fitting"
        );

        for epoch in 0..epochs {
            let seed_epoch = cfg.epoch_offset + epoch;
            let mut iter = splits.train.batches(
                BatchConfig::training(cfg.batch_size, cfg.seed, cfg.transform.clone()),
                seed_epoch,
            );
            debug!(epoch = seed_epoch, batches = iter.num_batches(), "epoch start");
            let mut loss_sum = 0.0f64;
            let mut correct = 0usize;
            let mut seen = 0usize;

            while let Some(batch) = iter.next_batch::<B>(&self.device)? {
                let step = self.train_step(batch)?;
                loss_sum += step.loss * step.samples as f64;
                correct += step.correct;
                seen += step.samples;
            }

            let (train_loss, train_accuracy) = if seen == 0 {
                (0.0, 0.0)
            } else {
                (loss_sum / seen as f64, correct as f64 / seen as f64)
            };

            let val = if splits.val.is_empty() {
                None
            } else {
                Some(evaluate(
                    &self.model.valid(),
                    &splits.val,
                    splits.num_classes(),
                    cfg.batch_size,
                    &self.device,
                )?)
            };

            let stats = EpochStats {
                epoch: seed_epoch,
                train_loss,
                train_accuracy,
                val_loss: val.as_ref().map(|v| v.loss),
                val_accuracy: val.as_ref().map(|v| v.accuracy),
            };
            info!(
                epoch = stats.epoch,
                backbone = ?self.backbone,
                train_loss = stats.train_loss,
                train_acc = stats.train_accuracy,
                val_loss = ?stats.val_loss,
                val_acc = ?stats.val_accuracy,
                "epoch complete"
            );
            history.push(stats);
        }
        Ok(history)
    }
}

/// One inference pass over `split`: every prediction is recorded next to its own label.
pub fn evaluate<B: Backend>(
    model: &MaskClassifier<B>,
    split: &Split,
    num_classes: usize,
    batch_size: usize,
    device: &B::Device,
) -> TrainingResult<Evaluation> {
    let mut records = Vec::with_capacity(split.len());
    let mut iter = split.batches(BatchConfig::evaluation(batch_size), 0);
    while let Some(batch) = iter.next_batch::<B>(device)? {
        let probs = host_values(model.predict(batch.images).into_data(), "predictions")?;
        records.extend(pair_records(probs, batch.labels, num_classes)?);
    }
    Evaluation::from_records(records, num_classes)
}

fn host_values(data: TensorData, what: &str) -> TrainingResult<Vec<f32>> {
    data.to_vec::<f32>()
        .map_err(|e| TrainingError::Metric(format!("failed to read {what}: {e:?}")))
}

/// Split a flat `[n * num_classes]` score buffer into one record per label.
pub(crate) fn pair_records(
    scores: Vec<f32>,
    labels: Vec<usize>,
    num_classes: usize,
) -> TrainingResult<Vec<PredictionRecord>> {
    if num_classes == 0 || scores.len() != labels.len() * num_classes {
        return Err(TrainingError::Metric(format!(
            "{} scores for {} labels with {num_classes} classes",
            scores.len(),
            labels.len()
        )));
    }
    Ok(scores
        .chunks(num_classes)
        .zip(labels)
        .map(|(row, label)| PredictionRecord {
            label,
            scores: row.to_vec(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_pair_with_labels_row_by_row() {
        let records = pair_records(vec![0.9, 0.1, 0.2, 0.8], vec![0, 1], 2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].label, 1);
        assert_eq!(records[1].scores, vec![0.2, 0.8]);
    }

    #[test]
    fn short_score_buffer_is_an_error() {
        let err = pair_records(Vec::new(), vec![0, 1, 2], 3).unwrap_err();
        assert!(matches!(err, TrainingError::Metric(_)));
        assert!(err.to_string().contains("0 scores for 3 labels"));
    }

    #[test]
    fn ragged_score_buffer_is_an_error() {
        assert!(pair_records(vec![0.5; 5], vec![0, 1], 3).is_err());
    }
}
