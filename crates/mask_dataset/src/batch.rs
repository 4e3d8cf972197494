//! Batch iteration over an in-memory split.

use crate::aug::{to_chw, TransformPipeline};
use crate::splits::Split;
use crate::types::{DatasetError, DatasetResult};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Shuffle sample order each epoch (seed mixed with the epoch number).
    pub shuffle: bool,
    pub seed: Option<u64>,
    /// Drop the last partial batch.
    pub drop_last: bool,
    pub transform: TransformPipeline,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: false,
            seed: None,
            drop_last: false,
            transform: TransformPipeline::identity(),
        }
    }
}

impl BatchConfig {
    /// In-order, un-augmented batches for validation/test passes.
    pub fn evaluation(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }

    /// Shuffled, augmented batches for the training split.
    pub fn training(batch_size: usize, seed: u64, transform: TransformPipeline) -> Self {
        Self {
            batch_size,
            shuffle: true,
            seed: Some(seed),
            drop_last: false,
            transform,
        }
    }
}

pub struct ImageBatch<B: Backend> {
    /// `[batch, 3, height, width]`, values in [0, 1].
    pub images: Tensor<B, 4>,
    /// Class indices, same order as `images`.
    pub targets: Tensor<B, 1, Int>,
    /// Host copy of `targets`; used to pair predictions with labels in one pass.
    pub labels: Vec<usize>,
}

pub struct BatchIter<'a> {
    split: &'a Split,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    cfg: BatchConfig,
    images_buf: Vec<f32>,
    processed_batches: usize,
    total_assemble_time: Duration,
}

impl<'a> BatchIter<'a> {
    pub fn new(split: &'a Split, cfg: BatchConfig, epoch: usize) -> Self {
        let mut order: Vec<usize> = (0..split.len()).collect();
        if cfg.shuffle {
            let mut rng = match cfg.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(epoch as u64)),
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            order.shuffle(&mut rng);
        }
        Self {
            split,
            order,
            cursor: 0,
            epoch,
            cfg,
            images_buf: Vec::new(),
            processed_batches: 0,
            total_assemble_time: Duration::ZERO,
        }
    }

    pub fn num_batches(&self) -> usize {
        let bs = self.cfg.batch_size.max(1);
        if self.cfg.drop_last {
            self.order.len() / bs
        } else {
            self.order.len().div_ceil(bs)
        }
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<ImageBatch<B>>> {
        let batch_size = self.cfg.batch_size.max(1);
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + batch_size).min(self.order.len());
        if self.cfg.drop_last && end - self.cursor < batch_size {
            self.cursor = self.order.len();
            return Ok(None);
        }
        let positions = &self.order[self.cursor..end];
        self.cursor = end;

        let t_assemble = Instant::now();
        let samples = &self.split.samples;
        let transform = &self.cfg.transform;
        let epoch = self.epoch;
        let planes: Vec<(Vec<f32>, (u32, u32))> = positions
            .par_iter()
            .map(|&pos| {
                let img = transform.apply(&samples[pos].image, epoch, pos);
                let dims = img.dimensions();
                (to_chw(&img), dims)
            })
            .collect();

        let (width, height) = planes[0].1;
        if let Some((_, dims)) = planes.iter().find(|(_, d)| *d != (width, height)) {
            return Err(DatasetError::Other(format!(
                "batch contains varying image sizes: {}x{} vs {}x{}",
                dims.0, dims.1, width, height
            )));
        }

        self.images_buf.clear();
        for (chw, _) in &planes {
            self.images_buf.extend_from_slice(chw);
        }
        let labels: Vec<usize> = positions.iter().map(|&pos| samples[pos].label).collect();
        let batch_len = labels.len();

        let images = Tensor::<B, 1>::from_floats(self.images_buf.as_slice(), device).reshape([
            batch_len,
            3,
            height as usize,
            width as usize,
        ]);
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(
                labels.iter().map(|&l| l as i64).collect::<Vec<_>>(),
                [batch_len],
            ),
            device,
        );

        self.processed_batches += 1;
        self.total_assemble_time += t_assemble.elapsed();
        if self.cursor >= self.order.len() {
            debug!(
                epoch = self.epoch,
                batches = self.processed_batches,
                samples = self.order.len(),
                assemble_ms = self.total_assemble_time.as_secs_f64() * 1000.0,
                "split exhausted"
            );
        }

        Ok(Some(ImageBatch {
            images,
            targets,
            labels,
        }))
    }
}

impl Split {
    pub fn batches(&self, cfg: BatchConfig, epoch: usize) -> BatchIter<'_> {
        BatchIter::new(self, cfg, epoch)
    }
}
