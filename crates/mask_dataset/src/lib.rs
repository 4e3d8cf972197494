//! Dataset loading, splitting, and Burn-compatible batching for the face-mask classifier.
//!
//! This crate provides utilities for:
//! - Loading class-folder image datasets from the filesystem
//! - Seeded train/val/test partitioning
//! - Flip/rotation augmentation for training batches
//! - Burn-compatible batch iteration

pub mod aug;
pub mod batch;
pub mod loader;
pub mod splits;
pub mod types;
pub mod validation;

pub use aug::{to_chw, TransformPipeline};
pub use batch::{BatchConfig, BatchIter, ImageBatch};
pub use loader::{flatten_index, index_classes, load_dataset, summarize_dataset, LoaderConfig};
pub use splits::{split_dataset, DatasetSplits, Split, SplitProportions};
pub use types::*;
pub use validation::{summarize_root_with_thresholds, validate_summary};
