//! Indexing and loading class-folder image datasets.

use crate::types::{
    ClassIndex, ClassSummary, DatasetError, DatasetResult, DatasetSummary, ImageDataset,
    LabeledImage, SampleIndex,
};
use image::imageops::FilterType;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Every image is stretched to this (width, height).
    pub image_size: (u32, u32),
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            image_size: (64, 64),
        }
    }
}

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
            .unwrap_or(false)
}

/// Scan `root/<class>/` directories. Classes are sorted by name and labelled by position.
pub fn index_classes(root: &Path) -> DatasetResult<Vec<ClassIndex>> {
    let entries = fs::read_dir(root).map_err(|e| DatasetError::Io {
        path: root.to_path_buf(),
        source: e,
    })?;
    let mut class_dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect();
    class_dirs.sort();
    if class_dirs.is_empty() {
        return Err(DatasetError::NoClasses {
            root: root.to_path_buf(),
        });
    }

    let mut classes = Vec::with_capacity(class_dirs.len());
    for (label, dir) in class_dirs.into_iter().enumerate() {
        let name = dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|e| DatasetError::Io {
                path: dir.clone(),
                source: e,
            })?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| is_image_file(p))
            .collect();
        files.sort();
        classes.push(ClassIndex { name, label, files });
    }
    Ok(classes)
}

/// Flatten class indices into (path, label) pairs, class-major then file order.
pub fn flatten_index(classes: &[ClassIndex]) -> Vec<SampleIndex> {
    classes
        .iter()
        .flat_map(|class| {
            class.files.iter().map(move |path| SampleIndex {
                path: path.clone(),
                label: class.label,
            })
        })
        .collect()
}

pub(crate) fn load_image(idx: &SampleIndex, size: (u32, u32)) -> DatasetResult<LabeledImage> {
    let img = image::open(&idx.path)
        .map_err(|e| DatasetError::Image {
            path: idx.path.clone(),
            source: e,
        })?
        .to_rgb8();
    let (w, h) = size;
    let image = if img.dimensions() == (w, h) {
        img
    } else {
        image::imageops::resize(&img, w, h, FilterType::Triangle)
    };
    Ok(LabeledImage {
        path: idx.path.clone(),
        label: idx.label,
        image,
    })
}

/// Decode every image under `root` eagerly. Any unreadable file fails the whole load.
pub fn load_dataset(root: &Path, cfg: &LoaderConfig) -> DatasetResult<ImageDataset> {
    let classes = index_classes(root)?;
    let indices = flatten_index(&classes);
    debug!(
        root = %root.display(),
        files = indices.len(),
        "decoding dataset images"
    );
    let samples = indices
        .par_iter()
        .map(|idx| load_image(idx, cfg.image_size))
        .collect::<DatasetResult<Vec<_>>>()?;
    for class in &classes {
        info!(class = %class.name, label = class.label, images = class.files.len(), "class loaded");
    }
    Ok(ImageDataset {
        classes: classes.into_iter().map(|c| c.name).collect(),
        samples,
    })
}

/// Count files per class and how many of them cannot be decoded (header probe only).
pub fn summarize_dataset(root: &Path) -> DatasetResult<DatasetSummary> {
    let classes = index_classes(root)?;
    let mut summary = DatasetSummary::default();
    for class in &classes {
        let unreadable = class
            .files
            .par_iter()
            .filter(|p| image::image_dimensions(p).is_err())
            .count();
        summary.total += class.files.len();
        summary.unreadable += unreadable;
        summary.classes.push(ClassSummary {
            name: class.name.clone(),
            label: class.label,
            files: class.files.len(),
            unreadable,
        });
    }
    Ok(summary)
}
