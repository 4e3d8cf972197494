//! Image augmentation applied on the fly to training batches.

use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

/// Random flip + random rotation, the training-time augmentation stack.
///
/// Evaluation batches use [`TransformPipeline::identity`], which leaves pixels untouched.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    /// Probability of mirroring left/right.
    pub flip_horizontal_prob: f32,
    /// Probability of mirroring top/bottom.
    pub flip_vertical_prob: f32,
    /// Rotation range as a fraction of a full turn; angles are drawn from `±factor·2π`.
    pub rotation_factor: f32,
    /// Seed for reproducible augmentation; mixed with epoch and sample position.
    pub seed: Option<u64>,
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::identity()
    }
}

impl TransformPipeline {
    pub fn identity() -> Self {
        Self {
            flip_horizontal_prob: 0.0,
            flip_vertical_prob: 0.0,
            rotation_factor: 0.0,
            seed: None,
        }
    }

    /// Horizontal+vertical flips at p=0.5 and rotation by up to `rotation_factor` of a turn.
    pub fn flip_and_rotate(rotation_factor: f32, seed: Option<u64>) -> Self {
        Self {
            flip_horizontal_prob: 0.5,
            flip_vertical_prob: 0.5,
            rotation_factor,
            seed,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.flip_horizontal_prob <= 0.0
            && self.flip_vertical_prob <= 0.0
            && self.rotation_factor <= 0.0
    }

    pub fn describe(&self) -> String {
        format!(
            "hflip_p={:.2} vflip_p={:.2} rotation_factor={:.2} seed={}",
            self.flip_horizontal_prob,
            self.flip_vertical_prob,
            self.rotation_factor,
            self.seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }

    pub fn apply(&self, img: &image::RgbImage, epoch: usize, position: usize) -> image::RgbImage {
        if self.is_identity() {
            return img.clone();
        }
        let mut rng_local;
        let mut seeded_rng;
        let rng: &mut dyn rand::RngCore = if let Some(seed) = self.seed {
            let mixed = seed
                ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
                ^ (position as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            seeded_rng = rand::rngs::StdRng::seed_from_u64(mixed);
            &mut seeded_rng
        } else {
            rng_local = rand::rng();
            &mut rng_local
        };

        let mut out = img.clone();
        maybe_hflip(&mut out, self.flip_horizontal_prob, rng);
        maybe_vflip(&mut out, self.flip_vertical_prob, rng);
        maybe_rotate(&mut out, self.rotation_factor, rng);
        out
    }
}

pub(crate) fn maybe_hflip(img: &mut image::RgbImage, prob: f32, rng: &mut dyn rand::RngCore) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_horizontal_in_place(img);
    }
}

pub(crate) fn maybe_vflip(img: &mut image::RgbImage, prob: f32, rng: &mut dyn rand::RngCore) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_vertical_in_place(img);
    }
}

pub(crate) fn maybe_rotate(img: &mut image::RgbImage, factor: f32, rng: &mut dyn rand::RngCore) {
    if factor <= 0.0 {
        return;
    }
    let limit = factor * 2.0 * PI;
    let angle = rng.random_range(-limit..=limit);
    *img = rotate_reflect(img, angle);
}

fn reflect_index(i: i64, n: i64) -> u32 {
    let period = 2 * n;
    let m = i.rem_euclid(period);
    (if m < n { m } else { period - 1 - m }) as u32
}

/// Rotate counter-clockwise by `angle` radians about the image centre.
/// Bilinear sampling; out-of-bounds reads reflect back into the image.
pub fn rotate_reflect(img: &image::RgbImage, angle: f32) -> image::RgbImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let (sin, cos) = angle.sin_cos();
    let cx = (w as f32 - 1.0) * 0.5;
    let cy = (h as f32 - 1.0) * 0.5;
    let (wi, hi) = (w as i64, h as i64);

    image::RgbImage::from_fn(w, h, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        // Inverse mapping: where does this output pixel come from?
        let sx = cos * dx - sin * dy + cx;
        let sy = sin * dx + cos * dy + cy;
        let x0 = sx.floor();
        let y0 = sy.floor();
        let fx = sx - x0;
        let fy = sy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let px = |xi: i64, yi: i64| *img.get_pixel(reflect_index(xi, wi), reflect_index(yi, hi));
        let p00 = px(x0, y0);
        let p10 = px(x0 + 1, y0);
        let p01 = px(x0, y0 + 1);
        let p11 = px(x0 + 1, y0 + 1);

        let mut out = [0u8; 3];
        for c in 0..3 {
            let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
            let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
            out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
        image::Rgb(out)
    })
}

/// Planar CHW floats in [0, 1].
pub fn to_chw(img: &image::RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut image_chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * width + x) as usize;
        image_chw[base] = pixel[0] as f32 / 255.0;
        image_chw[plane + base] = pixel[1] as f32 / 255.0;
        image_chw[2 * plane + base] = pixel[2] as f32 / 255.0;
    }
    image_chw
}
