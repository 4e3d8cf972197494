//! Bottleneck ResNet feature extractor (ResNet-50 layout by default), no classification top.
//!
//! Block layout follows ResNet v1.5 (stride on the 3x3 conv, bias-free convs). Keras' ResNet50
//! strides the first 1x1 conv instead, so its weights need re-laying out before they load here.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

const EXPANSION: usize = 4;

/// How batch-norm layers normalise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormMode {
    /// Burn's default: batch statistics (and running-stat updates) on autodiff backends,
    /// running statistics otherwise.
    Auto,
    /// Always the running statistics, which are never updated. Gamma and beta still train.
    Running,
}

/// Inference-mode batch norm that stays differentiable with respect to gamma and beta.
fn norm<B: Backend>(bn: &BatchNorm<B, 2>, x: Tensor<B, 4>, mode: NormMode) -> Tensor<B, 4> {
    match mode {
        NormMode::Auto => bn.forward(x),
        NormMode::Running => {
            let [_, c, _, _] = x.dims();
            let mean = bn.running_mean.value().detach().reshape([1, c, 1, 1]);
            let std = bn
                .running_var
                .value()
                .detach()
                .add_scalar(bn.epsilon)
                .sqrt()
                .reshape([1, c, 1, 1]);
            let gamma = bn.gamma.val().reshape([1, c, 1, 1]);
            let beta = bn.beta.val().reshape([1, c, 1, 1]);
            (x - mean) / std * gamma + beta
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResNetConfig {
    /// Bottleneck blocks per stage.
    pub layers: [usize; 4],
    /// Width of the first stage; later stages double it.
    pub base_width: usize,
}

impl Default for ResNetConfig {
    fn default() -> Self {
        Self::resnet50()
    }
}

impl ResNetConfig {
    pub fn resnet50() -> Self {
        Self {
            layers: [3, 4, 6, 3],
            base_width: 64,
        }
    }

    /// Channels of the final feature map (2048 for ResNet-50).
    pub fn feature_channels(&self) -> usize {
        self.base_width * 8 * EXPANSION
    }
}

fn conv_bn<B: Backend>(
    in_ch: usize,
    out_ch: usize,
    kernel: usize,
    stride: usize,
    device: &B::Device,
) -> (Conv2d<B>, BatchNorm<B, 2>) {
    let pad = kernel / 2;
    let conv = Conv2dConfig::new([in_ch, out_ch], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(pad, pad))
        .with_bias(false)
        .init(device);
    let bn = BatchNormConfig::new(out_ch).init(device);
    (conv, bn)
}

#[derive(Debug, Module)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    fn forward(&self, x: Tensor<B, 4>, mode: NormMode) -> Tensor<B, 4> {
        norm(&self.bn, self.conv.forward(x), mode)
    }
}

#[derive(Debug, Module)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    conv3: Conv2d<B>,
    bn3: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> Bottleneck<B> {
    fn new(in_ch: usize, width: usize, stride: usize, device: &B::Device) -> Self {
        let out_ch = width * EXPANSION;
        let (conv1, bn1) = conv_bn(in_ch, width, 1, 1, device);
        let (conv2, bn2) = conv_bn(width, width, 3, stride, device);
        let (conv3, bn3) = conv_bn(width, out_ch, 1, 1, device);
        let downsample = (stride != 1 || in_ch != out_ch).then(|| {
            let (conv, bn) = conv_bn(in_ch, out_ch, 1, stride, device);
            Downsample { conv, bn }
        });
        Self {
            conv1,
            bn1,
            conv2,
            bn2,
            conv3,
            bn3,
            downsample,
        }
    }

    fn forward(&self, input: Tensor<B, 4>, mode: NormMode) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(down) => down.forward(input.clone(), mode),
            None => input.clone(),
        };
        let x = relu(norm(&self.bn1, self.conv1.forward(input), mode));
        let x = relu(norm(&self.bn2, self.conv2.forward(x), mode));
        let x = norm(&self.bn3, self.conv3.forward(x), mode);
        relu(x + identity)
    }
}

fn make_stage<B: Backend>(
    in_ch: &mut usize,
    width: usize,
    blocks: usize,
    stride: usize,
    device: &B::Device,
) -> Vec<Bottleneck<B>> {
    (0..blocks.max(1))
        .map(|block| {
            let s = if block == 0 { stride } else { 1 };
            let b = Bottleneck::new(*in_ch, width, s, device);
            *in_ch = width * EXPANSION;
            b
        })
        .collect()
}

#[derive(Debug, Module)]
pub struct ResNet<B: Backend> {
    stem_conv: Conv2d<B>,
    stem_bn: BatchNorm<B, 2>,
    stem_pool: MaxPool2d,
    layer1: Vec<Bottleneck<B>>,
    layer2: Vec<Bottleneck<B>>,
    layer3: Vec<Bottleneck<B>>,
    layer4: Vec<Bottleneck<B>>,
}

impl<B: Backend> ResNet<B> {
    pub fn new(cfg: &ResNetConfig, device: &B::Device) -> Self {
        let base = cfg.base_width.max(1);
        let (stem_conv, stem_bn) = conv_bn(3, base, 7, 2, device);
        let stem_pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut in_ch = base;
        let [l1, l2, l3, l4] = cfg.layers;
        let layer1 = make_stage(&mut in_ch, base, l1, 1, device);
        let layer2 = make_stage(&mut in_ch, base * 2, l2, 2, device);
        let layer3 = make_stage(&mut in_ch, base * 4, l3, 2, device);
        let layer4 = make_stage(&mut in_ch, base * 8, l4, 2, device);

        Self {
            stem_conv,
            stem_bn,
            stem_pool,
            layer1,
            layer2,
            layer3,
            layer4,
        }
    }

    /// `[B, 3, H, W]` preprocessed input → `[B, C, H/32, W/32]` feature map.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward_with(input, NormMode::Auto)
    }

    pub fn forward_with(&self, input: Tensor<B, 4>, mode: NormMode) -> Tensor<B, 4> {
        let x = relu(norm(&self.stem_bn, self.stem_conv.forward(input), mode));
        let mut x = self.stem_pool.forward(x);
        for block in self
            .layer1
            .iter()
            .chain(&self.layer2)
            .chain(&self.layer3)
            .chain(&self.layer4)
        {
            x = block.forward(x, mode);
        }
        x
    }
}
