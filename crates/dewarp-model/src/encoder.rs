//! Hierarchical image encoder.
//!
//! The encoder progressively downsamples its input while keeping the
//! pre-downsampling activation of every stage as a skip connection for a
//! paired [`Decoder`](crate::decoder::Decoder).
//!
//! ```text
//! Input: [batch, C_in, H, W]
//!          │
//!          ▼
//!    ┌─────────────┐
//!    │   Stage 0   │──► Skip 0: [batch, base, H, W]
//!    └─────────────┘
//!          │ downsample
//!          ▼
//!    ┌─────────────┐
//!    │   Stage 1   │──► Skip 1: [batch, 2*base, H/2, W/2]
//!    └─────────────┘
//!          │ downsample
//!          ▼
//!         ...
//!          │
//!          ▼
//!    Bottleneck: [batch, base * 2^(n-1), H/2^n, W/2^n]
//! ```
//!
//! Two capacity variants exist system-wide: `Full` (6 stages) and `Simple`
//! (4 stages). A network instance must use one variant consistently across
//! all its encoder/decoder submodules.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;

use crate::blocks::{ConvBlock, ConvBlockConfig};

/// System-wide capacity variant.
#[derive(Config, Debug, PartialEq)]
pub enum Variant {
    /// Six downsampling stages.
    Full,
    /// Four downsampling stages, smaller receptive field.
    Simple,
}

impl Variant {
    /// Number of downsampling stages for this variant.
    pub fn num_stages(&self) -> usize {
        match self {
            Variant::Full => 6,
            Variant::Simple => 4,
        }
    }
}

/// Configuration for the hierarchical encoder.
#[derive(Config, Debug, PartialEq)]
pub struct EncoderConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Channel width of the first stage.
    #[config(default = "16")]
    pub base_channels: usize,
    /// Channel multiplier between stages.
    #[config(default = "2")]
    pub channel_mult: usize,
    /// Number of downsampling stages.
    #[config(default = "6")]
    pub num_stages: usize,
}

impl EncoderConfig {
    /// Full-capacity variant (6 stages).
    pub fn full(in_channels: usize) -> Self {
        Self::new(in_channels)
    }

    /// Simple variant (4 stages).
    pub fn simple(in_channels: usize) -> Self {
        Self::new(in_channels).with_num_stages(4)
    }

    /// Configuration for a named capacity variant.
    pub fn for_variant(variant: &Variant, in_channels: usize) -> Self {
        Self::new(in_channels).with_num_stages(variant.num_stages())
    }

    /// Channel widths of each stage.
    pub fn stage_channels(&self) -> Vec<usize> {
        let mut channels = Vec::with_capacity(self.num_stages);
        let mut ch = self.base_channels;
        for _ in 0..self.num_stages {
            channels.push(ch);
            ch *= self.channel_mult;
        }
        channels
    }

    /// Channel width of the bottleneck.
    pub fn bottleneck_channels(&self) -> usize {
        self.stage_channels().last().copied().unwrap_or(0)
    }

    /// Total spatial downsampling factor; input height and width must be
    /// divisible by this.
    pub fn downsample_factor(&self) -> usize {
        1 << self.num_stages
    }

    /// Create the encoder.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Encoder<B> {
        Encoder::new(self, device)
    }
}

/// Single encoder stage: feature block followed by stride-2 downsampling.
#[derive(Module, Debug)]
pub struct EncoderStage<B: Backend> {
    block: ConvBlock<B>,
    downsample: Conv2d<B>,
}

impl<B: Backend> EncoderStage<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let block = ConvBlockConfig::new(in_channels, out_channels).init(device);
        let downsample = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        Self { block, downsample }
    }

    /// Returns the pre-downsampling features and the downsampled output.
    fn forward(&self, input: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let features = self.block.forward(input);
        let output = self.downsample.forward(features.clone());
        (features, output)
    }
}

/// Hierarchical encoder producing a feature hierarchy and a bottleneck.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    stages: Vec<EncoderStage<B>>,
    num_stages: usize,
    in_channels: usize,
    #[module(ignore)]
    stage_channels: Vec<usize>,
}

impl<B: Backend> Encoder<B> {
    fn new(config: &EncoderConfig, device: &B::Device) -> Self {
        let stage_channels = config.stage_channels();

        let mut stages = Vec::with_capacity(config.num_stages);
        let mut in_ch = config.in_channels;
        for &out_ch in &stage_channels {
            stages.push(EncoderStage::new(in_ch, out_ch, device));
            in_ch = out_ch;
        }

        Self {
            stages,
            num_stages: config.num_stages,
            in_channels: config.in_channels,
            stage_channels,
        }
    }

    /// Forward pass.
    ///
    /// # Returns
    /// * features: pre-downsampling activation of every stage, shallowest
    ///   first (`features[i]` has `stage_channels[i]` channels at `H/2^i`)
    /// * bottleneck: the most downsampled activation
    pub fn forward(&self, input: Tensor<B, 4>) -> (Vec<Tensor<B, 4>>, Tensor<B, 4>) {
        let mut x = input;
        let mut features = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let (feat, out) = stage.forward(x);
            features.push(feat);
            x = out;
        }

        (features, x)
    }

    /// Channel widths of each stage.
    pub fn stage_channels(&self) -> &[usize] {
        &self.stage_channels
    }

    /// Number of downsampling stages.
    pub fn num_stages(&self) -> usize {
        self.num_stages
    }

    /// Number of input channels this encoder was built for.
    pub fn in_channels(&self) -> usize {
        self.in_channels
    }
}
