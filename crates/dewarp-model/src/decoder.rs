//! Hierarchical decoder with configurable skip-connection fusion.
//!
//! The decoder mirrors its paired [`Encoder`](crate::encoder::Encoder): each
//! stage doubles the spatial resolution with a transposed convolution. The
//! `combine_num` parameter controls how many of the deepest hierarchy levels
//! are fused into the upsampling path by concatenation; stages beyond it run
//! off the upsampled activation alone, and `combine_num == 0` uses only the
//! bottleneck. This is the capacity-versus-skip-reuse axis shared by every
//! network in this crate.
//!
//! Building a decoder from the paired encoder's configuration is the only
//! way to construct one, so a variant mismatch between the two is a
//! construction-time error rather than a latent shape bug.

use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;

use crate::blocks::{ConvBlock, ConvBlockConfig};
use crate::encoder::EncoderConfig;
use crate::error::ModelError;

/// Configuration for the hierarchical decoder.
#[derive(Config, Debug, PartialEq)]
pub struct DecoderConfig {
    /// Number of output channels of the prediction head.
    pub out_channels: usize,
    /// How many of the deepest hierarchy levels are fused into the
    /// upsampling path.
    #[config(default = "0")]
    pub combine_num: usize,
}

impl DecoderConfig {
    /// Create the decoder paired with `encoder`.
    ///
    /// Fails if `combine_num` exceeds the encoder's stage count.
    pub fn init<B: Backend>(
        &self,
        encoder: &EncoderConfig,
        device: &B::Device,
    ) -> Result<Decoder<B>, ModelError> {
        if self.combine_num > encoder.num_stages {
            return Err(ModelError::InvalidConfiguration(format!(
                "combine_num {} exceeds encoder stage count {}",
                self.combine_num, encoder.num_stages
            )));
        }
        Ok(Decoder::new(self, encoder, device))
    }
}

/// Single decoder stage: upsampling, optional skip fusion, refinement.
#[derive(Module, Debug)]
pub struct DecoderStage<B: Backend> {
    upsample: ConvTranspose2d<B>,
    fusion: Option<Conv2d<B>>,
    block: ConvBlock<B>,
}

impl<B: Backend> DecoderStage<B> {
    fn new(
        in_channels: usize,
        skip_channels: Option<usize>,
        out_channels: usize,
        device: &B::Device,
    ) -> Self {
        let upsample = ConvTranspose2dConfig::new([in_channels, out_channels], [4, 4])
            .with_stride([2, 2])
            .with_padding([1, 1])
            .with_bias(false)
            .init(device);

        let fusion = skip_channels.map(|skip_ch| {
            Conv2dConfig::new([out_channels + skip_ch, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device)
        });

        let block = ConvBlockConfig::new(out_channels, out_channels).init(device);

        Self {
            upsample,
            fusion,
            block,
        }
    }

    fn forward(&self, input: Tensor<B, 4>, skip: Option<Tensor<B, 4>>) -> Tensor<B, 4> {
        let x_up = self.upsample.forward(input);

        let x = match (&self.fusion, skip) {
            (Some(fusion), Some(skip_feat)) => {
                let x_cat = Tensor::cat(vec![x_up, skip_feat], 1);
                fusion.forward(x_cat)
            }
            _ => x_up,
        };

        self.block.forward(x)
    }
}

/// Hierarchical decoder producing an output map and a decoder feature.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    stages: Vec<DecoderStage<B>>,
    head: Conv2d<B>,
    combine_num: usize,
    out_channels: usize,
    feature_channels: usize,
}

impl<B: Backend> Decoder<B> {
    fn new(config: &DecoderConfig, encoder: &EncoderConfig, device: &B::Device) -> Self {
        let enc_ch = encoder.stage_channels();
        let n = enc_ch.len();

        let mut stages = Vec::with_capacity(n);
        let mut in_ch = enc_ch[n - 1];
        for j in 0..n {
            let out_ch = enc_ch[n - 1 - j];
            let skip_ch = (j < config.combine_num).then_some(enc_ch[n - 1 - j]);
            stages.push(DecoderStage::new(in_ch, skip_ch, out_ch, device));
            in_ch = out_ch;
        }

        let head = Conv2dConfig::new([enc_ch[0], config.out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        Self {
            stages,
            head,
            combine_num: config.combine_num,
            out_channels: config.out_channels,
            feature_channels: enc_ch[0],
        }
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `features` - feature hierarchy from the paired encoder, shallowest
    ///   first
    /// * `bottleneck` - bottleneck activation from the paired encoder
    ///
    /// # Returns
    /// * output map `[batch, out_channels, H, W]` (no bounding nonlinearity;
    ///   callers apply their own)
    /// * decoder feature: the pre-head activation
    ///   `[batch, feature_channels, H, W]`
    pub fn forward(
        &self,
        features: &[Tensor<B, 4>],
        bottleneck: Tensor<B, 4>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let mut x = bottleneck;
        for (j, stage) in self.stages.iter().enumerate() {
            let skip = (j < self.combine_num)
                .then(|| features[features.len() - 1 - j].clone());
            x = stage.forward(x, skip);
        }

        let map = self.head.forward(x.clone());
        (map, x)
    }

    /// Channel width of the decoder feature.
    pub fn feature_channels(&self) -> usize {
        self.feature_channels
    }

    /// Channel width of the output map.
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncoderConfig;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_decoder_forward_with_skips() {
        let device = Default::default();
        let enc_config = EncoderConfig::simple(3);
        let encoder = enc_config.init::<TestBackend>(&device);
        let decoder = DecoderConfig::new(3)
            .with_combine_num(3)
            .init::<TestBackend>(&enc_config, &device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);
        let (features, bottleneck) = encoder.forward(input);
        let (map, feature) = decoder.forward(&features, bottleneck);

        assert_eq!(map.dims(), [2, 3, 16, 16]);
        assert_eq!(feature.dims(), [2, 16, 16, 16]);
        assert_eq!(decoder.feature_channels(), 16);
    }

    #[test]
    fn test_decoder_forward_bottleneck_only() {
        let device = Default::default();
        let enc_config = EncoderConfig::simple(3);
        let encoder = enc_config.init::<TestBackend>(&device);
        let decoder = DecoderConfig::new(1)
            .init::<TestBackend>(&enc_config, &device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        let (features, bottleneck) = encoder.forward(input);
        let (map, _) = decoder.forward(&features, bottleneck);

        assert_eq!(map.dims(), [1, 1, 16, 16]);
    }

    #[test]
    fn test_decoder_rejects_excess_combine_num() {
        let device = Default::default();
        let enc_config = EncoderConfig::simple(3);
        let result = DecoderConfig::new(1)
            .with_combine_num(5)
            .init::<TestBackend>(&enc_config, &device);

        assert!(matches!(
            result,
            Err(ModelError::InvalidConfiguration(_))
        ));
    }
}
