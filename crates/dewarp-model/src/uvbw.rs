//! Two-branch UV / backward-warp estimator.
//!
//! A lighter design-space alternative to [`crate::UnwarpNet`]: two fully
//! independent simple-variant encoder-decoder branches estimate the UV map
//! and the backward-warp map directly from the image. No weights or features
//! are shared between the branches, and the heads are left unbounded.

use burn::prelude::*;

use crate::decoder::{Decoder, DecoderConfig};
use crate::encoder::{Encoder, EncoderConfig};
use crate::error::ModelError;

/// Configuration for [`UvBwNet`].
#[derive(Config, Debug)]
pub struct UvBwNetConfig {
    /// Channel width of the first encoder stage of each branch.
    #[config(default = "16")]
    pub base_channels: usize,
}

impl UvBwNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<UvBwNet<B>, ModelError> {
        let enc_config = EncoderConfig::simple(3).with_base_channels(self.base_channels);
        let combine = enc_config.num_stages;
        Ok(UvBwNet {
            uv_encoder: enc_config.init(device),
            uv_decoder: DecoderConfig::new(2)
                .with_combine_num(combine)
                .init(&enc_config, device)?,
            bw_encoder: enc_config.init(device),
            bw_decoder: DecoderConfig::new(2)
                .with_combine_num(combine)
                .init(&enc_config, device)?,
        })
    }
}

/// Result of a [`UvBwNet`] forward pass.
#[derive(Debug, Clone)]
pub struct UvBwOutput<B: Backend> {
    /// Texture-coordinate map `[B, 2, H, W]` (raw head output).
    pub uv: Tensor<B, 4>,
    /// Backward-warp map `[B, 2, H, W]` (raw head output).
    pub backward_warp: Tensor<B, 4>,
}

/// Independent UV and backward-warp estimation branches.
#[derive(Module, Debug)]
pub struct UvBwNet<B: Backend> {
    uv_encoder: Encoder<B>,
    uv_decoder: Decoder<B>,
    bw_encoder: Encoder<B>,
    bw_decoder: Decoder<B>,
}

impl<B: Backend> UvBwNet<B> {
    pub fn forward(&self, image: Tensor<B, 4>) -> UvBwOutput<B> {
        let (uv_features, uv_bottleneck) = self.uv_encoder.forward(image.clone());
        let (bw_features, bw_bottleneck) = self.bw_encoder.forward(image);

        let (uv, _) = self.uv_decoder.forward(&uv_features, uv_bottleneck);
        let (backward_warp, _) = self.bw_decoder.forward(&bw_features, bw_bottleneck);

        UvBwOutput { uv, backward_warp }
    }
}
