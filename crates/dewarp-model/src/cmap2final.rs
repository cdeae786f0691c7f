//! Final-stage network: coordinate maps to dewarped image.
//!
//! One encoder feeds three independent decoders (UV, albedo, deformation).
//! The predicted deformation field is converted to a backward-warp map and
//! applied to the original image, so the dewarped result falls out of the
//! forward pass directly.

use burn::prelude::*;
use burn::tensor::activation::tanh;

use dewarp_core::{
    backward_warp, deform_to_backward_map, expect_map, normalize_for_conversion, MapKind,
};

use crate::decoder::{Decoder, DecoderConfig};
use crate::encoder::{Encoder, EncoderConfig, Variant};
use crate::error::ModelError;

/// Configuration for [`Cmap2Final`].
#[derive(Config, Debug)]
pub struct Cmap2FinalConfig {
    /// Capacity variant used by the encoder and all three decoders.
    #[config(default = "Variant::Full")]
    pub variant: Variant,
    /// Channel width of the first encoder stage.
    #[config(default = "16")]
    pub base_channels: usize,
}

impl Cmap2FinalConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Cmap2Final<B>, ModelError> {
        let enc_config = EncoderConfig::for_variant(&self.variant, 3)
            .with_base_channels(self.base_channels);
        Ok(Cmap2Final {
            encoder: enc_config.init(device),
            uv_decoder: DecoderConfig::new(2).init(&enc_config, device)?,
            albedo_decoder: DecoderConfig::new(1).init(&enc_config, device)?,
            deform_decoder: DecoderConfig::new(2).init(&enc_config, device)?,
            num_stages: self.variant.num_stages(),
        })
    }
}

/// Result of a [`Cmap2Final`] forward pass.
#[derive(Debug, Clone)]
pub struct Cmap2FinalOutput<B: Backend> {
    /// Texture-coordinate map `[B, 2, H, W]`, in `[-1, 1]`.
    pub uv: Tensor<B, 4>,
    /// Reflectance map `[B, 1, H, W]`, in `[-1, 1]`.
    pub albedo: Tensor<B, 4>,
    /// Displacement field `[B, 2, H, W]` (model range, unbounded).
    pub deform: Tensor<B, 4>,
    /// Absolute sampling field derived from the deformation.
    pub backward_warp: Tensor<B, 4>,
    /// The original image resampled by the backward-warp map.
    pub dewarped: Tensor<B, 4>,
}

/// Convert a model-range deformation field into a backward-warp map and
/// resample `original` with it.
pub fn dewarp_by_deformation<B: Backend>(
    deform: Tensor<B, 4>,
    original: Tensor<B, 4>,
) -> Result<(Tensor<B, 4>, Tensor<B, 4>), ModelError> {
    expect_map(&deform, MapKind::Deform)?;
    let pixels = normalize_for_conversion(deform, MapKind::Deform);
    let bw = deform_to_backward_map(pixels)?;
    let resampled = backward_warp(
        normalize_for_conversion(original, MapKind::Image),
        bw.clone(),
    )?;
    Ok((bw, resampled))
}

/// Encoder with UV, albedo and deformation decoders plus geometric
/// post-processing to the dewarped image.
#[derive(Module, Debug)]
pub struct Cmap2Final<B: Backend> {
    encoder: Encoder<B>,
    uv_decoder: Decoder<B>,
    albedo_decoder: Decoder<B>,
    deform_decoder: Decoder<B>,
    num_stages: usize,
}

impl<B: Backend> Cmap2Final<B> {
    /// Predict the three maps from `x` and dewarp `original` with the
    /// predicted deformation.
    ///
    /// `original` must match `x` in batch and spatial size.
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        original: Tensor<B, 4>,
    ) -> Result<Cmap2FinalOutput<B>, ModelError> {
        let [b, c, h, w] = x.dims();
        if c != 3 {
            return Err(ModelError::ChannelMismatch {
                context: "input coordinate map",
                expected: 3,
                actual: c,
            });
        }
        let factor = 1 << self.num_stages;
        if h % factor != 0 || w % factor != 0 || h < factor || w < factor {
            return Err(ModelError::Input(format!(
                "spatial size {h}x{w} must be a positive multiple of {factor}"
            )));
        }
        let [ob, _, oh, ow] = original.dims();
        if (ob, oh, ow) != (b, h, w) {
            return Err(ModelError::ShapeMismatch {
                expected: vec![b, 3, h, w],
                actual: original.dims().to_vec(),
            });
        }

        let (features, bottleneck) = self.encoder.forward(x);

        let (uv, _) = self.uv_decoder.forward(&features, bottleneck.clone());
        let uv = tanh(uv);
        let (albedo, _) = self.albedo_decoder.forward(&features, bottleneck.clone());
        let albedo = tanh(albedo);
        let (deform, _) = self.deform_decoder.forward(&features, bottleneck);

        let (bw, dewarped) = dewarp_by_deformation(deform.clone(), original)?;

        Ok(Cmap2FinalOutput {
            uv,
            albedo,
            deform,
            backward_warp: bw,
            dewarped,
        })
    }
}
