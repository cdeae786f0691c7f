//! UnwarpNet - two-stage geometry-then-texture dewarping network.
//!
//! ```text
//! Image ──► Geometry encoder ──┬─► 3D decoder ────► tanh ─► 3D map
//!                              ├─► Normal decoder ► tanh ─► normal map
//!                              ├─► Depth decoder ─► tanh ─► depth map
//!                              └─► Mask decoder ──► σ ────► mask map
//!
//! [3D | normal | depth features | image] ⊙ mask
//!        │
//!        ▼
//! Second encoder ──┬─► UV decoder ─────► tanh ─► UV map
//!                  ├─► Albedo decoder ─► tanh ─► albedo map
//!                  └─► Deform decoder (optional, unbounded)
//!
//! First-stage maps ──► constraint converters (optional) ──► consistency maps
//! ```
//!
//! A single deterministic pass; no state survives between calls. Optional
//! branches are constructed at build time and absent from the output as a
//! whole when disabled, never partially populated.

use burn::prelude::*;
use burn::tensor::activation::{sigmoid, tanh};

use crate::constraint::{ConstraintBranch, ConstraintTable};
use crate::decoder::{Decoder, DecoderConfig};
use crate::encoder::{Encoder, EncoderConfig, Variant};
use crate::error::ModelError;
use crate::stn::{AffineLocalization, AffineLocalizationConfig};

/// Reconstructed maps from the cross-modal consistency branch.
#[derive(Debug, Clone)]
pub struct ConsistencyMaps<B: Backend> {
    /// Normal map reconstructed from the 3D prediction.
    pub normal_from_three_d: Tensor<B, 4>,
    /// Depth map reconstructed from the 3D prediction.
    pub depth_from_three_d: Tensor<B, 4>,
    /// Normal map reconstructed from the depth prediction.
    pub normal_from_depth: Tensor<B, 4>,
    /// Depth map reconstructed from the normal prediction.
    pub depth_from_normal: Tensor<B, 4>,
}

/// Structured result of an [`UnwarpNet`] forward pass.
#[derive(Debug, Clone)]
pub struct UnwarpOutput<B: Backend> {
    /// Texture-coordinate map `[B, 2, H, W]`, in `[-1, 1]`.
    pub uv: Tensor<B, 4>,
    /// Surface-coordinate map `[B, 3, H, W]`, in `[-1, 1]`.
    pub three_d: Tensor<B, 4>,
    /// Surface-normal map `[B, 3, H, W]`, in `[-1, 1]`.
    pub normal: Tensor<B, 4>,
    /// Reflectance map `[B, 1, H, W]`, in `[-1, 1]`.
    pub albedo: Tensor<B, 4>,
    /// Depth map `[B, 1, H, W]`, in `[-1, 1]`.
    pub depth: Tensor<B, 4>,
    /// Foreground probability map `[B, 1, H, W]`, in `[0, 1]`.
    pub mask: Tensor<B, 4>,
    /// Consistency reconstructions, present iff the branch is enabled.
    pub consistency: Option<ConsistencyMaps<B>>,
    /// Displacement field `[B, 2, H, W]`, present iff the branch is enabled.
    pub deformation: Option<Tensor<B, 4>>,
}

/// Configuration for [`UnwarpNet`].
#[derive(Config, Debug)]
pub struct UnwarpNetConfig {
    /// Capacity variant used by every encoder/decoder submodule.
    #[config(default = "Variant::Full")]
    pub variant: Variant,
    /// Skip levels fused into the geometry decoders.
    #[config(default = "3")]
    pub combine_num: usize,
    /// Channel width of the first encoder stage.
    #[config(default = "16")]
    pub base_channels: usize,
    /// Cross-modal consistency branch; omit to disable.
    pub constraints: Option<ConstraintTable>,
    /// Whether to predict a deformation field off the second encoder.
    #[config(default = "false")]
    pub deform: bool,
    /// Whether to construct the (unwired) affine localization head.
    #[config(default = "false")]
    pub stn: bool,
}

impl UnwarpNetConfig {
    /// Create the network, validating all wiring before any forward pass.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<UnwarpNet<B>, ModelError> {
        let geo_config = EncoderConfig::for_variant(&self.variant, 3)
            .with_base_channels(self.base_channels);

        let geo_encoder = geo_config.init(device);
        let three_d_decoder = DecoderConfig::new(3)
            .with_combine_num(self.combine_num)
            .init(&geo_config, device)?;
        let normal_decoder = DecoderConfig::new(3)
            .with_combine_num(self.combine_num)
            .init(&geo_config, device)?;
        let depth_decoder = DecoderConfig::new(1)
            .with_combine_num(self.combine_num)
            .init(&geo_config, device)?;
        let mask_decoder = DecoderConfig::new(1).init(&geo_config, device)?;

        // The second stage re-encodes the three geometry decoder features
        // concatenated with the raw image, gated by the mask.
        let second_in = 3 * three_d_decoder.feature_channels() + 3;
        let second_config = EncoderConfig::for_variant(&self.variant, second_in)
            .with_base_channels(self.base_channels);
        let second_encoder = second_config.init(device);

        let uv_decoder = DecoderConfig::new(2).init(&second_config, device)?;
        let albedo_decoder = DecoderConfig::new(1).init(&second_config, device)?;
        let deform_decoder = if self.deform {
            Some(DecoderConfig::new(2).init(&second_config, device)?)
        } else {
            None
        };

        let constraints = match &self.constraints {
            Some(table) => Some(ConstraintBranch::from_table(table, device)?),
            None => None,
        };

        let stn = self
            .stn
            .then(|| AffineLocalizationConfig::new(geo_config.bottleneck_channels()).init(device));

        tracing::debug!(
            variant = ?self.variant,
            combine_num = self.combine_num,
            second_in,
            consistency = constraints.is_some(),
            deform = self.deform,
            "constructed UnwarpNet"
        );

        Ok(UnwarpNet {
            geo_encoder,
            three_d_decoder,
            normal_decoder,
            depth_decoder,
            mask_decoder,
            second_encoder,
            uv_decoder,
            albedo_decoder,
            deform_decoder,
            constraints,
            stn,
            num_stages: self.variant.num_stages(),
        })
    }
}

/// Shared-encoder dewarping network with five geometry decoders, a masked
/// second stage and optional consistency/deformation branches.
#[derive(Module, Debug)]
pub struct UnwarpNet<B: Backend> {
    geo_encoder: Encoder<B>,
    three_d_decoder: Decoder<B>,
    normal_decoder: Decoder<B>,
    depth_decoder: Decoder<B>,
    mask_decoder: Decoder<B>,
    second_encoder: Encoder<B>,
    uv_decoder: Decoder<B>,
    albedo_decoder: Decoder<B>,
    deform_decoder: Option<Decoder<B>>,
    constraints: Option<ConstraintBranch<B>>,
    stn: Option<AffineLocalization<B>>,
    num_stages: usize,
}

impl<B: Backend> UnwarpNet<B> {
    /// Single-pass evaluation of all branches.
    pub fn forward(&self, image: Tensor<B, 4>) -> Result<UnwarpOutput<B>, ModelError> {
        let [_, c, h, w] = image.dims();
        if c != 3 {
            return Err(ModelError::ChannelMismatch {
                context: "input image",
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

        // Stage one: shared geometry encoder, four decoders.
        let (gx_features, gx_bottleneck) = self.geo_encoder.forward(image.clone());

        let (three_d_map, three_d_feature) =
            self.three_d_decoder.forward(&gx_features, gx_bottleneck.clone());
        let three_d_map = tanh(three_d_map);

        let (depth_map, depth_feature) =
            self.depth_decoder.forward(&gx_features, gx_bottleneck.clone());
        let depth_map = tanh(depth_map);

        let (normal_map, normal_feature) =
            self.normal_decoder.forward(&gx_features, gx_bottleneck.clone());
        let normal_map = tanh(normal_map);

        let (mask_map, _) = self.mask_decoder.forward(&gx_features, gx_bottleneck);
        let mask_map = sigmoid(mask_map);

        // Stage two: mask-gated re-encoding of geometry features plus image.
        let geo_feature = Tensor::cat(
            vec![three_d_feature, normal_feature, depth_feature, image],
            1,
        );
        let [b, c, h, w] = geo_feature.dims();
        if c != self.second_encoder.in_channels() {
            return Err(ModelError::ChannelMismatch {
                context: "masked feature concatenation",
                expected: self.second_encoder.in_channels(),
                actual: c,
            });
        }
        // Replicate the mask across the channel dimension explicitly before
        // the elementwise gate.
        let mask_gate = mask_map.clone().expand([b, c, h, w]);
        let gated = geo_feature * mask_gate;

        let (sec_features, sec_bottleneck) = self.second_encoder.forward(gated);

        let deformation = self
            .deform_decoder
            .as_ref()
            .map(|decoder| decoder.forward(&sec_features, sec_bottleneck.clone()).0);

        let (uv_map, _) = self.uv_decoder.forward(&sec_features, sec_bottleneck.clone());
        let uv_map = tanh(uv_map);

        let (albedo_map, _) = self.albedo_decoder.forward(&sec_features, sec_bottleneck);
        let albedo_map = tanh(albedo_map);

        // Consistency branch off the first-stage geometry predictions.
        let consistency = self.constraints.as_ref().map(|branch| {
            branch.forward(three_d_map.clone(), normal_map.clone(), depth_map.clone())
        });

        Ok(UnwarpOutput {
            uv: uv_map,
            three_d: three_d_map,
            normal: normal_map,
            albedo: albedo_map,
            depth: depth_map,
            mask: mask_map,
            consistency,
            deformation,
        })
    }

    /// The optional affine localization head, if configured.
    ///
    /// Not invoked by [`Self::forward`]; kept as an extension point.
    pub fn localization(&self) -> Option<&AffineLocalization<B>> {
        self.stn.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn simple_config() -> UnwarpNetConfig {
        UnwarpNetConfig::new()
            .with_variant(Variant::Simple)
            .with_combine_num(3)
    }

    #[test]
    fn test_excess_combine_num_is_rejected() {
        let device = Default::default();
        let result = simple_config()
            .with_combine_num(5)
            .init::<TestBackend>(&device);
        assert!(matches!(result, Err(ModelError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_non_image_input_is_rejected() {
        let device = Default::default();
        let net = simple_config().init::<TestBackend>(&device).unwrap();

        let gray = Tensor::<TestBackend, 4>::zeros([1, 1, 16, 16], &device);
        assert!(matches!(
            net.forward(gray),
            Err(ModelError::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn test_indivisible_spatial_size_is_rejected() {
        let device = Default::default();
        let net = simple_config().init::<TestBackend>(&device).unwrap();

        let image = Tensor::<TestBackend, 4>::zeros([1, 3, 24, 24], &device);
        assert!(matches!(net.forward(image), Err(ModelError::Input(_))));
    }

    #[test]
    fn test_disabled_branches_are_absent() {
        let device = Default::default();
        let net = simple_config().init::<TestBackend>(&device).unwrap();

        let image = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        let output = net.forward(image).unwrap();

        assert!(output.consistency.is_none());
        assert!(output.deformation.is_none());
        assert!(net.localization().is_none());
    }

    #[test]
    fn test_deform_without_consistency() {
        let device = Default::default();
        let net = simple_config()
            .with_deform(true)
            .init::<TestBackend>(&device)
            .unwrap();

        let image = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        let output = net.forward(image).unwrap();

        assert!(output.consistency.is_none());
        assert_eq!(output.deformation.unwrap().dims(), [1, 2, 16, 16]);
        assert_eq!(output.mask.dims(), [1, 1, 16, 16]);
    }

    #[test]
    fn test_stn_head_is_constructed_but_unwired() {
        let device = Default::default();
        let net = simple_config()
            .with_stn(true)
            .init::<TestBackend>(&device)
            .unwrap();
        assert!(net.localization().is_some());
    }
}
