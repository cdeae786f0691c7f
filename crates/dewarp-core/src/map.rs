//! Image-aligned geometric map kinds and their channel contracts.
//!
//! Every map produced by the dewarping networks is a batched, image-aligned
//! tensor `[batch, channels, height, width]` whose channel count is fixed by
//! its kind. The kinds here are the single source of truth for that wiring.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// The geometric quantity a `[B, C, H, W]` tensor represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapKind {
    /// Input color image.
    Image,
    /// 3D surface-coordinate prediction.
    ThreeD,
    /// Surface-normal prediction.
    Normal,
    /// Depth prediction.
    Depth,
    /// Foreground probability.
    Mask,
    /// Reflectance prediction.
    Albedo,
    /// Texture-coordinate prediction.
    Uv,
    /// Per-pixel displacement field.
    Deform,
    /// Absolute sampling field derived from a deformation field.
    BackwardWarp,
    /// Per-pixel trust score.
    Confidence,
}

impl MapKind {
    /// Channel count contract for this kind.
    pub fn channels(&self) -> usize {
        match self {
            MapKind::Image => 3,
            MapKind::ThreeD => 3,
            MapKind::Normal => 3,
            MapKind::Depth => 1,
            MapKind::Mask => 1,
            MapKind::Albedo => 1,
            MapKind::Uv => 2,
            MapKind::Deform => 2,
            MapKind::BackwardWarp => 2,
            MapKind::Confidence => 1,
        }
    }

    /// Stable name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            MapKind::Image => "image",
            MapKind::ThreeD => "threeD",
            MapKind::Normal => "normal",
            MapKind::Depth => "depth",
            MapKind::Mask => "mask",
            MapKind::Albedo => "albedo",
            MapKind::Uv => "uv",
            MapKind::Deform => "deform",
            MapKind::BackwardWarp => "backward-warp",
            MapKind::Confidence => "confidence",
        }
    }
}

/// Validate that `tensor` satisfies the channel contract of `kind`.
pub fn expect_map<B: Backend>(tensor: &Tensor<B, 4>, kind: MapKind) -> Result<()> {
    let [_, channels, _, _] = tensor.dims();
    if channels != kind.channels() {
        return Err(CoreError::ChannelMismatch {
            kind: kind.name(),
            expected: kind.channels(),
            actual: channels,
        });
    }
    Ok(())
}

/// Normalize a network output before handing it to a geometric conversion.
///
/// Network heads emit values in model range; the warping primitives work in
/// pixel coordinates. The tag keeps call sites uniform even for kinds whose
/// normalization is the identity today.
///
/// * `Deform`: model-range displacement (`[-1, 1]` spans half the image) is
///   scaled to pixel units, per axis. Zero displacement stays zero.
/// * everything else: identity.
pub fn normalize_for_conversion<B: Backend>(tensor: Tensor<B, 4>, kind: MapKind) -> Tensor<B, 4> {
    match kind {
        MapKind::Deform => {
            let [b, _, h, w] = tensor.dims();
            let dx = tensor.clone().slice([0..b, 0..1, 0..h, 0..w]) * (w as f64 / 2.0);
            let dy = tensor.slice([0..b, 1..2, 0..h, 0..w]) * (h as f64 / 2.0);
            Tensor::cat(vec![dx, dy], 1)
        }
        _ => tensor,
    }
}
