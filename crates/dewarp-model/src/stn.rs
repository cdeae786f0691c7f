//! Affine localization head for spatial-transformer experiments.
//!
//! Regresses a bank of per-tile affine transform parameters from an encoder
//! bottleneck. This is an optional extension point: [`crate::UnwarpNet`] can
//! construct it, but does not call it during its forward pass.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;

/// Configuration for the affine localization head.
#[derive(Config, Debug)]
pub struct AffineLocalizationConfig {
    /// Channel width of the bottleneck it consumes.
    pub in_channels: usize,
    /// Hidden width of the regression head.
    #[config(default = "256")]
    pub hidden_channels: usize,
    /// Number of affine tiles regressed (6 parameters each).
    #[config(default = "25")]
    pub num_tiles: usize,
}

impl AffineLocalizationConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AffineLocalization<B> {
        // The unpadded 3x3 convolution shrinks a 4x4 bottleneck to 2x2,
        // which fixes the flattened width of the regressor.
        let conv = Conv2dConfig::new([self.in_channels, self.hidden_channels], [3, 3])
            .init(device);
        let fc1 = LinearConfig::new(self.hidden_channels * 4, self.hidden_channels).init(device);
        let fc2 = LinearConfig::new(self.hidden_channels, 6 * self.num_tiles).init(device);

        AffineLocalization {
            conv,
            fc1,
            fc2,
            act: Relu::new(),
            hidden_channels: self.hidden_channels,
        }
    }
}

/// Convolution plus fully-connected regressor over a 4x4 bottleneck.
#[derive(Module, Debug)]
pub struct AffineLocalization<B: Backend> {
    conv: Conv2d<B>,
    fc1: Linear<B>,
    fc2: Linear<B>,
    act: Relu,
    hidden_channels: usize,
}

impl<B: Backend> AffineLocalization<B> {
    /// Regress affine parameters `[batch, 6 * num_tiles]` from a
    /// `[batch, in_channels, 4, 4]` bottleneck.
    pub fn localize(&self, bottleneck: Tensor<B, 4>) -> Tensor<B, 2> {
        let [b, _, _, _] = bottleneck.dims();

        let x = self.act.forward(self.conv.forward(bottleneck));
        let x = x.reshape([b, self.hidden_channels * 4]);
        let x = self.act.forward(self.fc1.forward(x));
        // No activation on the head: affine parameters are signed.
        self.fc2.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_localize_shape() {
        let device = Default::default();
        let head = AffineLocalizationConfig::new(512).init::<TestBackend>(&device);

        let bottleneck = Tensor::<TestBackend, 4>::zeros([2, 512, 4, 4], &device);
        let params = head.localize(bottleneck);

        assert_eq!(params.dims(), [2, 150]);
    }
}
