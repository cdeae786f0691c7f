//! Per-pixel confidence discriminator and its training losses.
//!
//! One encoder-decoder pair is evaluated twice with shared weights: once on
//! the dewarped image and once on the real image. The adversarial term pushes
//! confidence toward 0 on dewarped input and 1 on real input; the
//! reconstruction term is the per-pixel squared error between the two images
//! weighted by the inverse confidence, so regions the discriminator trusts
//! least are penalized hardest.

use burn::module::Ignored;
use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;

use crate::decoder::{Decoder, DecoderConfig};
use crate::encoder::{Encoder, EncoderConfig};
use crate::error::ModelError;

/// Floor applied to non-positive confidence values before inversion.
pub const CONFIDENCE_FLOOR: f64 = 0.01;

/// How the raw decoder output is turned into a confidence map.
///
/// The original design left calibration unresolved; it is a configuration
/// choice here rather than a hard-coded guess.
#[derive(Config, Debug, PartialEq)]
pub enum ConfidenceActivation {
    /// Raw regression output.
    Raw,
    /// Sigmoid-calibrated probability in `[0, 1]`.
    Sigmoid,
}

/// Configuration for [`ConfDiscriminator`].
#[derive(Config, Debug)]
pub struct ConfDiscriminatorConfig {
    #[config(default = "ConfidenceActivation::Raw")]
    pub confidence_activation: ConfidenceActivation,
    /// Channel width of the first encoder stage.
    #[config(default = "16")]
    pub base_channels: usize,
}

impl ConfDiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ConfDiscriminator<B>, ModelError> {
        let enc_config = EncoderConfig::simple(3).with_base_channels(self.base_channels);
        let combine = enc_config.num_stages;
        Ok(ConfDiscriminator {
            encoder: enc_config.init(device),
            decoder: DecoderConfig::new(1)
                .with_combine_num(combine)
                .init(&enc_config, device)?,
            confidence_activation: Ignored(self.confidence_activation.clone()),
        })
    }
}

/// Loss terms produced by one discriminator evaluation.
#[derive(Debug, Clone)]
pub struct DiscriminatorLosses<B: Backend> {
    /// Sum of the two MSE terms against the constant confidence targets.
    pub adversarial: Tensor<B, 1>,
    /// Confidence-weighted reconstruction penalty.
    pub reconstruction: Tensor<B, 1>,
}

/// Inverse-confidence weights with the division singularity clamped out.
///
/// Non-positive confidence values are floored at [`CONFIDENCE_FLOOR`] before
/// inversion, so the weights stay finite for any input.
pub fn inverse_confidence_weights<B: Backend>(confidence: Tensor<B, 4>) -> Tensor<B, 4> {
    let floored = confidence
        .clone()
        .mask_fill(confidence.lower_equal_elem(0.0), CONFIDENCE_FLOOR);
    floored.recip()
}

/// Shared-weight encoder-decoder confidence estimator.
#[derive(Module, Debug)]
pub struct ConfDiscriminator<B: Backend> {
    encoder: Encoder<B>,
    decoder: Decoder<B>,
    confidence_activation: Ignored<ConfidenceActivation>,
}

impl<B: Backend> ConfDiscriminator<B> {
    /// Confidence map `[B, 1, H, W]` for one image.
    pub fn confidence(&self, image: Tensor<B, 4>) -> Tensor<B, 4> {
        let (features, bottleneck) = self.encoder.forward(image);
        let (conf, _) = self.decoder.forward(&features, bottleneck);
        match &*self.confidence_activation {
            ConfidenceActivation::Raw => conf,
            ConfidenceActivation::Sigmoid => sigmoid(conf),
        }
    }

    /// Evaluate both images and compute the two loss terms.
    ///
    /// The images must agree in every dimension; a mismatch is fatal.
    pub fn forward(
        &self,
        real: Tensor<B, 4>,
        dewarped: Tensor<B, 4>,
    ) -> Result<DiscriminatorLosses<B>, ModelError> {
        if real.dims() != dewarped.dims() {
            return Err(ModelError::ShapeMismatch {
                expected: real.dims().to_vec(),
                actual: dewarped.dims().to_vec(),
            });
        }

        let conf_dewarped = self.confidence(dewarped.clone());
        let conf_real = self.confidence(real.clone());

        // Constant targets shaped exactly like the confidence maps.
        let [cb, _, ch, cw] = conf_dewarped.dims();
        let device = conf_dewarped.device();
        let zeros = Tensor::zeros([cb, 1, ch, cw], &device);
        let ones = Tensor::ones([cb, 1, ch, cw], &device);

        let mse = MseLoss::new();
        let adversarial = mse.forward(conf_dewarped.clone(), zeros, Reduction::Mean)
            + mse.forward(conf_real, ones, Reduction::Mean);

        // Trust-weighted reconstruction: inverse confidence, replicated
        // across the image channels before the elementwise product.
        let weights = inverse_confidence_weights(conf_dewarped);
        let [b, c, h, w] = real.dims();
        let weights = weights.expand([b, c, h, w]);
        let reconstruction = (mse.forward_no_reduction(real, dewarped) * weights).mean();

        Ok(DiscriminatorLosses {
            adversarial,
            reconstruction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_confidence_shape() {
        let device = Default::default();
        let disc = ConfDiscriminatorConfig::new()
            .init::<TestBackend>(&device)
            .unwrap();

        let image = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);
        assert_eq!(disc.confidence(image).dims(), [2, 1, 16, 16]);
    }

    #[test]
    fn test_identical_images() {
        let device = Default::default();
        let disc = ConfDiscriminatorConfig::new()
            .init::<TestBackend>(&device)
            .unwrap();

        let image = Tensor::<TestBackend, 4>::ones([2, 3, 16, 16], &device);
        let losses = disc.forward(image.clone(), image).unwrap();

        // Sum of two MSE terms: non-negative and finite.
        let adversarial: f32 = losses.adversarial.into_scalar();
        assert!(adversarial >= 0.0);
        assert!(adversarial.is_finite());

        // Identical images leave nothing to reconstruct.
        let reconstruction: f32 = losses.reconstruction.into_scalar();
        assert!(reconstruction.abs() < 1e-6);
    }

    #[test]
    fn test_inverse_weights_clamp_floor() {
        let device = Default::default();
        let confidence = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.0f32, -5.0, 0.5, 1.0], [1, 1, 2, 2]),
            &device,
        );

        let weights = inverse_confidence_weights(confidence);
        let data: Vec<f32> = weights.into_data().to_vec().unwrap();

        // 0.0 and -5.0 are both floored at 0.01 before inversion.
        assert!((data[0] - 100.0).abs() < 1e-3);
        assert!((data[1] - 100.0).abs() < 1e-3);
        assert!((data[2] - 2.0).abs() < 1e-5);
        assert!((data[3] - 1.0).abs() < 1e-5);
        assert!(data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_mismatched_batches_are_rejected() {
        let device = Default::default();
        let disc = ConfDiscriminatorConfig::new()
            .init::<TestBackend>(&device)
            .unwrap();

        let real = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);
        let dewarped = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        assert!(matches!(
            disc.forward(real, dewarped),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_sigmoid_calibration_bounds_confidence() {
        let device = Default::default();
        let disc = ConfDiscriminatorConfig::new()
            .with_confidence_activation(ConfidenceActivation::Sigmoid)
            .init::<TestBackend>(&device)
            .unwrap();

        let image = Tensor::<TestBackend, 4>::random(
            [1, 3, 16, 16],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let conf = disc.confidence(image);
        let min: f32 = conf.clone().min().into_scalar();
        let max: f32 = conf.max().into_scalar();
        assert!(min >= 0.0 && max <= 1.0);
    }
}
