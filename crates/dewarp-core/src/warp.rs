//! Warping primitives: deformation-field conversion and backward-warp
//! resampling.
//!
//! A backward-warp map stores, for every output pixel, the absolute source
//! coordinate to sample from, as `(x, y)` pixel coordinates in channels 0 and
//! 1. Sampling is bilinear with border clamping and stays differentiable with
//! respect to the input image.

use burn::prelude::*;

use crate::error::{CoreError, Result};
use crate::map::{expect_map, MapKind};

/// Identity sampling field `[batch, 2, height, width]`.
///
/// Sampling an image with this grid reproduces the image.
pub fn identity_grid<B: Backend>(
    batch: usize,
    height: usize,
    width: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    let x = Tensor::arange(0..width as i64, device)
        .float()
        .reshape([1, 1, 1, width])
        .expand([batch, 1, height, width]);
    let y = Tensor::arange(0..height as i64, device)
        .float()
        .reshape([1, 1, height, 1])
        .expand([batch, 1, height, width]);
    Tensor::cat(vec![x, y], 1)
}

/// Convert a pixel-unit displacement field into an absolute backward-warp map.
///
/// The identity coordinate ramps are broadcast instead of materialized, so no
/// full grid allocation happens per call.
pub fn deform_to_backward_map<B: Backend>(deform: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
    expect_map(&deform, MapKind::Deform)?;
    let [b, _, h, w] = deform.dims();
    let device = deform.device();

    let dx = deform.clone().slice([0..b, 0..1, 0..h, 0..w]);
    let dy = deform.slice([0..b, 1..2, 0..h, 0..w]);

    let x_range = Tensor::arange(0..w as i64, &device)
        .float()
        .reshape([1, 1, 1, w]);
    let y_range = Tensor::arange(0..h as i64, &device)
        .float()
        .reshape([1, 1, h, 1]);

    Ok(Tensor::cat(vec![dx + x_range, dy + y_range], 1))
}

/// Resample `image` at the coordinates of a backward-warp map.
///
/// Bilinear interpolation over the four neighbouring pixels; coordinates
/// outside the image are clamped to the border.
pub fn backward_warp<B: Backend>(image: Tensor<B, 4>, bw: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
    expect_map(&bw, MapKind::BackwardWarp)?;
    let [b, c, h, w] = image.dims();
    let [bw_b, _, bw_h, bw_w] = bw.dims();
    if (bw_b, bw_h, bw_w) != (b, h, w) {
        return Err(CoreError::ShapeMismatch {
            expected: vec![b, 2, h, w],
            actual: vec![bw_b, 2, bw_h, bw_w],
        });
    }

    let x = bw.clone().slice([0..b, 0..1, 0..h, 0..w]);
    let y = bw.slice([0..b, 1..2, 0..h, 0..w]);

    let x0 = x.clone().floor();
    let y0 = y.clone().floor();
    let wx = x - x0.clone();
    let wy = y - y0.clone();
    let x1 = x0.clone() + 1.0;
    let y1 = y0.clone() + 1.0;

    // Clamp indices to valid range.
    let x0_i = x0.clamp(0.0, (w - 1) as f64).int();
    let x1_i = x1.clamp(0.0, (w - 1) as f64).int();
    let y0_i = y0.clamp(0.0, (h - 1) as f64).int();
    let y1_i = y1.clamp(0.0, (h - 1) as f64).int();

    // Pre-flatten the spatial dimensions for gathering.
    let flat = image.reshape([b, c, h * w]);

    let v00 = gather_pixels(&flat, &x0_i, &y0_i, h, w);
    let v10 = gather_pixels(&flat, &x1_i, &y0_i, h, w);
    let v01 = gather_pixels(&flat, &x0_i, &y1_i, h, w);
    let v11 = gather_pixels(&flat, &x1_i, &y1_i, h, w);

    // Interpolation weights, replicated across the channel dimension.
    let wx = wx.expand([b, c, h, w]);
    let wy = wy.expand([b, c, h, w]);
    let one_minus_wx = wx.clone().neg() + 1.0;
    let one_minus_wy = wy.clone().neg() + 1.0;

    // Interpolate along x, then y.
    let top = v00 * one_minus_wx.clone() + v10 * wx.clone();
    let bottom = v01 * one_minus_wx + v11 * wx;

    Ok(top * one_minus_wy + bottom * wy)
}

fn gather_pixels<B: Backend>(
    flat: &Tensor<B, 3>,
    xi: &Tensor<B, 4, Int>,
    yi: &Tensor<B, 4, Int>,
    h: usize,
    w: usize,
) -> Tensor<B, 4> {
    let [b, c, _] = flat.dims();
    let idx = yi.clone().mul_scalar(w as i64) + xi.clone();
    let idx = idx.reshape([b, 1, h * w]).expand([b, c, h * w]);
    flat.clone().gather(2, idx).reshape([b, c, h, w])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Distribution, TensorData};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_identity_grid_reproduces_image() {
        let device = Default::default();
        let image = Tensor::<TestBackend, 4>::random(
            [2, 3, 8, 6],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let grid = identity_grid::<TestBackend>(2, 8, 6, &device);

        let warped = backward_warp(image.clone(), grid).unwrap();
        let diff: f32 = (warped - image).abs().max().into_scalar();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_zero_deform_is_identity_grid() {
        let device = Default::default();
        let deform = Tensor::<TestBackend, 4>::zeros([1, 2, 4, 5], &device);
        let bw = deform_to_backward_map(deform).unwrap();
        let grid = identity_grid::<TestBackend>(1, 4, 5, &device);

        let diff: f32 = (bw - grid).abs().max().into_scalar();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_unit_shift_samples_neighbour() {
        let device = Default::default();
        // Single row of three pixels: [1, 2, 3].
        let image = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0], [1, 1, 1, 3]),
            &device,
        );
        // Shift by +1 pixel in x: each output samples its right neighbour,
        // the last column clamps to the border.
        let shift = Tensor::cat(
            vec![
                Tensor::<TestBackend, 4>::ones([1, 1, 1, 3], &device),
                Tensor::<TestBackend, 4>::zeros([1, 1, 1, 3], &device),
            ],
            1,
        );
        let bw = deform_to_backward_map(shift).unwrap();

        let warped = backward_warp(image, bw).unwrap();
        let data: Vec<f32> = warped.into_data().to_vec().unwrap();
        assert_eq!(data, vec![2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_fractional_shift_interpolates() {
        let device = Default::default();
        let image = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.0f32, 1.0], [1, 1, 1, 2]),
            &device,
        );
        let half_shift = Tensor::cat(
            vec![
                Tensor::<TestBackend, 4>::ones([1, 1, 1, 2], &device) * 0.5,
                Tensor::<TestBackend, 4>::zeros([1, 1, 1, 2], &device),
            ],
            1,
        );
        let bw = deform_to_backward_map(half_shift).unwrap();

        let warped = backward_warp(image, bw).unwrap();
        let data: Vec<f32> = warped.into_data().to_vec().unwrap();
        assert!((data[0] - 0.5).abs() < 1e-6);
        // x = 1.5 clamps both neighbours to the last column.
        assert!((data[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_backward_warp_rejects_wrong_channels() {
        let device = Default::default();
        let image = Tensor::<TestBackend, 4>::zeros([1, 3, 4, 4], &device);
        let not_a_grid = Tensor::<TestBackend, 4>::zeros([1, 3, 4, 4], &device);
        assert!(backward_warp(image, not_a_grid).is_err());
    }

    #[test]
    fn test_backward_warp_rejects_spatial_mismatch() {
        let device = Default::default();
        let image = Tensor::<TestBackend, 4>::zeros([1, 3, 4, 4], &device);
        let grid = identity_grid::<TestBackend>(1, 8, 8, &device);
        assert!(matches!(
            backward_warp(image, grid),
            Err(CoreError::ShapeMismatch { .. })
        ));
    }
}
