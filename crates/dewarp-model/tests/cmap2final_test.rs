use burn::tensor::{Distribution, Tensor};
use burn_ndarray::NdArray;
use dewarp_core::identity_grid;
use dewarp_model::cmap2final::dewarp_by_deformation;
use dewarp_model::{Cmap2FinalConfig, Variant};

type Backend = NdArray<f32>;

#[test]
fn test_zero_deformation_reproduces_original() {
    let device = Default::default();
    let original = Tensor::<Backend, 4>::random(
        [2, 3, 8, 8],
        Distribution::Normal(0.0, 1.0),
        &device,
    );
    let deform = Tensor::<Backend, 4>::zeros([2, 2, 8, 8], &device);

    let (bw, dewarped) = dewarp_by_deformation(deform, original.clone()).unwrap();

    let grid_diff: f32 = (bw - identity_grid::<Backend>(2, 8, 8, &device))
        .abs()
        .max()
        .into_scalar();
    assert!(grid_diff < 1e-5);

    let image_diff: f32 = (dewarped - original).abs().max().into_scalar();
    assert!(image_diff < 1e-5);
}

#[test]
fn test_forward_shapes_and_bounds() {
    let device = Default::default();
    let net = Cmap2FinalConfig::new()
        .with_variant(Variant::Simple)
        .init::<Backend>(&device)
        .unwrap();

    let x = Tensor::<Backend, 4>::random([1, 3, 16, 16], Distribution::Default, &device);
    let original = Tensor::<Backend, 4>::random([1, 3, 16, 16], Distribution::Default, &device);

    let out = net.forward(x, original).unwrap();

    assert_eq!(out.uv.dims(), [1, 2, 16, 16]);
    assert_eq!(out.albedo.dims(), [1, 1, 16, 16]);
    assert_eq!(out.deform.dims(), [1, 2, 16, 16]);
    assert_eq!(out.backward_warp.dims(), [1, 2, 16, 16]);
    assert_eq!(out.dewarped.dims(), [1, 3, 16, 16]);

    let uv_min: f32 = out.uv.clone().min().into_scalar();
    let uv_max: f32 = out.uv.max().into_scalar();
    assert!(uv_min >= -1.0 && uv_max <= 1.0);

    // Border-clamped bilinear sampling keeps values finite.
    let dewarped: Vec<f32> = out.dewarped.into_data().to_vec().unwrap();
    assert!(dewarped.iter().all(|v| v.is_finite()));
}
