//! Spatial resizing with explicit corner alignment.
//!
//! Nearest-neighbour and corner-aligned bilinear resizing go through Burn's
//! `interpolate`. Burn has no half-pixel bilinear kernel, so that case is
//! separable: each spatial axis gets an interpolation matrix built on the host,
//! and the image is multiplied on both sides (`Wh · X · Wwᵀ`). The result stays
//! differentiable with respect to `X`.

use burn::tensor::{
    backend::Backend,
    module::interpolate,
    ops::{InterpolateMode, InterpolateOptions},
    Int, Tensor, TensorData,
};
use serde::{Deserialize, Serialize};

/// Interpolation kernel used by [`resize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeMode {
    /// Nearest neighbour (`floor(dst * in / out)`).
    Nearest,
    /// Bilinear interpolation.
    Bilinear,
}

/// Resizes `input` `[B, C, H, W]` to `size = [H', W']`.
///
/// `align_corners` only affects [`ResizeMode::Bilinear`].
pub fn resize<B: Backend>(
    input: Tensor<B, 4>,
    size: [usize; 2],
    mode: ResizeMode,
    align_corners: bool,
) -> Tensor<B, 4> {
    let [_, _, height, width] = input.dims();
    if [height, width] == size {
        return input;
    }

    match (mode, align_corners) {
        (ResizeMode::Nearest, _) => {
            interpolate(input, size, InterpolateOptions::new(InterpolateMode::Nearest))
        }
        (ResizeMode::Bilinear, true) => {
            interpolate(input, size, InterpolateOptions::new(InterpolateMode::Bilinear))
        }
        (ResizeMode::Bilinear, false) => resize_half_pixel(input, size),
    }
}

/// Nearest-neighbour resize of an integer label map `[B, H, W]`.
pub fn resize_labels<B: Backend>(labels: Tensor<B, 3, Int>, size: [usize; 2]) -> Tensor<B, 3, Int> {
    let [batch_size, height, width] = labels.dims();
    if [height, width] == size {
        return labels;
    }

    let resized = resize(
        labels.float().reshape([batch_size, 1, height, width]),
        size,
        ResizeMode::Nearest,
        false,
    );

    // nearest sampling copies input labels, rounding only undoes float error
    resized.reshape([batch_size, size[0], size[1]]).round().int()
}

/// Bilinear resize with half-pixel centres and edge clamping.
fn resize_half_pixel<B: Backend>(input: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [batch_size, channels, height, width] = input.dims();
    let [out_height, out_width] = size;
    let device = input.device();
    let planes = batch_size * channels;

    let rows = half_pixel_matrix::<B>(height, out_height, &device)
        .unsqueeze::<3>()
        .expand([planes, out_height, height]);
    let cols = half_pixel_matrix::<B>(width, out_width, &device)
        .transpose()
        .unsqueeze::<3>()
        .expand([planes, width, out_width]);

    rows.matmul(input.reshape([planes, height, width]))
        .matmul(cols)
        .reshape([batch_size, channels, out_height, out_width])
}

/// Builds the `[out, in]` matrix mapping an axis of length `input` to `output`.
fn half_pixel_matrix<B: Backend>(input: usize, output: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut weights = vec![0.0f32; output * input];

    for dst in 0..output {
        let row = &mut weights[dst * input..(dst + 1) * input];
        let src = source_coordinate(dst, input, output);
        let low = (src.floor() as usize).min(input - 1);
        let high = (low + 1).min(input - 1);
        let frac = (src - low as f64) as f32;
        row[low] += 1.0 - frac;
        row[high] += frac;
    }

    Tensor::from_data(TensorData::new(weights, [output, input]), device)
}

fn source_coordinate(dst: usize, input: usize, output: usize) -> f64 {
    let scale = input as f64 / output as f64;
    ((dst as f64 + 0.5) * scale - 0.5).max(0.0)
}

#[cfg(test)]
mod tests {
    use burn::tensor::Tolerance;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn resize_same_size_is_identity() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::from_floats([[[[1.0, 2.0], [3.0, 4.0]]]], &device);

        let output = resize(input.clone(), [2, 2], ResizeMode::Bilinear, false);

        output.into_data().assert_eq(&input.into_data(), true);
    }

    #[test]
    fn resize_bilinear_align_corners_upsamples_linearly() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::from_floats([[[[0.0, 2.0]]]], &device);

        let output = resize(input, [1, 3], ResizeMode::Bilinear, true);

        output.into_data().assert_approx_eq::<f32>(
            &TensorData::from([[[[0.0, 1.0, 2.0]]]]),
            Tolerance::default(),
        );
    }

    #[test]
    fn resize_bilinear_half_pixel_upsamples_with_edge_clamp() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::from_floats([[[[0.0, 4.0]]]], &device);

        // src = (dst + 0.5) / 2 - 0.5 -> [0, 0.25, 0.75, 1.25 (clamped to 1)]
        let output = resize(input, [1, 4], ResizeMode::Bilinear, false);

        output.into_data().assert_approx_eq::<f32>(
            &TensorData::from([[[[0.0, 1.0, 3.0, 4.0]]]]),
            Tolerance::default(),
        );
    }

    #[test]
    fn resize_bilinear_downsample_averages_neighbours() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::from_floats([[[[0.0, 2.0, 4.0, 6.0]]]], &device);

        let output = resize(input, [1, 2], ResizeMode::Bilinear, false);

        output.into_data().assert_approx_eq::<f32>(
            &TensorData::from([[[[1.0, 5.0]]]]),
            Tolerance::default(),
        );
    }

    #[test]
    fn resize_nearest_downsample_takes_floor_source() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::from_floats(
            [[[[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]]]],
            &device,
        );

        // src = floor(dst * 6 / 4) -> [0, 1, 3, 4]
        let output = resize(input, [1, 4], ResizeMode::Nearest, false);

        output
            .into_data()
            .assert_eq(&TensorData::from([[[[0.0f32, 1.0, 3.0, 4.0]]]]), false);
    }

    #[test]
    fn resize_labels_nearest_keeps_label_values() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 3, Int>::from_ints([[[3, -1], [0, 2]]], &device);

        let up = resize_labels(labels.clone(), [4, 4]);
        let down = resize_labels(up.clone(), [2, 2]);

        assert_eq!(up.dims(), [1, 4, 4]);
        up.into_data().assert_eq(
            &TensorData::from([[
                [3i64, 3, -1, -1],
                [3, 3, -1, -1],
                [0, 0, 2, 2],
                [0, 0, 2, 2],
            ]]),
            false,
        );
        down.into_data().assert_eq(&labels.into_data(), false);
    }
}
