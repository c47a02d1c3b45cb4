//! Shared helpers for unit tests: small synthetic images, layer stacks, and
//! approximate comparisons. Compiled only for tests.

use image::{ImageBuffer, Pixel, Rgb, Rgba};

use crate::unmixing::blend_mode::BlendMode;
use crate::unmixing::color_model::GaussianColorModel;
use crate::unmixing::comp_op::CompOp;
use crate::unmixing::layer_stack::{LayerDescriptor, LayerStack};
use crate::unmixing::{Mat3, Vec3};
use crate::Image;

/// A Gaussian layer with isotropic precision (inverse covariance `scale·I`).
pub fn gaussian_layer(mean: Vec3, comp_op: CompOp, mode: BlendMode) -> LayerDescriptor {
    LayerDescriptor::new(
        comp_op,
        mode,
        Box::new(
            GaussianColorModel::from_inverse_covariance(mean, Mat3::identity() * 100.0).unwrap(),
        ),
    )
}

/// Opaque white background with a black Normal/over foreground.
pub fn white_over_black_stack() -> LayerStack {
    LayerStack::new(vec![
        gaussian_layer(
            Vec3::new(1.0, 1.0, 1.0),
            CompOp::SOURCE_OVER,
            BlendMode::Normal,
        ),
        gaussian_layer(Vec3::zeros(), CompOp::SOURCE_OVER, BlendMode::Normal),
    ])
    .unwrap()
}

pub fn constant_rgb_image(width: u32, height: u32, rgb: [f32; 3]) -> Image<Rgb<f32>> {
    ImageBuffer::from_pixel(width, height, Rgb(rgb))
}

pub fn constant_rgba_layer(width: u32, height: u32, rgba: [f32; 4]) -> Image<Rgba<f32>> {
    ImageBuffer::from_pixel(width, height, Rgba(rgba))
}

/// Componentwise comparison with an absolute tolerance.
pub fn pixels_approx_equal<P>(expected: &P, actual: &P, tolerance: f32) -> bool
where
    P: Pixel<Subpixel = f32>,
{
    expected
        .channels()
        .iter()
        .zip(actual.channels())
        .all(|(e, a)| (e - a).abs() <= tolerance)
}

/// Pixelwise comparison of two images with an absolute tolerance.
pub fn images_approx_equal<P>(expected: &Image<P>, actual: &Image<P>, tolerance: f32) -> bool
where
    P: Pixel<Subpixel = f32>,
{
    expected.dimensions() == actual.dimensions()
        && expected
            .pixels()
            .zip(actual.pixels())
            .all(|(e, a)| pixels_approx_equal(e, a, tolerance))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approximate_comparison_respects_the_tolerance() {
        let a = constant_rgb_image(2, 2, [0.5, 0.5, 0.5]);
        let mut b = constant_rgb_image(2, 2, [0.5, 0.5, 0.5]);
        b.put_pixel(0, 0, Rgb([0.52, 0.5, 0.5]));

        assert!(images_approx_equal(&a, &b, 0.05));
        assert!(!images_approx_equal(&a, &b, 0.01));
    }

    #[test]
    fn mismatched_dimensions_never_compare_equal() {
        let a = constant_rgb_image(2, 2, [0.1, 0.2, 0.3]);
        let b = constant_rgb_image(3, 2, [0.1, 0.2, 0.3]);
        assert!(!images_approx_equal(&a, &b, 1.0));
    }
}
