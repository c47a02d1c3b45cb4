//! Edge-preserving matte smoothing.
//!
//! Implements the guided filter with a color guidance image. The per-layer
//! alpha mattes produced by the per-pixel solver are smoothed under the
//! guidance of the original input so that matte edges stay aligned with
//! image edges. Box filtering runs on a summed-area table, so the cost is
//! independent of the radius.

use image::{ImageBuffer, Luma, Rgb};
use imageproc::map::{map_colors, map_colors2};
use nalgebra::{Matrix3, Vector3};

use crate::error::GuidedFilterError;
use crate::Image;

/// Mean filter over a `(2·radius + 1)²` window via a summed-area table.
///
/// Windows are clamped to the image border and each output is divided by the
/// actual window area, so constant inputs pass through unchanged.
pub fn box_filter(image: &Image<Luma<f32>>, radius: u32) -> Image<Luma<f32>> {
    let (width, height) = image.dimensions();
    let r = radius as i64;

    // sat[(y + 1) * (width + 1) + (x + 1)] holds the inclusive prefix sum.
    let stride = width as usize + 1;
    let mut sat = vec![0.0f64; stride * (height as usize + 1)];
    for y in 0..height as usize {
        let mut row_sum = 0.0f64;
        for x in 0..width as usize {
            row_sum += f64::from(image.get_pixel(x as u32, y as u32)[0]);
            sat[(y + 1) * stride + x + 1] = sat[y * stride + x + 1] + row_sum;
        }
    }

    ImageBuffer::from_fn(width, height, |x, y| {
        let x0 = (i64::from(x) - r).max(0) as usize;
        let y0 = (i64::from(y) - r).max(0) as usize;
        let x1 = (i64::from(x) + r + 1).min(i64::from(width)) as usize;
        let y1 = (i64::from(y) + r + 1).min(i64::from(height)) as usize;

        let sum = sat[y1 * stride + x1] - sat[y0 * stride + x1] - sat[y1 * stride + x0]
            + sat[y0 * stride + x0];
        let area = ((x1 - x0) * (y1 - y0)) as f64;
        Luma([(sum / area) as f32])
    })
}

/// Guided filter with an RGB guidance image.
///
/// Precomputes the guidance statistics once so that several inputs (one
/// matte per layer) can be filtered against the same guidance cheaply.
pub struct GuidedFilterColor {
    guidance: Image<Rgb<f32>>,
    radius: u32,
    guidance_mean: [Image<Luma<f32>>; 3],
    // Row-major per-pixel inverse of the regularized guidance covariance.
    inv_cov: Vec<Matrix3<f32>>,
}

impl GuidedFilterColor {
    /// Precomputes guidance means and inverse covariances.
    ///
    /// # Errors
    ///
    /// Returns [`GuidedFilterError::InvalidRadius`] when `radius` is zero and
    /// [`GuidedFilterError::InvalidEpsilon`] when `epsilon` is not positive.
    pub fn new(
        guidance: &Image<Rgb<f32>>,
        radius: u32,
        epsilon: f32,
    ) -> Result<Self, GuidedFilterError> {
        if radius == 0 {
            return Err(GuidedFilterError::InvalidRadius { radius });
        }
        if epsilon <= 0.0 {
            return Err(GuidedFilterError::InvalidEpsilon { epsilon });
        }

        let (width, height) = guidance.dimensions();
        let channels = split_channels(guidance);
        let channel_means = [
            box_filter(&channels[0], radius),
            box_filter(&channels[1], radius),
            box_filter(&channels[2], radius),
        ];

        // E[I_i I_j] for the six distinct channel pairs.
        let pairs = [(0, 0), (0, 1), (0, 2), (1, 1), (1, 2), (2, 2)];
        let pair_means: Vec<Image<Luma<f32>>> = pairs
            .iter()
            .map(|&(i, j)| {
                let product =
                    map_colors2(&channels[i], &channels[j], |a, b| Luma([a[0] * b[0]]));
                box_filter(&product, radius)
            })
            .collect();

        let mut inv_cov = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                let mean = Vector3::new(
                    channel_means[0].get_pixel(x, y)[0],
                    channel_means[1].get_pixel(x, y)[0],
                    channel_means[2].get_pixel(x, y)[0],
                );
                let mut cov = Matrix3::zeros();
                for (index, &(i, j)) in pairs.iter().enumerate() {
                    let value = pair_means[index].get_pixel(x, y)[0] - mean[i] * mean[j];
                    cov[(i, j)] = value;
                    cov[(j, i)] = value;
                }
                cov += Matrix3::identity() * epsilon;
                // The epsilon-regularized covariance is positive definite in
                // exact arithmetic; a degenerate window falls back to zero
                // coefficients, which reduces the output to the local mean.
                inv_cov.push(cov.try_inverse().unwrap_or_else(Matrix3::zeros));
            }
        }

        Ok(GuidedFilterColor {
            guidance: guidance.clone(),
            radius,
            guidance_mean: channel_means,
            inv_cov,
        })
    }

    /// Filters one scalar input under the stored guidance.
    ///
    /// # Errors
    ///
    /// Returns [`GuidedFilterError::DimensionMismatch`] when `input` and the
    /// guidance image differ in size.
    pub fn filter(
        &self,
        input: &Image<Luma<f32>>,
    ) -> Result<Image<Luma<f32>>, GuidedFilterError> {
        let (width, height) = self.guidance.dimensions();
        if input.dimensions() != (width, height) {
            return Err(GuidedFilterError::DimensionMismatch {
                guidance_dims: (width, height),
                input_dims: input.dimensions(),
            });
        }

        let input_mean = box_filter(input, self.radius);

        // E[I_c p] per guidance channel.
        let product_means: Vec<Image<Luma<f32>>> = (0..3)
            .map(|c| {
                let product =
                    map_colors2(&self.guidance, input, |g, p| Luma([g[c] * p[0]]));
                box_filter(&product, self.radius)
            })
            .collect();

        let mut a = [
            ImageBuffer::new(width, height),
            ImageBuffer::new(width, height),
            ImageBuffer::new(width, height),
        ];
        let mut b: Image<Luma<f32>> = ImageBuffer::new(width, height);

        for y in 0..height {
            for x in 0..width {
                let mean = Vector3::new(
                    self.guidance_mean[0].get_pixel(x, y)[0],
                    self.guidance_mean[1].get_pixel(x, y)[0],
                    self.guidance_mean[2].get_pixel(x, y)[0],
                );
                let p_mean = input_mean.get_pixel(x, y)[0];
                let cov_ip = Vector3::new(
                    product_means[0].get_pixel(x, y)[0] - mean[0] * p_mean,
                    product_means[1].get_pixel(x, y)[0] - mean[1] * p_mean,
                    product_means[2].get_pixel(x, y)[0] - mean[2] * p_mean,
                );

                let coefficients =
                    self.inv_cov[(y * width + x) as usize] * cov_ip;
                for c in 0..3 {
                    a[c].put_pixel(x, y, Luma([coefficients[c]]));
                }
                b.put_pixel(x, y, Luma([p_mean - coefficients.dot(&mean)]));
            }
        }

        let a_mean = [
            box_filter(&a[0], self.radius),
            box_filter(&a[1], self.radius),
            box_filter(&a[2], self.radius),
        ];
        let b_mean = box_filter(&b, self.radius);

        Ok(ImageBuffer::from_fn(width, height, |x, y| {
            let pixel = self.guidance.get_pixel(x, y);
            let mut value = b_mean.get_pixel(x, y)[0];
            for c in 0..3 {
                value += a_mean[c].get_pixel(x, y)[0] * pixel[c];
            }
            Luma([value])
        }))
    }
}

fn split_channels(image: &Image<Rgb<f32>>) -> [Image<Luma<f32>>; 3] {
    let channel = |c: usize| map_colors(image, |p| Luma([p[c]]));
    [channel(0), channel(1), channel(2)]
}
