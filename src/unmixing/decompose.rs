//! Image-level orchestration: initial decomposition, matte refinement, and
//! recompositing.
//!
//! Per-pixel solves are independent, so both passes fan out over a rayon
//! thread pool sized by the caller. Every written alpha and color component
//! is clamped into [0,1].

use image::{ImageBuffer, Luma, Rgb, Rgba};
use imageproc::map::map_colors;
use itertools::izip;
use rayon::prelude::*;

use crate::error::Error;
use crate::unmixing::comp_op::CompOp;
use crate::unmixing::equations::{composite_layers, split_unknowns};
use crate::unmixing::guided_filter::GuidedFilterColor;
use crate::unmixing::layer_stack::LayerStack;
use crate::unmixing::solver::{solve_pixel, PixelSolveMode, SolverOptions};
use crate::unmixing::{crop_value, crop_vec4, Vec3, VecX};
use crate::Image;

const REFINEMENT_EPSILON: f32 = 1e-4;
const ALPHA_SUM_EPSILON: f64 = 1e-5;

/// Options for the initial decomposition pass.
#[derive(Debug, Clone)]
pub struct DecomposeOptions {
    /// Pin layer 0's alpha to one at every pixel.
    pub opaque_background: bool,
    /// Worker threads for the per-pixel solves; zero means one per core.
    pub target_concurrency: usize,
    pub solver: SolverOptions,
}

impl Default for DecomposeOptions {
    fn default() -> Self {
        DecomposeOptions {
            opaque_background: true,
            target_concurrency: 0,
            solver: SolverOptions::default(),
        }
    }
}

/// Options for the matte refinement pass.
#[derive(Debug, Clone)]
pub struct RefineOptions {
    pub opaque_background: bool,
    /// Smooth the background color channels and pin layer 0's color to the
    /// smoothed value. Requires `opaque_background`.
    pub smooth_background: bool,
    /// Worker threads for the per-pixel solves; zero means one per core.
    pub target_concurrency: usize,
    pub solver: SolverOptions,
}

impl Default for RefineOptions {
    fn default() -> Self {
        RefineOptions {
            opaque_background: true,
            smooth_background: false,
            target_concurrency: 0,
            solver: SolverOptions::default(),
        }
    }
}

/// Decomposes `image` into one RGBA image per layer of `stack`.
///
/// Runs the constrained per-pixel solve at every pixel across a thread pool
/// and scatters the unknown vectors into per-layer images. Layer order
/// matches the stack (index 0 = background).
///
/// # Errors
///
/// Returns [`Error::GrayLayerOutOfRange`] for an invalid gray-layer index and
/// [`Error::ThreadPool`] when the worker pool cannot be built.
pub fn decompose(
    image: &Image<Rgb<f32>>,
    stack: &LayerStack,
    options: &DecomposeOptions,
) -> Result<Vec<Image<Rgba<f32>>>, Error> {
    validate_gray_layers(&options.solver, stack)?;

    let solutions = solve_all_pixels(
        image,
        stack,
        options.target_concurrency,
        &options.solver,
        options.opaque_background,
        |_| None,
    )?;

    Ok(scatter_solutions(&solutions, stack.len(), image.dimensions()))
}

/// Smooths each layer's matte under the guidance of the original image and
/// re-solves every pixel with the smoothed alphas pinned.
///
/// The filter radius follows the image size (`60·min(w,h)/1000`, at least
/// one pixel). After filtering, alphas are clamped and renormalized per
/// composite-operator family: an all-plus stack divides by the alpha sum,
/// an all-source-over stack is left unchanged.
///
/// # Errors
///
/// Returns [`Error::LayerCountMismatch`] or [`Error::DimensionMismatch`] when
/// `layers` does not match `stack` and `image`,
/// [`Error::SmoothBackgroundRequiresOpaque`] when background smoothing is
/// requested without an opaque background,
/// [`Error::MixedCompositeOperators`] when the stack mixes source-over and
/// plus layers, [`Error::GrayLayerOutOfRange`] for an invalid gray-layer
/// index, and [`Error::ThreadPool`] when the worker pool cannot be built.
pub fn refine_mattes(
    image: &Image<Rgb<f32>>,
    layers: &[Image<Rgba<f32>>],
    stack: &LayerStack,
    options: &RefineOptions,
) -> Result<Vec<Image<Rgba<f32>>>, Error> {
    validate_layer_images(layers, stack, Some(image.dimensions()))?;
    validate_gray_layers(&options.solver, stack)?;
    if options.smooth_background && !options.opaque_background {
        return Err(Error::SmoothBackgroundRequiresOpaque);
    }

    let comp_ops = stack.comp_ops();
    let family = CompositeFamily::classify(&comp_ops)?;

    let (width, height) = image.dimensions();
    let radius = refinement_radius(width, height);
    let filter = GuidedFilterColor::new(image, radius, REFINEMENT_EPSILON)?;

    // Smooth each matte and clamp it back into [0,1].
    let mut refined_alphas = Vec::with_capacity(layers.len());
    for layer in layers {
        let matte = extract_channel(layer, 3);
        let smoothed = filter.filter(&matte)?;
        refined_alphas.push(clamp_plane(&smoothed));
    }

    renormalize_alphas(&mut refined_alphas, family);

    let smoothed_background = if options.smooth_background {
        let channels = [
            filter.filter(&extract_channel(&layers[0], 0))?,
            filter.filter(&extract_channel(&layers[0], 1))?,
            filter.filter(&extract_channel(&layers[0], 2))?,
        ];
        Some(channels)
    } else {
        None
    };

    let num_layers = stack.len();
    let solutions = solve_all_pixels(
        image,
        stack,
        options.target_concurrency,
        &options.solver,
        options.opaque_background,
        |(x, y)| {
            let mut initial_colors = VecX::zeros(num_layers * 3);
            let mut target_alphas = VecX::zeros(num_layers);
            for (index, (layer, alpha)) in izip!(layers, &refined_alphas).enumerate() {
                let pixel = layer.get_pixel(x, y);
                for c in 0..3 {
                    initial_colors[index * 3 + c] = f64::from(pixel[c]);
                }
                target_alphas[index] = f64::from(alpha.get_pixel(x, y)[0]);
            }

            let smooth_background = smoothed_background.as_ref().map(|channels| {
                let background = Vec3::new(
                    f64::from(channels[0].get_pixel(x, y)[0]),
                    f64::from(channels[1].get_pixel(x, y)[0]),
                    f64::from(channels[2].get_pixel(x, y)[0]),
                );
                let background = crate::unmixing::crop_vec3(&background);
                for c in 0..3 {
                    initial_colors[c] = background[c];
                }
                background
            });

            Some(OwnedRefinement {
                initial_colors,
                target_alphas,
                opaque_background: options.opaque_background,
                smooth_background,
            })
        },
    )?;

    Ok(scatter_solutions(&solutions, num_layers, image.dimensions()))
}

/// Recomposites per-layer RGBA images into one flattened RGBA image.
///
/// # Errors
///
/// Returns [`Error::LayerCountMismatch`] when `layers` and `stack` disagree
/// on the layer count and [`Error::DimensionMismatch`] when the layer images
/// differ in size.
pub fn composite_layer_images(
    layers: &[Image<Rgba<f32>>],
    stack: &LayerStack,
) -> Result<Image<Rgba<f32>>, Error> {
    validate_layer_images(layers, stack, None)?;

    let comp_ops = stack.comp_ops();
    let modes = stack.blend_modes();
    let num_layers = layers.len();
    let (width, height) = layers[0].dimensions();

    Ok(ImageBuffer::from_fn(width, height, |x, y| {
        let mut alphas = VecX::zeros(num_layers);
        let mut colors = VecX::zeros(num_layers * 3);
        for (index, layer) in layers.iter().enumerate() {
            let pixel = layer.get_pixel(x, y);
            alphas[index] = f64::from(pixel[3]);
            for c in 0..3 {
                colors[index * 3 + c] = f64::from(pixel[c]);
            }
        }
        let composited = crop_vec4(&composite_layers(&alphas, &colors, &comp_ops, &modes, false));
        Rgba([
            composited[0] as f32,
            composited[1] as f32,
            composited[2] as f32,
            composited[3] as f32,
        ])
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompositeFamily {
    SourceOver,
    Plus,
}

impl CompositeFamily {
    fn classify(comp_ops: &[CompOp]) -> Result<Self, Error> {
        if comp_ops.iter().all(|op| op.is_source_over()) {
            Ok(CompositeFamily::SourceOver)
        } else if comp_ops.iter().all(|op| op.is_plus()) {
            Ok(CompositeFamily::Plus)
        } else {
            Err(Error::MixedCompositeOperators)
        }
    }
}

/// Per-pixel refinement inputs owned by the dispatch closure.
struct OwnedRefinement {
    initial_colors: VecX,
    target_alphas: VecX,
    opaque_background: bool,
    smooth_background: Option<Vec3>,
}

/// Runs `solve_pixel` at every pixel of `image` across a dedicated pool.
///
/// `setup` builds the per-pixel refinement inputs; returning `None` selects
/// the initial solve mode with `opaque_background` as configured.
fn solve_all_pixels<F>(
    image: &Image<Rgb<f32>>,
    stack: &LayerStack,
    target_concurrency: usize,
    solver: &SolverOptions,
    opaque_background: bool,
    setup: F,
) -> Result<Vec<VecX>, Error>
where
    F: Fn((u32, u32)) -> Option<OwnedRefinement> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(target_concurrency)
        .build()
        .map_err(|e| Error::ThreadPool(e.to_string()))?;

    let (width, height) = image.dimensions();

    let solutions = pool.install(|| {
        (0..(width as usize * height as usize))
            .into_par_iter()
            .map(|index| {
                let x = (index % width as usize) as u32;
                let y = (index / width as usize) as u32;
                let pixel = image.get_pixel(x, y);
                let target_color = Vec3::new(
                    f64::from(pixel[0]),
                    f64::from(pixel[1]),
                    f64::from(pixel[2]),
                );

                match setup((x, y)) {
                    None => solve_pixel(
                        &target_color,
                        stack,
                        &PixelSolveMode::Initial { opaque_background },
                        solver,
                    ),
                    Some(refinement) => solve_pixel(
                        &target_color,
                        stack,
                        &PixelSolveMode::Refinement {
                            initial_colors: &refinement.initial_colors,
                            target_alphas: &refinement.target_alphas,
                            opaque_background: refinement.opaque_background,
                            smooth_background: refinement.smooth_background,
                        },
                        solver,
                    ),
                }
            })
            .collect()
    });

    Ok(solutions)
}

fn scatter_solutions(
    solutions: &[VecX],
    num_layers: usize,
    (width, height): (u32, u32),
) -> Vec<Image<Rgba<f32>>> {
    let mut layers: Vec<Image<Rgba<f32>>> =
        (0..num_layers).map(|_| ImageBuffer::new(width, height)).collect();

    for (index, solution) in solutions.iter().enumerate() {
        let x = (index % width as usize) as u32;
        let y = (index / width as usize) as u32;
        let (alphas, colors) = split_unknowns(solution);
        for (layer_index, layer) in layers.iter_mut().enumerate() {
            layer.put_pixel(
                x,
                y,
                Rgba([
                    crop_value(colors[layer_index * 3]) as f32,
                    crop_value(colors[layer_index * 3 + 1]) as f32,
                    crop_value(colors[layer_index * 3 + 2]) as f32,
                    crop_value(alphas[layer_index]) as f32,
                ]),
            );
        }
    }

    layers
}

fn refinement_radius(width: u32, height: u32) -> u32 {
    (60 * width.min(height) / 1000).max(1)
}

fn extract_channel(image: &Image<Rgba<f32>>, channel: usize) -> Image<Luma<f32>> {
    map_colors(image, |p| Luma([p[channel]]))
}

fn clamp_plane(image: &Image<Luma<f32>>) -> Image<Luma<f32>> {
    map_colors(image, |p| Luma([p[0].clamp(0.0, 1.0)]))
}

/// Renormalizes smoothed alphas so that recompositing yields unit alpha.
///
/// All-plus stacks divide each alpha by the pixel's alpha sum; a near-zero
/// sum leaves the pixel untouched. All-source-over stacks already composite
/// to the background alpha, so they pass through unchanged.
fn renormalize_alphas(alphas: &mut [Image<Luma<f32>>], family: CompositeFamily) {
    if family != CompositeFamily::Plus {
        return;
    }
    let (width, height) = alphas[0].dimensions();
    for y in 0..height {
        for x in 0..width {
            let sum: f64 = alphas
                .iter()
                .map(|plane| f64::from(plane.get_pixel(x, y)[0]))
                .sum();
            if sum <= ALPHA_SUM_EPSILON {
                continue;
            }
            for plane in alphas.iter_mut() {
                let value = f64::from(plane.get_pixel(x, y)[0]) / sum;
                plane.put_pixel(x, y, Luma([value as f32]));
            }
        }
    }
}

fn validate_gray_layers(solver: &SolverOptions, stack: &LayerStack) -> Result<(), Error> {
    for &index in &solver.gray_layers {
        if index >= stack.len() {
            return Err(Error::GrayLayerOutOfRange {
                index,
                layers: stack.len(),
            });
        }
    }
    Ok(())
}

fn validate_layer_images(
    layers: &[Image<Rgba<f32>>],
    stack: &LayerStack,
    expected_dims: Option<(u32, u32)>,
) -> Result<(), Error> {
    if layers.len() != stack.len() {
        return Err(Error::LayerCountMismatch {
            expected: stack.len(),
            actual: layers.len(),
        });
    }
    let expected = expected_dims.unwrap_or_else(|| layers[0].dimensions());
    for layer in layers {
        if layer.dimensions() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                actual: layer.dimensions(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{constant_rgb_image, constant_rgba_layer, gaussian_layer};
    use crate::unmixing::blend_mode::BlendMode;
    use crate::unmixing::layer_stack::LayerDescriptor;

    fn layer(mean: Vec3, comp_op: CompOp) -> LayerDescriptor {
        gaussian_layer(mean, comp_op, BlendMode::Normal)
    }

    #[test]
    fn refinement_radius_follows_image_size_with_a_floor() {
        assert_eq!(refinement_radius(10, 10), 1);
        assert_eq!(refinement_radius(1000, 2000), 60);
        assert_eq!(refinement_radius(500, 800), 30);
    }

    #[test]
    fn classify_rejects_mixed_operator_families() {
        assert!(matches!(
            CompositeFamily::classify(&[CompOp::SOURCE_OVER, CompOp::PLUS]),
            Err(Error::MixedCompositeOperators)
        ));
        assert_eq!(
            CompositeFamily::classify(&[CompOp::PLUS, CompOp::PLUS]).unwrap(),
            CompositeFamily::Plus
        );
    }

    #[test]
    fn plus_family_alphas_renormalize_to_unit_sum() {
        let mut alphas = vec![
            ImageBuffer::from_pixel(2, 2, Luma([0.6f32])),
            ImageBuffer::from_pixel(2, 2, Luma([0.2f32])),
        ];
        renormalize_alphas(&mut alphas, CompositeFamily::Plus);
        assert!((alphas[0].get_pixel(0, 0)[0] - 0.75).abs() < 1e-6);
        assert!((alphas[1].get_pixel(0, 0)[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn near_zero_alpha_sum_is_left_untouched() {
        let mut alphas = vec![ImageBuffer::from_pixel(1, 1, Luma([0.0f32]))];
        renormalize_alphas(&mut alphas, CompositeFamily::Plus);
        assert_eq!(alphas[0].get_pixel(0, 0)[0], 0.0);
    }

    #[test]
    fn layer_count_mismatch_is_reported() {
        let stack = LayerStack::new(vec![
            layer(Vec3::zeros(), CompOp::SOURCE_OVER),
            layer(Vec3::new(1.0, 1.0, 1.0), CompOp::SOURCE_OVER),
        ])
        .unwrap();
        let layers = vec![constant_rgba_layer(2, 2, [0.0, 0.0, 0.0, 1.0])];
        assert!(matches!(
            composite_layer_images(&layers, &stack),
            Err(Error::LayerCountMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn smooth_background_without_opaque_background_is_rejected() {
        let stack = LayerStack::new(vec![layer(Vec3::zeros(), CompOp::SOURCE_OVER)]).unwrap();
        let image = constant_rgb_image(4, 4, [0.5, 0.5, 0.5]);
        let layers = vec![constant_rgba_layer(4, 4, [0.5, 0.5, 0.5, 1.0])];
        let options = RefineOptions {
            opaque_background: false,
            smooth_background: true,
            ..RefineOptions::default()
        };
        assert!(matches!(
            refine_mattes(&image, &layers, &stack, &options),
            Err(Error::SmoothBackgroundRequiresOpaque)
        ));
    }

    #[test]
    fn gray_layer_index_outside_the_stack_is_rejected() {
        let stack = LayerStack::new(vec![layer(Vec3::zeros(), CompOp::SOURCE_OVER)]).unwrap();
        let image = constant_rgb_image(2, 2, [0.5, 0.5, 0.5]);
        let options = DecomposeOptions {
            solver: SolverOptions {
                gray_layers: vec![3],
                ..SolverOptions::default()
            },
            ..DecomposeOptions::default()
        };
        assert!(matches!(
            decompose(&image, &stack, &options),
            Err(Error::GrayLayerOutOfRange { index: 3, layers: 1 })
        ));
    }

    #[test]
    fn single_normal_over_layer_composites_to_itself() {
        let stack = LayerStack::new(vec![layer(Vec3::new(0.2, 0.4, 0.6), CompOp::SOURCE_OVER)])
            .unwrap();
        let layers = vec![constant_rgba_layer(3, 3, [0.2, 0.4, 0.6, 1.0])];
        let composited = composite_layer_images(&layers, &stack).unwrap();
        let pixel = composited.get_pixel(1, 1);
        for c in 0..4 {
            assert!((pixel[c] - layers[0].get_pixel(1, 1)[c]).abs() < 1e-6, "channel {c}");
        }
    }
}
