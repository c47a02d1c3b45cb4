//! Decomposes a flattened raster image into a stack of semi-transparent
//! layers, each described by a blend mode, a Porter-Duff-style composite
//! operator, and a statistical color model, such that recompositing the
//! layers reproduces the original image.
//!
//! The entry points are [`decompose`] (initial per-pixel unmixing),
//! [`refine_mattes`] (guided-filter smoothing followed by a re-solve with
//! pinned alphas), and [`composite_layer_images`] (recompositing for
//! verification or export).

mod error;
#[cfg(test)]
mod test_utils;
mod unmixing;

use image::{ImageBuffer, Pixel};

pub use error::{Error, GuidedFilterError};
pub use unmixing::blend_mode::{blend, blend_grad_d, blend_grad_s, blend_vec3, BlendMode};
pub use unmixing::color_model::{ColorModel, GaussianColorModel};
pub use unmixing::comp_op::CompOp;
pub use unmixing::decompose::{
    composite_layer_images, decompose, refine_mattes, DecomposeOptions, RefineOptions,
};
pub use unmixing::equations::{
    composite_chain_jacobian, composite_layers, composite_two_layers, constraint_jacobian,
    constraint_vector, energy_gradient, unmixing_energy, AlphaConstraint,
};
pub use unmixing::guided_filter::{box_filter, GuidedFilterColor};
pub use unmixing::layer_stack::{LayerDescriptor, LayerStack};
pub use unmixing::lbfgs::{minimize_bounded, LbfgsOptions};
pub use unmixing::solver::{solve_pixel, PixelSolveMode, SolverOptions};
pub use unmixing::{Mat3, Mat4, MatX, Vec3, Vec4, VecX};

pub type Image<P> = ImageBuffer<P, Vec<<P as Pixel>::Subpixel>>;
