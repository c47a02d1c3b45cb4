//! Per-pixel composite chain, its analytic Jacobians, and the constraint /
//! energy formulation driving the augmented-Lagrangian solver.
//!
//! The per-pixel unknown vector is laid out as `[alphas (N) | colors (3N)]`
//! with layer 0 the bottom-most. Jacobian matrices use rows for the input
//! variables `(c₀, c₁, c₂, a)` of one layer and columns for the composited
//! outputs `(B₀, B₁, B₂, A)`.

use crate::unmixing::blend_mode::{blend_grad_d, blend_grad_s, blend_vec3, BlendMode};
use crate::unmixing::color_model::ColorModel;
use crate::unmixing::comp_op::CompOp;
use crate::unmixing::{crop_vec4, Mat4, MatX, Vec3, Vec4, VecX};

/// Below this composited alpha the color is left unnormalized to avoid the
/// division blowing up.
const ALPHA_NORMALIZATION_EPSILON: f64 = 1e-12;

/// Weight of the optional minimum-alpha regularizer.
const MINIMUM_ALPHA_WEIGHT: f64 = 0.01;

/// Gray constraint derivatives vanish near the origin; below this norm the
/// Jacobian rows are left at zero.
const GRAY_GRADIENT_EPSILON: f64 = 1e-3;

/// Which alpha constraint the solver is enforcing.
#[derive(Debug, Clone, Copy)]
pub enum AlphaConstraint<'a> {
    /// Initial decomposition: the composited alpha must reach 1.
    CompositedUnity,
    /// Matte refinement: each layer's alpha is pinned to a target.
    TargetAlphas(&'a VecX),
}

impl AlphaConstraint<'_> {
    fn count(&self, num_layers: usize) -> usize {
        match self {
            AlphaConstraint::CompositedUnity => 1,
            AlphaConstraint::TargetAlphas(_) => num_layers,
        }
    }
}

/// Composites a source layer onto a destination under a composite operator
/// and blend mode, returning RGBA.
///
/// When the composited alpha is below 1e-12 the unnormalized numerator is
/// returned as the color.
pub fn composite_two_layers(
    c_s: &Vec3,
    c_d: &Vec3,
    a_s: f64,
    a_d: f64,
    comp_op: CompOp,
    mode: BlendMode,
    crop: bool,
) -> Vec4 {
    let a = comp_op.composite_alpha(a_s, a_d);
    let f = blend_vec3(c_s, c_d, mode, false);
    let c_pre =
        f * a_s * a_d + comp_op.y * a_s * (1.0 - a_d) * c_s + comp_op.z * a_d * (1.0 - a_s) * c_d;
    let c = if a > ALPHA_NORMALIZATION_EPSILON {
        c_pre / a
    } else {
        c_pre
    };

    let rgba = Vec4::new(c[0], c[1], c[2], a);
    if crop {
        crop_vec4(&rgba)
    } else {
        rgba
    }
}

fn composite_two_rgba(x_s: &Vec4, x_d: &Vec4, comp_op: CompOp, mode: BlendMode) -> Vec4 {
    composite_two_layers(
        &x_s.xyz(),
        &x_d.xyz(),
        x_s[3],
        x_d[3],
        comp_op,
        mode,
        false,
    )
}

fn layer_rgba(alphas: &VecX, colors: &VecX, index: usize) -> Vec4 {
    Vec4::new(
        colors[index * 3],
        colors[index * 3 + 1],
        colors[index * 3 + 2],
        alphas[index],
    )
}

/// Folds an ordered layer stack into one RGBA value, bottom-up.
///
/// The accumulator is seeded by layer 0; layer `k` is then composited as the
/// source over the accumulated `(k−1)`-stack.
pub fn composite_layers(
    alphas: &VecX,
    colors: &VecX,
    comp_ops: &[CompOp],
    modes: &[BlendMode],
    crop: bool,
) -> Vec4 {
    let num_layers = alphas.len();
    debug_assert_eq!(num_layers, comp_ops.len());
    debug_assert_eq!(num_layers, modes.len());
    debug_assert_eq!(num_layers * 3, colors.len());

    let mut acc = layer_rgba(alphas, colors, 0);
    for index in 1..num_layers {
        acc = composite_two_layers(
            &Vec3::new(colors[index * 3], colors[index * 3 + 1], colors[index * 3 + 2]),
            &acc.xyz(),
            alphas[index],
            acc[3],
            comp_ops[index],
            modes[index],
            crop,
        );
    }
    acc
}

fn composite_alpha_grad_source(a_d: f64, comp_op: CompOp) -> f64 {
    comp_op.x * a_d + comp_op.y * (1.0 - a_d) - comp_op.z * a_d
}

fn composite_alpha_grad_destination(a_s: f64, comp_op: CompOp) -> f64 {
    comp_op.x * a_s - comp_op.y * a_s + comp_op.z * (1.0 - a_s)
}

// Separable blend functions keep the color block diagonal; a general blend
// would need a dense 3x3 block here.
fn blend_jacobian_source(c_s: &Vec3, c_d: &Vec3, mode: BlendMode) -> Vec3 {
    Vec3::new(
        blend_grad_s(c_s[0], c_d[0], mode, false),
        blend_grad_s(c_s[1], c_d[1], mode, false),
        blend_grad_s(c_s[2], c_d[2], mode, false),
    )
}

fn blend_jacobian_destination(c_s: &Vec3, c_d: &Vec3, mode: BlendMode) -> Vec3 {
    Vec3::new(
        blend_grad_d(c_s[0], c_d[0], mode, false),
        blend_grad_d(c_s[1], c_d[1], mode, false),
        blend_grad_d(c_s[2], c_d[2], mode, false),
    )
}

/// 4x4 Jacobian of a single fold with respect to the source layer's own
/// color and alpha.
pub fn composite_source_jacobian(x_s: &Vec4, x_d: &Vec4, comp_op: CompOp, mode: BlendMode) -> Mat4 {
    let x_m = composite_two_rgba(x_s, x_d, comp_op, mode);
    let a = x_m[3];
    let b = x_m.xyz();
    let c_s = x_s.xyz();
    let c_d = x_d.xyz();
    let d = blend_vec3(&c_s, &c_d, mode, false);

    let da_das = composite_alpha_grad_source(x_d[3], comp_op);

    let dd_dcs = blend_jacobian_source(&c_s, &c_d, mode);
    let dc_dcs =
        dd_dcs * x_s[3] * x_d[3] + Vec3::repeat(comp_op.y * (1.0 - x_d[3]) * x_s[3]);
    let dc_das = d * x_d[3] + comp_op.y * (1.0 - x_d[3]) * c_s - comp_op.z * x_d[3] * c_d;

    // Below the normalization guard the color is the raw numerator, so its
    // derivatives are used undivided.
    let (db_dcs, db_das) = if a > ALPHA_NORMALIZATION_EPSILON {
        (dc_dcs / a, (dc_das - b * da_das) / a)
    } else {
        (dc_dcs, dc_das)
    };

    let mut derivative = Mat4::zeros();
    derivative[(0, 0)] = db_dcs[0];
    derivative[(1, 1)] = db_dcs[1];
    derivative[(2, 2)] = db_dcs[2];
    derivative[(3, 3)] = da_das;
    derivative[(3, 0)] = db_das[0];
    derivative[(3, 1)] = db_das[1];
    derivative[(3, 2)] = db_das[2];
    derivative
}

/// 4x4 Jacobian of a single fold with respect to the destination stack's
/// color and alpha.
pub fn composite_destination_jacobian(
    x_s: &Vec4,
    x_d: &Vec4,
    comp_op: CompOp,
    mode: BlendMode,
) -> Mat4 {
    let x_m = composite_two_rgba(x_s, x_d, comp_op, mode);
    let a = x_m[3];
    let b = x_m.xyz();
    let c_s = x_s.xyz();
    let c_d = x_d.xyz();
    let d = blend_vec3(&c_s, &c_d, mode, false);

    let da_dad = composite_alpha_grad_destination(x_s[3], comp_op);

    let dd_dcd = blend_jacobian_destination(&c_s, &c_d, mode);
    let dc_dcd =
        dd_dcd * x_s[3] * x_d[3] + Vec3::repeat(comp_op.z * (1.0 - x_s[3]) * x_d[3]);
    let dc_dad = d * x_s[3] - comp_op.y * x_s[3] * c_s + comp_op.z * (1.0 - x_s[3]) * c_d;

    let (db_dcd, db_dad) = if a > ALPHA_NORMALIZATION_EPSILON {
        (dc_dcd / a, (dc_dad - b * da_dad) / a)
    } else {
        (dc_dcd, dc_dad)
    };

    let mut derivative = Mat4::zeros();
    derivative[(0, 0)] = db_dcd[0];
    derivative[(1, 1)] = db_dcd[1];
    derivative[(2, 2)] = db_dcd[2];
    derivative[(3, 3)] = da_dad;
    derivative[(3, 0)] = db_dad[0];
    derivative[(3, 1)] = db_dad[1];
    derivative[(3, 2)] = db_dad[2];
    derivative
}

/// Jacobian of the final N-layer composite with respect to layer `layer`'s
/// own (color, alpha).
///
/// Built iteratively: intermediate composites are accumulated bottom-up once
/// and the chain rule `J(i,k) = J(i,k−1)·D_dest(k)` is rolled forward from
/// the base case, so the cost is O(N) matrix products without recursion.
pub fn composite_chain_jacobian(
    layer: usize,
    alphas: &VecX,
    colors: &VecX,
    comp_ops: &[CompOp],
    modes: &[BlendMode],
) -> Mat4 {
    let num_layers = alphas.len();
    debug_assert!(layer < num_layers);

    // Prefix composites: prefixes[k] is the k-layer stack folded bottom-up.
    let mut prefixes = Vec::with_capacity(num_layers);
    let mut acc = layer_rgba(alphas, colors, 0);
    prefixes.push(acc);
    for k in 1..num_layers {
        acc = composite_two_rgba(
            &layer_rgba(alphas, colors, k),
            &acc,
            comp_ops[k],
            modes[k],
        );
        prefixes.push(acc);
    }

    let mut jacobian = if layer == 0 {
        Mat4::identity()
    } else {
        composite_source_jacobian(
            &layer_rgba(alphas, colors, layer),
            &prefixes[layer - 1],
            comp_ops[layer],
            modes[layer],
        )
    };

    for k in (layer + 1)..num_layers {
        jacobian *= composite_destination_jacobian(
            &layer_rgba(alphas, colors, k),
            &prefixes[k - 1],
            comp_ops[k],
            modes[k],
        );
    }

    jacobian
}

pub fn lagrange_term(constraints: &VecX, lambda: &VecX) -> f64 {
    -lambda.dot(constraints)
}

pub fn penalty_term(constraints: &VecX, rho: f64) -> f64 {
    0.5 * rho * constraints.norm_squared()
}

/// Per-pixel unmixing energy: `Σᵢ αᵢ·distanceᵢ(colorᵢ)` plus the optional
/// sparsity and minimum-alpha regularizers.
pub fn unmixing_energy(
    alphas: &VecX,
    colors: &VecX,
    models: &[&dyn ColorModel],
    sparsity_weight: f64,
    use_sparsity: bool,
    use_minimum_alpha: bool,
) -> f64 {
    let mut energy = 0.0;
    for (index, model) in models.iter().enumerate() {
        let color = Vec3::new(colors[index * 3], colors[index * 3 + 1], colors[index * 3 + 2]);
        energy += alphas[index] * model.distance(&color);
    }

    if use_sparsity {
        energy += sparsity_weight * (alphas.sum() / alphas.norm_squared() - 1.0);
    }

    if use_minimum_alpha {
        energy += MINIMUM_ALPHA_WEIGHT * alphas.sum();
    }

    energy
}

/// Analytic gradient of [`unmixing_energy`] over the full unknown vector.
pub fn energy_gradient(
    alphas: &VecX,
    colors: &VecX,
    models: &[&dyn ColorModel],
    sparsity_weight: f64,
    use_sparsity: bool,
    use_minimum_alpha: bool,
) -> VecX {
    let num_layers = alphas.len();
    let mut grad = VecX::zeros(num_layers * 4);

    for (index, model) in models.iter().enumerate() {
        let color = Vec3::new(colors[index * 3], colors[index * 3 + 1], colors[index * 3 + 2]);
        grad[index] = model.distance(&color);
        let color_grad = model.distance_gradient(&color) * alphas[index];
        grad[num_layers + index * 3] = color_grad[0];
        grad[num_layers + index * 3 + 1] = color_grad[1];
        grad[num_layers + index * 3 + 2] = color_grad[2];
    }

    if use_sparsity {
        let alpha_sum = alphas.sum();
        let alpha_squared_sum = alphas.norm_squared();
        for index in 0..num_layers {
            grad[index] += sparsity_weight * (alpha_squared_sum - 2.0 * alphas[index] * alpha_sum)
                / (alpha_squared_sum * alpha_squared_sum);
        }
    }

    if use_minimum_alpha {
        for index in 0..num_layers {
            grad[index] += MINIMUM_ALPHA_WEIGHT;
        }
    }

    grad
}

/// Builds the constraint vector `g(x)`.
///
/// Layout: 3 color-match residuals, then the alpha residual(s), then a
/// 3-vector per gray layer forcing its color onto the achromatic diagonal.
pub fn constraint_vector(
    alphas: &VecX,
    colors: &VecX,
    target_color: &Vec3,
    comp_ops: &[CompOp],
    modes: &[BlendMode],
    alpha_constraint: AlphaConstraint<'_>,
    gray_layers: &[usize],
) -> VecX {
    let num_layers = alphas.len();
    let num_alpha_constraints = alpha_constraint.count(num_layers);

    let composited = composite_layers(alphas, colors, comp_ops, modes, false);

    let mut constraints = VecX::zeros(3 + num_alpha_constraints + 3 * gray_layers.len());
    constraints[0] = composited[0] - target_color[0];
    constraints[1] = composited[1] - target_color[1];
    constraints[2] = composited[2] - target_color[2];

    match alpha_constraint {
        AlphaConstraint::CompositedUnity => {
            constraints[3] = composited[3] - 1.0;
        }
        AlphaConstraint::TargetAlphas(targets) => {
            for index in 0..num_layers {
                constraints[3 + index] = alphas[index] - targets[index];
            }
        }
    }

    for (slot, &gray_layer) in gray_layers.iter().enumerate() {
        let color = Vec3::new(
            colors[gray_layer * 3],
            colors[gray_layer * 3 + 1],
            colors[gray_layer * 3 + 2],
        );
        let gray = 3f64.sqrt() * color - color.norm() * Vec3::repeat(1.0);
        let offset = 3 + num_alpha_constraints + 3 * slot;
        constraints[offset] = gray[0];
        constraints[offset + 1] = gray[1];
        constraints[offset + 2] = gray[2];
    }

    constraints
}

/// Analytic Jacobian of [`constraint_vector`], shaped `4N x |g|` with rows
/// matching the unknown-vector layout.
pub fn constraint_jacobian(
    alphas: &VecX,
    colors: &VecX,
    comp_ops: &[CompOp],
    modes: &[BlendMode],
    alpha_constraint: AlphaConstraint<'_>,
    gray_layers: &[usize],
) -> MatX {
    let num_layers = alphas.len();
    let num_alpha_constraints = alpha_constraint.count(num_layers);
    let num_constraints = 3 + num_alpha_constraints + 3 * gray_layers.len();

    let mut derivative = MatX::zeros(4 * num_layers, num_constraints);
    let pins_alphas = matches!(alpha_constraint, AlphaConstraint::TargetAlphas(_));

    for i in 0..num_layers {
        let chain = composite_chain_jacobian(i, alphas, colors, comp_ops, modes);

        // Color-residual columns; the composited-alpha column only exists
        // for the unity constraint.
        let out_cols = if pins_alphas { 3 } else { 4 };
        for col in 0..out_cols {
            derivative[(i, col)] = chain[(3, col)];
            for row in 0..3 {
                derivative[(num_layers + i * 3 + row, col)] = chain[(row, col)];
            }
        }

        if pins_alphas {
            derivative[(i, 3 + i)] = 1.0;
        }
    }

    for (slot, &gray_layer) in gray_layers.iter().enumerate() {
        let color = Vec3::new(
            colors[gray_layer * 3],
            colors[gray_layer * 3 + 1],
            colors[gray_layer * 3 + 2],
        );
        let norm = color.norm();
        // Near the origin the gradient is effectively zero.
        if norm > GRAY_GRADIENT_EPSILON {
            let col_offset = 3 + num_alpha_constraints + 3 * slot;
            let sqrt3 = 3f64.sqrt();
            for row in 0..3 {
                for col in 0..3 {
                    let identity = if row == col { sqrt3 } else { 0.0 };
                    derivative[(num_layers + gray_layer * 3 + row, col_offset + col)] =
                        identity - color[row] / norm;
                }
            }
        }
    }

    derivative
}

/// Splits the unknown vector into its alpha and color segments.
pub(crate) fn split_unknowns(x: &VecX) -> (VecX, VecX) {
    let num_layers = x.len() / 4;
    let alphas = VecX::from_iterator(num_layers, (0..num_layers).map(|i| x[i]));
    let colors = VecX::from_iterator(
        num_layers * 3,
        (0..num_layers * 3).map(|i| x[num_layers + i]),
    );
    (alphas, colors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unmixing::color_model::GaussianColorModel;
    use crate::unmixing::Mat3;

    fn vecx(values: &[f64]) -> VecX {
        VecX::from_row_slice(values)
    }

    #[test]
    fn single_layer_composites_to_itself() {
        let alphas = vecx(&[0.7]);
        let colors = vecx(&[0.2, 0.5, 0.9]);
        let out = composite_layers(
            &alphas,
            &colors,
            &[CompOp::SOURCE_OVER],
            &[BlendMode::Normal],
            false,
        );
        assert_eq!(out, Vec4::new(0.2, 0.5, 0.9, 0.7));
    }

    #[test]
    fn two_layer_over_normal_matches_alpha_blending() {
        // Opaque background under a half-transparent normal layer reduces to
        // linear interpolation.
        let alphas = vecx(&[1.0, 0.5]);
        let colors = vecx(&[1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
        let out = composite_layers(
            &alphas,
            &colors,
            &[CompOp::SOURCE_OVER, CompOp::SOURCE_OVER],
            &[BlendMode::Normal, BlendMode::Normal],
            false,
        );
        assert!((out[0] - 0.5).abs() < 1e-12);
        assert!((out[3] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_alpha_composite_stays_finite() {
        let out = composite_two_layers(
            &Vec3::new(0.3, 0.3, 0.3),
            &Vec3::new(0.8, 0.8, 0.8),
            0.0,
            0.0,
            CompOp::SOURCE_OVER,
            BlendMode::Multiply,
            false,
        );
        assert!(out.iter().all(|v| v.is_finite()));
        assert_eq!(out[3], 0.0);
    }

    fn finite_difference_chain(
        layer: usize,
        alphas: &VecX,
        colors: &VecX,
        comp_ops: &[CompOp],
        modes: &[BlendMode],
    ) -> Mat4 {
        let h = 1e-6;
        let mut fd = Mat4::zeros();
        for var in 0..4 {
            let mut alphas_hi = alphas.clone();
            let mut alphas_lo = alphas.clone();
            let mut colors_hi = colors.clone();
            let mut colors_lo = colors.clone();
            if var == 3 {
                alphas_hi[layer] += h;
                alphas_lo[layer] -= h;
            } else {
                colors_hi[layer * 3 + var] += h;
                colors_lo[layer * 3 + var] -= h;
            }
            let hi = composite_layers(&alphas_hi, &colors_hi, comp_ops, modes, false);
            let lo = composite_layers(&alphas_lo, &colors_lo, comp_ops, modes, false);
            for out in 0..4 {
                fd[(var, out)] = (hi[out] - lo[out]) / (2.0 * h);
            }
        }
        fd
    }

    #[test]
    fn chain_jacobian_matches_finite_differences() {
        let alphas = vecx(&[0.9, 0.6, 0.4]);
        let colors = vecx(&[0.8, 0.3, 0.6, 0.2, 0.7, 0.4, 0.5, 0.5, 0.1]);
        let comp_ops = [CompOp::SOURCE_OVER, CompOp::SOURCE_OVER, CompOp::PLUS];
        let modes = [BlendMode::Normal, BlendMode::Multiply, BlendMode::Screen];

        for layer in 0..3 {
            let analytic = composite_chain_jacobian(layer, &alphas, &colors, &comp_ops, &modes);
            let numeric = finite_difference_chain(layer, &alphas, &colors, &comp_ops, &modes);
            for row in 0..4 {
                for col in 0..4 {
                    let diff = (analytic[(row, col)] - numeric[(row, col)]).abs();
                    let scale = numeric[(row, col)].abs().max(1.0);
                    assert!(
                        diff / scale < 1e-4,
                        "layer {layer} entry ({row},{col}): {} vs {}",
                        analytic[(row, col)],
                        numeric[(row, col)]
                    );
                }
            }
        }
    }

    #[test]
    fn constraint_vector_has_expected_layout() {
        let alphas = vecx(&[1.0, 0.5]);
        let colors = vecx(&[1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
        let comp_ops = [CompOp::SOURCE_OVER, CompOp::SOURCE_OVER];
        let modes = [BlendMode::Normal, BlendMode::Normal];

        let unity = constraint_vector(
            &alphas,
            &colors,
            &Vec3::new(0.5, 0.5, 0.5),
            &comp_ops,
            &modes,
            AlphaConstraint::CompositedUnity,
            &[],
        );
        assert_eq!(unity.len(), 4);
        assert!(unity.norm() < 1e-12);

        let targets = vecx(&[1.0, 0.25]);
        let pinned = constraint_vector(
            &alphas,
            &colors,
            &Vec3::new(0.5, 0.5, 0.5),
            &comp_ops,
            &modes,
            AlphaConstraint::TargetAlphas(&targets),
            &[],
        );
        assert_eq!(pinned.len(), 5);
        assert!((pinned[4] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn gray_constraint_vanishes_on_achromatic_colors() {
        let alphas = vecx(&[1.0, 0.5]);
        let colors = vecx(&[1.0, 1.0, 1.0, 0.4, 0.4, 0.4]);
        let g = constraint_vector(
            &alphas,
            &colors,
            &Vec3::new(0.7, 0.7, 0.7),
            &[CompOp::SOURCE_OVER, CompOp::SOURCE_OVER],
            &[BlendMode::Normal, BlendMode::Normal],
            AlphaConstraint::CompositedUnity,
            &[1],
        );
        assert_eq!(g.len(), 7);
        // The gray rows are the last three.
        assert!(g.rows(4, 3).norm() < 1e-12);
    }

    #[test]
    fn constraint_jacobian_matches_finite_differences() {
        let alphas = vecx(&[0.8, 0.5]);
        let colors = vecx(&[0.9, 0.2, 0.4, 0.3, 0.6, 0.5]);
        let comp_ops = [CompOp::SOURCE_OVER, CompOp::SOURCE_OVER];
        let modes = [BlendMode::Normal, BlendMode::Multiply];
        let target = Vec3::new(0.5, 0.5, 0.5);
        let gray = [1usize];

        let jac = constraint_jacobian(
            &alphas,
            &colors,
            &comp_ops,
            &modes,
            AlphaConstraint::CompositedUnity,
            &gray,
        );

        let x = vecx(&[0.8, 0.5, 0.9, 0.2, 0.4, 0.3, 0.6, 0.5]);
        let eval = |x: &VecX| {
            let (alphas, colors) = split_unknowns(x);
            constraint_vector(
                &alphas,
                &colors,
                &target,
                &comp_ops,
                &modes,
                AlphaConstraint::CompositedUnity,
                &gray,
            )
        };

        let h = 1e-6;
        for row in 0..x.len() {
            let mut hi = x.clone();
            let mut lo = x.clone();
            hi[row] += h;
            lo[row] -= h;
            let fd = (eval(&hi) - eval(&lo)) / (2.0 * h);
            for col in 0..fd.len() {
                let diff = (jac[(row, col)] - fd[col]).abs();
                assert!(
                    diff / fd[col].abs().max(1.0) < 1e-4,
                    "entry ({row},{col}): {} vs {}",
                    jac[(row, col)],
                    fd[col]
                );
            }
        }
    }

    #[test]
    fn energy_is_monotone_in_inverse_covariance_scale() {
        let alphas = vecx(&[0.5]);
        let colors = vecx(&[0.9, 0.1, 0.3]);
        let mut previous = f64::NEG_INFINITY;
        for scale in [0.5, 1.0, 2.0, 8.0, 32.0] {
            let model = GaussianColorModel::from_inverse_covariance(
                Vec3::new(0.2, 0.2, 0.2),
                Mat3::identity() * scale,
            )
            .unwrap();
            let models: [&dyn ColorModel; 1] = [&model];
            let energy = unmixing_energy(&alphas, &colors, &models, 10.0, false, false);
            assert!(energy >= previous);
            previous = energy;
        }
    }

    #[test]
    fn energy_gradient_matches_finite_differences() {
        let model_a = GaussianColorModel::from_inverse_covariance(
            Vec3::new(0.9, 0.9, 0.9),
            Mat3::identity() * 2.0,
        )
        .unwrap();
        let model_b = GaussianColorModel::from_inverse_covariance(
            Vec3::new(0.1, 0.2, 0.3),
            Mat3::identity() * 4.0,
        )
        .unwrap();
        let models: [&dyn ColorModel; 2] = [&model_a, &model_b];

        let x = vecx(&[0.6, 0.4, 0.8, 0.7, 0.9, 0.3, 0.2, 0.1]);
        let (alphas, colors) = split_unknowns(&x);
        let grad = energy_gradient(&alphas, &colors, &models, 10.0, true, true);

        let h = 1e-6;
        for i in 0..x.len() {
            let mut hi = x.clone();
            let mut lo = x.clone();
            hi[i] += h;
            lo[i] -= h;
            let (ah, ch) = split_unknowns(&hi);
            let (al, cl) = split_unknowns(&lo);
            let fd = (unmixing_energy(&ah, &ch, &models, 10.0, true, true)
                - unmixing_energy(&al, &cl, &models, 10.0, true, true))
                / (2.0 * h);
            assert!((grad[i] - fd).abs() < 1e-4, "component {i}: {} vs {fd}", grad[i]);
        }
    }
}
