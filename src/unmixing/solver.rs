//! Per-pixel augmented-Lagrangian solver.
//!
//! Minimizes the unmixing energy subject to the color-match and alpha
//! constraints by alternating a bound-constrained quasi-Newton inner solve
//! of `L(x) = E(x) − λᵗg(x) + (ρ/2)‖g(x)‖²` with multiplier and penalty
//! updates. Convergence is best-effort: the loop stops on the joint
//! step-size/residual test or at the outer iteration cap, whichever comes
//! first, and callers that care must re-check `g(x*)` themselves.

use crate::unmixing::color_model::ColorModel;
use crate::unmixing::equations::{
    constraint_jacobian, constraint_vector, energy_gradient, lagrange_term, penalty_term,
    split_unknowns, unmixing_energy, AlphaConstraint,
};
use crate::unmixing::layer_stack::LayerStack;
use crate::unmixing::lbfgs::{minimize_bounded, LbfgsOptions};
use crate::unmixing::{Vec3, VecX};

const GAMMA: f64 = 0.25;
const BETA: f64 = 10.0;
const INITIAL_RHO: f64 = 100.0;
const EPSILON: f64 = 5e-3;
const MAX_OUTER_ITERATIONS: usize = 20;
const INNER_ITERATION_BUDGET: usize = 1000;

/// Runtime switches for the per-pixel energy.
///
/// The sparsity and minimum-alpha regularizers default to off; gray layers
/// list the indices whose colors are constrained onto the achromatic
/// diagonal.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    pub use_sparsity: bool,
    pub use_minimum_alpha: bool,
    pub sparsity_weight: f64,
    pub gray_layers: Vec<usize>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            use_sparsity: false,
            use_minimum_alpha: false,
            sparsity_weight: 10.0,
            gray_layers: Vec::new(),
        }
    }
}

/// Which pass a per-pixel solve belongs to.
pub enum PixelSolveMode<'a> {
    /// Initial decomposition: composited alpha driven to 1, unknowns seeded
    /// from the color models.
    Initial { opaque_background: bool },
    /// Matte refinement: alphas pinned to smoothed targets, colors seeded
    /// from the prior layers.
    Refinement {
        /// Prior per-layer colors, length 3N.
        initial_colors: &'a VecX,
        /// Smoothed alpha targets, length N.
        target_alphas: &'a VecX,
        opaque_background: bool,
        /// When set, layer 0's color is pinned to this value.
        smooth_background: Option<Vec3>,
    },
}

/// Solves the constrained per-pixel unmixing problem for one target color.
///
/// Returns the unknown vector `[alphas (N) | colors (3N)]`, every component
/// inside [0,1]. Non-convergence is not reported; the best available point
/// is returned once the outer cap is reached.
pub fn solve_pixel(
    target_color: &Vec3,
    stack: &LayerStack,
    mode: &PixelSolveMode<'_>,
    options: &SolverOptions,
) -> VecX {
    let num_layers = stack.len();
    let models = stack.color_models();
    let comp_ops = stack.comp_ops();
    let modes = stack.blend_modes();

    let mut lower = VecX::zeros(num_layers * 4);
    let mut upper = VecX::from_element(num_layers * 4, 1.0);
    let mut x = initial_solution(&models);

    let (use_minimum_alpha, target_alphas) = match mode {
        PixelSolveMode::Initial { opaque_background } => {
            if *opaque_background {
                lower[0] = 1.0;
                x[0] = 1.0;
            }
            (options.use_minimum_alpha, None)
        }
        PixelSolveMode::Refinement {
            initial_colors,
            target_alphas,
            opaque_background,
            smooth_background,
        } => {
            for i in 0..num_layers {
                x[i] = target_alphas[i];
            }
            for i in 0..num_layers * 3 {
                x[num_layers + i] = initial_colors[i];
            }
            if *opaque_background {
                lower[0] = 1.0;
                x[0] = 1.0;
            }
            if let Some(background) = smooth_background {
                for i in 0..3 {
                    lower[num_layers + i] = background[i];
                    upper[num_layers + i] = background[i];
                    x[num_layers + i] = background[i];
                }
            }
            // The refinement energy drops the regularizers; alphas are
            // already pinned by the constraint.
            (false, Some(*target_alphas))
        }
    };

    let alpha_constraint = match target_alphas {
        Some(targets) => AlphaConstraint::TargetAlphas(targets),
        None => AlphaConstraint::CompositedUnity,
    };

    let num_alpha_constraints = if target_alphas.is_some() { num_layers } else { 1 };
    let num_constraints = 3 + num_alpha_constraints + 3 * options.gray_layers.len();

    let mut lambda = VecX::zeros(num_constraints);
    let mut rho = INITIAL_RHO;

    let inner_options = LbfgsOptions {
        max_iterations: INNER_ITERATION_BUDGET,
        gradient_tolerance: EPSILON,
        ..LbfgsOptions::default()
    };

    let evaluate_constraints = |x: &VecX| {
        let (alphas, colors) = split_unknowns(x);
        constraint_vector(
            &alphas,
            &colors,
            target_color,
            &comp_ops,
            &modes,
            alpha_constraint,
            &options.gray_layers,
        )
    };

    for iteration in 0.. {
        let lambda_snapshot = lambda.clone();
        let objective = |x: &VecX, grad: &mut VecX| {
            let (alphas, colors) = split_unknowns(x);
            let constraints = constraint_vector(
                &alphas,
                &colors,
                target_color,
                &comp_ops,
                &modes,
                alpha_constraint,
                &options.gray_layers,
            );
            let jacobian = constraint_jacobian(
                &alphas,
                &colors,
                &comp_ops,
                &modes,
                alpha_constraint,
                &options.gray_layers,
            );
            let energy_grad = energy_gradient(
                &alphas,
                &colors,
                &models,
                options.sparsity_weight,
                options.use_sparsity,
                use_minimum_alpha,
            );
            grad.copy_from(&(energy_grad + &jacobian * (&constraints * rho - &lambda_snapshot)));

            unmixing_energy(
                &alphas,
                &colors,
                &models,
                options.sparsity_weight,
                options.use_sparsity,
                use_minimum_alpha,
            ) + lagrange_term(&constraints, &lambda_snapshot)
                + penalty_term(&constraints, rho)
        };

        let x_new = minimize_bounded(objective, &x, &lower, &upper, &inner_options);

        let g = evaluate_constraints(&x);
        let g_new = evaluate_constraints(&x_new);

        lambda -= &g_new * rho;
        if g_new.norm() > GAMMA * g.norm() {
            rho *= BETA;
        }

        let is_unchanged = (&x_new - &x).norm() < EPSILON;
        let is_satisfied = g_new.norm() < EPSILON;

        x = x_new;

        if (is_unchanged && is_satisfied) || iteration >= MAX_OUTER_ITERATIONS {
            break;
        }
    }

    x
}

/// Alphas at 0.5, colors at each model's representative color.
fn initial_solution(models: &[&dyn ColorModel]) -> VecX {
    let num_layers = models.len();
    let mut x = VecX::zeros(num_layers * 4);
    for index in 0..num_layers {
        x[index] = 0.5;
        let color = models[index].representative_color();
        x[num_layers + index * 3] = color[0];
        x[num_layers + index * 3 + 1] = color[1];
        x[num_layers + index * 3 + 2] = color[2];
    }
    x
}
