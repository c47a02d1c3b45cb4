//! Bound-constrained limited-memory BFGS.
//!
//! The inner unconstrained stage of the augmented-Lagrangian solver. Search
//! directions come from the standard two-loop recursion; bounds are handled
//! by projecting trial points onto the box and backtracking along the
//! projected path with an Armijo condition. The contract is deliberately
//! loose: monotonic-ish descent and guaranteed termination within the
//! iteration budget, with the best visited point returned.

use std::collections::VecDeque;

use crate::unmixing::VecX;

/// Tuning knobs for [`minimize_bounded`].
#[derive(Debug, Clone)]
pub struct LbfgsOptions {
    /// Hard cap on outer quasi-Newton iterations.
    pub max_iterations: usize,
    /// Terminate once the projected-gradient norm falls below this.
    pub gradient_tolerance: f64,
    /// Number of curvature pairs kept for the two-loop recursion.
    pub memory: usize,
    /// Armijo sufficient-decrease coefficient.
    pub armijo_c1: f64,
    /// Step shrink factor during backtracking.
    pub backtrack_factor: f64,
    /// Cap on backtracking steps per line search.
    pub max_line_search_steps: usize,
}

impl Default for LbfgsOptions {
    fn default() -> Self {
        LbfgsOptions {
            max_iterations: 1000,
            gradient_tolerance: 5e-3,
            memory: 8,
            armijo_c1: 1e-4,
            backtrack_factor: 0.5,
            max_line_search_steps: 30,
        }
    }
}

fn project(x: &VecX, lower: &VecX, upper: &VecX) -> VecX {
    VecX::from_iterator(x.len(), x.iter().enumerate().map(|(i, &v)| v.clamp(lower[i], upper[i])))
}

/// Two-loop recursion over the stored curvature pairs.
fn search_direction(gradient: &VecX, history: &VecDeque<(VecX, VecX, f64)>) -> VecX {
    let mut q = gradient.clone();
    let mut coefficients = Vec::with_capacity(history.len());

    for (s, y, rho) in history.iter().rev() {
        let alpha = rho * s.dot(&q);
        q -= y * alpha;
        coefficients.push(alpha);
    }

    // Initial Hessian scaling from the most recent pair.
    if let Some((s, y, _)) = history.back() {
        let yy = y.dot(y);
        if yy > 0.0 {
            q *= s.dot(y) / yy;
        }
    }

    for ((s, y, rho), alpha) in history.iter().zip(coefficients.into_iter().rev()) {
        let beta = rho * y.dot(&q);
        q += s * (alpha - beta);
    }

    -q
}

/// Minimizes `objective` over the box `[lower, upper]`.
///
/// `objective` evaluates the function at a point and writes its gradient
/// into the second argument. The returned point is the best (lowest
/// objective) iterate visited, projected into the box.
pub fn minimize_bounded<F>(
    mut objective: F,
    x0: &VecX,
    lower: &VecX,
    upper: &VecX,
    options: &LbfgsOptions,
) -> VecX
where
    F: FnMut(&VecX, &mut VecX) -> f64,
{
    let n = x0.len();
    debug_assert_eq!(lower.len(), n);
    debug_assert_eq!(upper.len(), n);

    let mut x = project(x0, lower, upper);
    let mut gradient = VecX::zeros(n);
    let mut f = objective(&x, &mut gradient);

    let mut best_x = x.clone();
    let mut best_f = f;

    let mut history: VecDeque<(VecX, VecX, f64)> = VecDeque::with_capacity(options.memory);

    for _ in 0..options.max_iterations {
        // Projected gradient measures stationarity on the box.
        let projected_gradient = &x - project(&(&x - &gradient), lower, upper);
        if projected_gradient.norm() < options.gradient_tolerance {
            break;
        }

        let mut direction = search_direction(&gradient, &history);
        if direction.dot(&gradient) >= 0.0 {
            // Not a descent direction; fall back to steepest descent.
            history.clear();
            direction = -&gradient;
        }

        // Backtracking Armijo search along the projected path.
        let mut step = 1.0;
        let mut accepted = None;
        for _ in 0..options.max_line_search_steps {
            let candidate = project(&(&x + &direction * step), lower, upper);
            let displacement = &candidate - &x;
            if displacement.norm() == 0.0 {
                break;
            }
            let mut candidate_gradient = VecX::zeros(n);
            let candidate_f = objective(&candidate, &mut candidate_gradient);
            if candidate_f <= f + options.armijo_c1 * gradient.dot(&displacement) {
                accepted = Some((candidate, candidate_gradient, candidate_f));
                break;
            }
            step *= options.backtrack_factor;
        }

        let Some((x_new, gradient_new, f_new)) = accepted else {
            // Line search stalled; the current point is as good as it gets.
            break;
        };

        let s = &x_new - &x;
        let y = &gradient_new - &gradient;
        let sy = s.dot(&y);
        if sy > 1e-10 {
            if history.len() == options.memory {
                history.pop_front();
            }
            history.push_back((s, y, 1.0 / sy));
        }

        x = x_new;
        gradient = gradient_new;
        f = f_new;

        if f < best_f {
            best_f = f;
            best_x = x.clone();
        }
    }

    best_x
}
