//! Bounded local refinement of similarity parameters.
//!
//! The refinement searches a `(scale, rotation_deg, dy, dx)` correction,
//! applied about the reference center on top of a coarse transform, that
//! minimizes the masked RMSE between the normalized warped object and the
//! normalized reference. The search is a damped least-squares descent on the
//! scalar residual: a forward-difference gradient drives steps solved from
//! the damped normal equations `(g g^T + lambda |g|^2 I) delta = -r g`, each
//! step projected onto the caller's box bounds. It starts from a good coarse
//! estimate and runs on a small residual-evaluation budget; the best iterate
//! is always returned, so exhausting the budget is not a failure.

use ptyalign_image::Image;
use ptyalign_imgproc::interpolation::InterpolationMode;
use ptyalign_imgproc::metrics::masked_rmse;
use ptyalign_imgproc::normalize::normalize_within_mask;
use ptyalign_imgproc::warp::{validity_mask, warp_similarity, SimilarityTransform};

use crate::error::RegisterError;

/// Relative step used by the forward-difference gradient; large enough to
/// stay above the f32 resampling noise floor.
const GRADIENT_STEP: f64 = 1e-3;

/// Steps smaller than this are considered zero.
const STEP_SIZE_TOLERANCE: f64 = 1e-10;

/// A similarity correction applied about the reference center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinementParams {
    /// Uniform scale correction.
    pub scale: f64,
    /// Rotation correction in degrees.
    pub rotation_deg: f64,
    /// Row shift correction in pixels.
    pub dy: f64,
    /// Column shift correction in pixels.
    pub dx: f64,
}

impl RefinementParams {
    /// The identity correction `(1, 0, 0, 0)`.
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            rotation_deg: 0.0,
            dy: 0.0,
            dx: 0.0,
        }
    }

    fn to_array(self) -> [f64; 4] {
        [self.scale, self.rotation_deg, self.dy, self.dx]
    }

    fn from_array(x: [f64; 4]) -> Self {
        Self {
            scale: x[0],
            rotation_deg: x[1],
            dy: x[2],
            dx: x[3],
        }
    }
}

/// Box bounds for the refinement search, ordered as
/// `(scale, rotation_deg, dy, dx)`.
#[derive(Debug, Clone)]
pub struct RefinementBounds {
    /// Lower bounds.
    pub lower: [f64; 4],
    /// Upper bounds.
    pub upper: [f64; 4],
}

impl RefinementBounds {
    /// Default bounds for a reference with the given physical pixel spacing:
    /// scale within [0.95, 1.05], rotation within [-5, 5] degrees, and
    /// translation within two physical units converted to reference pixels.
    pub fn for_reference_spacing(reference_spacing: f64) -> Self {
        let max_shift = 2.0 / reference_spacing;
        Self {
            lower: [0.95, -5.0, -max_shift, -max_shift],
            upper: [1.05, 5.0, max_shift, max_shift],
        }
    }

    fn clamp(&self, x: [f64; 4]) -> [f64; 4] {
        let mut clamped = x;
        for i in 0..4 {
            clamped[i] = clamped[i].clamp(self.lower[i], self.upper[i]);
        }
        clamped
    }
}

/// Configuration for the refinement search.
#[derive(Debug, Clone)]
pub struct RefinementConfig {
    /// Box bounds for the parameters.
    pub bounds: RefinementBounds,
    /// Budget of residual evaluations, including gradient probes.
    pub max_evaluations: usize,
    /// Convergence threshold on the cost improvement of an accepted step.
    pub cost_tolerance: f64,
    /// Convergence threshold on the gradient norm.
    pub gradient_tolerance: f64,
    /// Initial damping parameter.
    pub lambda_init: f64,
    /// Factor for damping adaptation.
    pub lambda_factor: f64,
    /// Maximum damping parameter.
    pub lambda_max: f64,
}

impl RefinementConfig {
    /// Create a configuration with the given bounds and evaluation budget.
    pub fn new(bounds: RefinementBounds, max_evaluations: usize) -> Self {
        Self {
            bounds,
            max_evaluations,
            cost_tolerance: 1e-8,
            gradient_tolerance: 1e-10,
            lambda_init: 1e-3,
            lambda_factor: 10.0,
            lambda_max: 1e10,
        }
    }
}

/// Reason why the refinement terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Converged: cost improvement below tolerance.
    CostConverged,
    /// Converged: gradient norm below tolerance.
    GradientConverged,
    /// The residual-evaluation budget was exhausted.
    EvaluationBudget,
    /// Damping exceeded its maximum without an acceptable step.
    LambdaMaxExceeded,
}

/// Result of the refinement search.
#[derive(Debug, Clone)]
pub struct RefinementResult {
    /// Best correction found.
    pub params: RefinementParams,
    /// Masked RMSE at the best correction.
    pub rmse: f64,
    /// Number of residual evaluations performed.
    pub evaluations: usize,
    /// Number of outer iterations performed.
    pub iterations: usize,
    /// Reason for termination.
    pub termination: TerminationReason,
}

/// Masked RMSE of the object warped under `correction * coarse` against the
/// reference.
///
/// A trial whose validity mask is empty yields residual 0.0: a deliberate
/// flat region that keeps the search from diverging on degenerate proposals,
/// not a perfect fit.
fn alignment_residual(
    object: &Image<f32, 1>,
    reference: &Image<f32, 1>,
    coarse: &SimilarityTransform,
    reference_center: (f64, f64),
    x: &[f64; 4],
) -> Result<f64, RegisterError> {
    let correction = SimilarityTransform::from_params(x[0], x[1], x[2], x[3], reference_center);
    let total = correction.compose(coarse);

    let mut warped = Image::from_size_val(reference.size(), f32::NAN)?;
    warp_similarity(object, &mut warped, &total, InterpolationMode::Bilinear)?;
    let mask = validity_mask(object.size(), &total, reference.size())?;

    if !mask.as_slice().iter().any(|&m| m) {
        return Ok(0.0);
    }

    let warped_norm = normalize_within_mask(&warped, &mask)?;
    let reference_norm = normalize_within_mask(reference, &mask)?;

    Ok(masked_rmse(&warped_norm, &reference_norm, &mask)?)
}

/// Refine the similarity correction that best aligns the warped object to
/// the reference.
///
/// The search is seeded at the identity correction and never fails on
/// non-convergence: the best iterate within the evaluation budget is always
/// returned.
///
/// # Arguments
///
/// * `object` - The raw object image.
/// * `reference` - The reference image.
/// * `coarse` - The coarse object-to-reference transform the correction
///   composes on top of.
/// * `reference_center` - The `(row, col)` center of the reference image.
/// * `config` - Bounds, evaluation budget and damping settings.
///
/// # Errors
///
/// Propagates warp and normalization failures; degenerate trial proposals
/// are not errors.
pub fn refine(
    object: &Image<f32, 1>,
    reference: &Image<f32, 1>,
    coarse: &SimilarityTransform,
    reference_center: (f64, f64),
    config: &RefinementConfig,
) -> Result<RefinementResult, RegisterError> {
    let bounds = &config.bounds;

    let mut x = bounds.clamp(RefinementParams::identity().to_array());
    let mut cost = alignment_residual(object, reference, coarse, reference_center, &x)?;
    let mut evaluations = 1usize;

    let mut best_x = x;
    let mut best_cost = cost;

    let mut lambda = config.lambda_init;
    let mut iterations = 0usize;
    let mut termination = TerminationReason::EvaluationBudget;

    'outer: while evaluations < config.max_evaluations {
        iterations += 1;

        // forward-difference gradient, probing inward at the upper bound
        let mut gradient = [0.0f64; 4];
        for i in 0..4 {
            if evaluations >= config.max_evaluations {
                break 'outer;
            }
            let step = GRADIENT_STEP * x[i].abs().max(1.0);
            let step = if x[i] + step > bounds.upper[i] {
                -step
            } else {
                step
            };
            let mut probe = x;
            probe[i] += step;
            let probe_cost =
                alignment_residual(object, reference, coarse, reference_center, &probe)?;
            evaluations += 1;
            gradient[i] = (probe_cost - cost) / step;
        }

        let gradient_norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
        if gradient_norm < config.gradient_tolerance {
            termination = TerminationReason::GradientConverged;
            break;
        }

        // inner damping loop: retry with stronger damping until a step
        // reduces the cost
        loop {
            if evaluations >= config.max_evaluations {
                break 'outer;
            }

            // damped normal equations (g g^T + lambda |g|^2 I) delta = -cost * g
            let damping = lambda * gradient_norm * gradient_norm;
            let mut lhs = [[0.0f64; 4]; 4];
            let mut rhs = [0.0f64; 4];
            for i in 0..4 {
                for j in 0..4 {
                    lhs[i][j] = gradient[i] * gradient[j];
                }
                lhs[i][i] += damping;
                rhs[i] = -cost * gradient[i];
            }

            let delta = match solve_linear_4(lhs, rhs) {
                Some(delta) => delta,
                None => {
                    lambda *= config.lambda_factor;
                    if lambda > config.lambda_max {
                        termination = TerminationReason::LambdaMaxExceeded;
                        break 'outer;
                    }
                    continue;
                }
            };

            let mut x_new = x;
            for i in 0..4 {
                x_new[i] += delta[i];
            }
            let x_new = bounds.clamp(x_new);

            let step_norm = x_new
                .iter()
                .zip(x.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt();
            if step_norm < STEP_SIZE_TOLERANCE {
                // the step is pinned at the bounds or vanishingly small
                termination = TerminationReason::CostConverged;
                break 'outer;
            }

            let cost_new =
                alignment_residual(object, reference, coarse, reference_center, &x_new)?;
            evaluations += 1;

            if cost_new < cost {
                let improvement = cost - cost_new;
                x = x_new;
                cost = cost_new;
                if cost < best_cost {
                    best_cost = cost;
                    best_x = x;
                }
                lambda = (lambda / config.lambda_factor).max(1e-12);
                if improvement < config.cost_tolerance {
                    termination = TerminationReason::CostConverged;
                    break 'outer;
                }
                break;
            }

            lambda *= config.lambda_factor;
            if lambda > config.lambda_max {
                termination = TerminationReason::LambdaMaxExceeded;
                break 'outer;
            }
        }

        log::debug!(
            "refine iteration {iterations}: cost {cost:.6}, lambda {lambda:.2e}, evaluations {evaluations}"
        );
    }

    Ok(RefinementResult {
        params: RefinementParams::from_array(best_x),
        rmse: best_cost,
        evaluations,
        iterations,
        termination,
    })
}

/// Solve a 4x4 linear system with partial pivoting.
fn solve_linear_4(mut a: [[f64; 4]; 4], mut b: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot_row][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in (col + 1)..4 {
            let factor = a[row][col] / a[col][col];
            for k in col..4 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f64; 4];
    for row in (0..4).rev() {
        let mut sum = b[row];
        for col in (row + 1)..4 {
            sum -= a[row][col] * x[col];
        }
        x[row] = sum / a[row][row];
    }

    Some(x)
}
