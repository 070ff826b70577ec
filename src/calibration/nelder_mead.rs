//! Nelder–Mead downhill simplex minimiser.
//!
//! Derivative-free direct search on `D` parameters, with the standard (non-adaptive)
//! coefficients: reflection 1, expansion 2, contraction ½, shrink ½. The initial simplex
//! perturbs each coordinate of the starting point by 5 %, or sets it to `0.00025` when it is
//! zero. Convergence requires both the simplex extent (`xatol`) and the spread of the cost
//! values (`fatol`) to fall under their tolerances, as in SciPy's `method="Nelder-Mead"`.
use std::cmp::Ordering;

use nalgebra::SVector;

use crate::coadd_errors::CoaddError;

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;
const NONZERO_DELTA: f64 = 0.05;
const ZERO_DELTA: f64 = 0.00025;

/// Tolerances and budgets of the simplex search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NelderMeadParams {
    /// Absolute tolerance on the simplex extent.
    pub xatol: f64,
    /// Absolute tolerance on the cost spread across vertices.
    pub fatol: f64,
    /// Maximum iterations, `None` for `200 · D`.
    pub max_iter: Option<usize>,
    /// Maximum cost evaluations, `None` for `200 · D`.
    pub max_fev: Option<usize>,
}

impl Default for NelderMeadParams {
    fn default() -> Self {
        NelderMeadParams {
            xatol: 1e-4,
            fatol: 1e-4,
            max_iter: None,
            max_fev: None,
        }
    }
}

impl NelderMeadParams {
    /// Check tolerances are positive and budgets non-zero.
    pub fn validate(&self) -> Result<(), CoaddError> {
        if !(self.xatol > 0.0) || !(self.fatol > 0.0) {
            return Err(CoaddError::InvalidCoaddParameter(
                "Nelder-Mead tolerances must be > 0".into(),
            ));
        }
        if self.max_iter == Some(0) || self.max_fev == Some(0) {
            return Err(CoaddError::InvalidCoaddParameter(
                "Nelder-Mead budgets must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a simplex search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NelderMeadResult<const D: usize> {
    pub x: SVector<f64, D>,
    pub fun: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

/// Minimise `cost` starting from `x0`.
///
/// Arguments
/// -----------------
/// * `cost`: objective, called once per vertex evaluation.
/// * `x0`: initial guess.
/// * `params`: tolerances and budgets.
///
/// Return
/// ----------
/// * The best vertex of the final simplex and search statistics. A NaN cost orders after
///   every finite cost, so a vertex producing NaN is never reported as the best one unless
///   every vertex does.
pub fn minimize<const D: usize, F>(
    mut cost: F,
    x0: SVector<f64, D>,
    params: &NelderMeadParams,
) -> NelderMeadResult<D>
where
    F: FnMut(&SVector<f64, D>) -> f64,
{
    let max_iter = params.max_iter.unwrap_or(200 * D);
    let max_fev = params.max_fev.unwrap_or(200 * D);

    let mut evaluations = 0;
    let mut eval = |x: &SVector<f64, D>, count: &mut usize| {
        *count += 1;
        cost(x)
    };

    let mut simplex: Vec<(SVector<f64, D>, f64)> = Vec::with_capacity(D + 1);
    simplex.push((x0, eval(&x0, &mut evaluations)));
    for k in 0..D {
        let mut y = x0;
        if y[k] != 0.0 {
            y[k] *= 1.0 + NONZERO_DELTA;
        } else {
            y[k] = ZERO_DELTA;
        }
        let fy = eval(&y, &mut evaluations);
        simplex.push((y, fy));
    }
    sort_simplex(&mut simplex);

    let mut iterations = 0;
    let mut converged = false;
    while iterations < max_iter && evaluations < max_fev {
        let (best_x, best_f) = simplex[0];
        let x_extent = simplex[1..]
            .iter()
            .map(|(x, _)| (x - best_x).abs().max())
            .fold(0.0, f64::max);
        let f_spread = simplex[1..]
            .iter()
            .map(|(_, f)| (f - best_f).abs())
            .fold(0.0, f64::max);
        if x_extent <= params.xatol && f_spread <= params.fatol {
            converged = true;
            break;
        }

        let xbar: SVector<f64, D> =
            simplex[..D].iter().map(|(x, _)| *x).sum::<SVector<f64, D>>() / D as f64;
        let (worst_x, worst_f) = simplex[D];
        let second_worst_f = simplex[D - 1].1;

        let xr = xbar * (1.0 + REFLECTION) - worst_x * REFLECTION;
        let fxr = eval(&xr, &mut evaluations);
        let mut shrink = false;

        if fxr < best_f {
            let xe = xbar * (1.0 + REFLECTION * EXPANSION) - worst_x * (REFLECTION * EXPANSION);
            let fxe = eval(&xe, &mut evaluations);
            simplex[D] = if fxe < fxr { (xe, fxe) } else { (xr, fxr) };
        } else if fxr < second_worst_f {
            simplex[D] = (xr, fxr);
        } else if fxr < worst_f {
            // outside contraction
            let xc = xbar * (1.0 + CONTRACTION * REFLECTION) - worst_x * (CONTRACTION * REFLECTION);
            let fxc = eval(&xc, &mut evaluations);
            if fxc <= fxr {
                simplex[D] = (xc, fxc);
            } else {
                shrink = true;
            }
        } else {
            // inside contraction
            let xcc = xbar * (1.0 - CONTRACTION) + worst_x * CONTRACTION;
            let fxcc = eval(&xcc, &mut evaluations);
            if fxcc < worst_f {
                simplex[D] = (xcc, fxcc);
            } else {
                shrink = true;
            }
        }

        if shrink {
            let anchor = simplex[0].0;
            for vertex in simplex.iter_mut().skip(1) {
                let x = anchor + (vertex.0 - anchor) * SHRINK;
                *vertex = (x, eval(&x, &mut evaluations));
            }
        }

        iterations += 1;
        sort_simplex(&mut simplex);
    }

    let (x, fun) = simplex[0];
    NelderMeadResult {
        x,
        fun,
        iterations,
        evaluations,
        converged,
    }
}

fn sort_simplex<const D: usize>(simplex: &mut [(SVector<f64, D>, f64)]) {
    simplex.sort_by(|a, b| match (a.1.is_nan(), b.1.is_nan()) {
        (false, false) => a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    });
}

#[cfg(test)]
mod nelder_mead_tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector2;

    #[test]
    fn test_quadratic_bowl() {
        let result = minimize(
            |x: &Vector2<f64>| (x[0] - 3.0).powi(2) + 10.0 * (x[1] + 1.5).powi(2),
            Vector2::new(1.0, 0.0),
            &NelderMeadParams::default(),
        );
        assert!(result.converged);
        assert_abs_diff_eq!(result.x[0], 3.0, epsilon = 1e-3);
        assert_abs_diff_eq!(result.x[1], -1.5, epsilon = 1e-3);
    }

    #[test]
    fn test_rosenbrock_with_tight_tolerances() {
        let params = NelderMeadParams {
            xatol: 1e-10,
            fatol: 1e-10,
            max_iter: Some(5000),
            max_fev: Some(10000),
        };
        let result = minimize(
            |x: &Vector2<f64>| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2),
            Vector2::new(-1.2, 1.0),
            &params,
        );
        assert_abs_diff_eq!(result.x[0], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(result.x[1], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_budget_is_respected() {
        let params = NelderMeadParams {
            max_iter: Some(3),
            ..NelderMeadParams::default()
        };
        let result = minimize(
            |x: &Vector2<f64>| x.norm_squared(),
            Vector2::new(50.0, -20.0),
            &params,
        );
        assert_eq!(result.iterations, 3);
        assert!(!result.converged);
    }

    #[test]
    fn test_starting_at_optimum() {
        let result = minimize(
            |x: &Vector2<f64>| (x[0] - 1.0).powi(2) + x[1].powi(2),
            Vector2::new(1.0, 0.0),
            &NelderMeadParams::default(),
        );
        assert_eq!(result.fun, 0.0);
        assert_eq!(result.x, Vector2::new(1.0, 0.0));
    }

    #[test]
    fn test_invalid_params() {
        let params = NelderMeadParams {
            xatol: 0.0,
            ..NelderMeadParams::default()
        };
        assert!(params.validate().is_err());
        assert!(NelderMeadParams::default().validate().is_ok());
    }
}
