//! # Smoothing spline
//!
//! [`SmoothCurve`] is a degree-`k` B-spline fitted to `(time, value)` pairs with a roughness
//! penalty, the smoothing factor `s` bounding the residual sum of squares:
//!
//! ```text
//! minimise  Σ (y_i − f(x_i))²  +  λ · ‖Δᵈ c‖²     with λ chosen so that  Σ (y_i − f(x_i))² ≈ s
//! ```
//!
//! where `c` are the B-spline coefficients and `Δᵈ` the order-`d` difference operator
//! (`d = k + 1` by default).
//!
//! ## Algorithm
//! -----------------
//! 1. Fit the least-squares polynomial of degree `k` (a B-spline with no interior knot). If its
//!    residual already satisfies `RSS ≤ s`, it is the result.
//! 2. Otherwise place up to `max_interior_knots` uniform interior knots on `[x_min, x_max]`.
//! 3. Solve the penalised normal equations `(BᵀB + λ DᵀD) c = Bᵀy` by Cholesky, with `λ`
//!    found by bisection in log space so that `RSS(λ) ≈ s`. If even the least-penalised fit
//!    exceeds `s`, that fit is returned.
//!
//! Outside `[x_min, x_max]` the curve extrapolates the end polynomial pieces.
//!
//! See also
//! ------------
//! * [`TemporalSmoother`](crate::smoothing::TemporalSmoother) – fits one curve per calibration
//!   parameter.
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::coadd_errors::CoaddError;

/// `λ` bisection range, relative to the scale of the normal equations.
const LOG_LAMBDA_MIN: f64 = -8.0;
const LOG_LAMBDA_MAX: f64 = 8.0;
const BISECTION_STEPS: usize = 64;

/// Fitting options of a [`SmoothCurve`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveFitOptions {
    pub degree: usize,
    /// Target residual sum of squares.
    pub smoothing: f64,
    pub max_interior_knots: usize,
}

/// Fitted smoothing curve, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothCurve {
    degree: usize,
    knots: Vec<f64>,
    coefficients: Vec<f64>,
    /// Residual sum of squares on the fitted data.
    residual: f64,
}

impl SmoothCurve {
    /// Fit a smoothing curve through `(x, y)`.
    ///
    /// Arguments
    /// -----------------
    /// * `x`: abscissae (need not be sorted).
    /// * `y`: ordinates, aligned with `x`.
    /// * `options`: degree, smoothing factor and knot budget.
    ///
    /// Return
    /// ----------
    /// * `Err(CoaddError::InsufficientSplineData)` if there are not more distinct abscissae
    ///   than the degree.
    /// * `Err(CoaddError::SingularSplineSystem)` if the normal equations cannot be factorised.
    pub fn fit(x: &[f64], y: &[f64], options: &CurveFitOptions) -> Result<Self, CoaddError> {
        if x.len() != y.len() {
            return Err(CoaddError::InvalidSmootherParameter(format!(
                "{} abscissae for {} ordinates",
                x.len(),
                y.len()
            )));
        }
        if !(options.smoothing >= 0.0) {
            return Err(CoaddError::InvalidSmootherParameter(
                "smoothing factor must be >= 0".into(),
            ));
        }
        let k = options.degree;

        let mut points: Vec<(f64, f64)> = x.iter().copied().zip(y.iter().copied()).collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.1).collect();

        let distinct = 1 + xs.windows(2).filter(|w| w[1] > w[0]).count();
        if xs.is_empty() || distinct <= k {
            return Err(CoaddError::InsufficientSplineData {
                degree: k,
                found: if xs.is_empty() { 0 } else { distinct },
            });
        }
        let (x_min, x_max) = (xs[0], xs[xs.len() - 1]);

        let polynomial = PenalizedSystem::new(&xs, &ys, clamped_knots(x_min, x_max, k, 0), k, k + 1);
        let poly_fit = polynomial.solve(0.0)?;
        if poly_fit.residual <= options.smoothing {
            return Ok(poly_fit);
        }

        let interior = options.max_interior_knots.min(distinct - k - 1);
        if interior == 0 {
            return Ok(poly_fit);
        }
        let system = PenalizedSystem::new(
            &xs,
            &ys,
            clamped_knots(x_min, x_max, k, interior),
            k,
            k + 1,
        );

        let scale = system.lambda_scale();
        let lambda = |log_lambda: f64| scale * 10f64.powf(log_lambda);

        let loose = system.solve(lambda(LOG_LAMBDA_MIN))?;
        if loose.residual >= options.smoothing {
            return Ok(loose);
        }
        let stiff = system.solve(lambda(LOG_LAMBDA_MAX))?;
        if stiff.residual <= options.smoothing {
            return Ok(stiff);
        }

        // residual grows with λ: keep the largest λ that still meets the target
        let (mut lo, mut hi) = (LOG_LAMBDA_MIN, LOG_LAMBDA_MAX);
        let mut best = loose;
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (lo + hi);
            let candidate = system.solve(lambda(mid))?;
            if candidate.residual <= options.smoothing {
                lo = mid;
                best = candidate;
            } else {
                hi = mid;
            }
        }
        Ok(best)
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Residual sum of squares on the fitted data.
    pub fn residual(&self) -> f64 {
        self.residual
    }

    /// Value of the curve at `x`, `NaN` for a malformed (e.g. hand-edited) curve.
    pub fn evaluate(&self, x: f64) -> f64 {
        let nb = self.coefficients.len();
        if nb <= self.degree || self.knots.len() != nb + self.degree + 1 {
            return f64::NAN;
        }
        let span = find_span(&self.knots, self.degree, nb, x);
        basis_functions(&self.knots, self.degree, span, x)
            .iter()
            .enumerate()
            .map(|(j, b)| b * self.coefficients[span - self.degree + j])
            .sum()
    }

    /// Value of the curve at each of `xs`.
    pub fn evaluate_many(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.evaluate(x)).collect()
    }
}

/// Clamped knot vector: `k + 1` copies of each end and `interior` uniform knots between.
fn clamped_knots(x_min: f64, x_max: f64, k: usize, interior: usize) -> Vec<f64> {
    let mut knots = vec![x_min; k + 1];
    let step = (x_max - x_min) / (interior + 1) as f64;
    knots.extend((1..=interior).map(|i| x_min + step * i as f64));
    knots.extend(std::iter::repeat(x_max).take(k + 1));
    knots
}

/// Knot span `i` with `t[i] ≤ x < t[i+1]`, restricted to `[k, nb − 1]`.
fn find_span(knots: &[f64], k: usize, nb: usize, x: f64) -> usize {
    let inner = &knots[k..=nb];
    let above = inner.partition_point(|&t| t <= x);
    (k + above.saturating_sub(1)).clamp(k, nb - 1)
}

/// The `k + 1` non-zero B-spline basis values on `span` at `x` (Cox–de Boor).
fn basis_functions(knots: &[f64], k: usize, span: usize, x: f64) -> Vec<f64> {
    let mut values = vec![0.0; k + 1];
    let mut left = vec![0.0; k + 1];
    let mut right = vec![0.0; k + 1];
    values[0] = 1.0;
    for j in 1..=k {
        left[j] = x - knots[span + 1 - j];
        right[j] = knots[span + j] - x;
        let mut saved = 0.0;
        for r in 0..j {
            let temp = values[r] / (right[r + 1] + left[j - r]);
            values[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        values[j] = saved;
    }
    values
}

/// Normal equations of one knot vector, reused across `λ` values.
struct PenalizedSystem<'a> {
    xs: &'a [f64],
    ys: &'a [f64],
    knots: Vec<f64>,
    degree: usize,
    gram: DMatrix<f64>,
    rhs: DVector<f64>,
    penalty: DMatrix<f64>,
}

impl<'a> PenalizedSystem<'a> {
    fn new(xs: &'a [f64], ys: &'a [f64], knots: Vec<f64>, degree: usize, penalty_order: usize) -> Self {
        let nb = knots.len() - degree - 1;
        let mut gram = DMatrix::zeros(nb, nb);
        let mut rhs = DVector::zeros(nb);

        for (&x, &y) in xs.iter().zip(ys) {
            let span = find_span(&knots, degree, nb, x);
            let basis = basis_functions(&knots, degree, span, x);
            let first = span - degree;
            for (a, &ba) in basis.iter().enumerate() {
                rhs[first + a] += ba * y;
                for (b, &bb) in basis.iter().enumerate() {
                    gram[(first + a, first + b)] += ba * bb;
                }
            }
        }

        PenalizedSystem {
            xs,
            ys,
            knots,
            degree,
            gram,
            rhs,
            penalty: difference_penalty(nb, penalty_order),
        }
    }

    /// Ratio of the data and penalty traces, so `λ` is dimensionless.
    fn lambda_scale(&self) -> f64 {
        let penalty_trace = self.penalty.trace();
        if penalty_trace > 0.0 {
            self.gram.trace() / penalty_trace
        } else {
            1.0
        }
    }

    fn solve(&self, lambda: f64) -> Result<SmoothCurve, CoaddError> {
        let system = &self.gram + &self.penalty * lambda;
        let coefficients = system
            .cholesky()
            .ok_or(CoaddError::SingularSplineSystem)?
            .solve(&self.rhs);

        let mut curve = SmoothCurve {
            degree: self.degree,
            knots: self.knots.clone(),
            coefficients: coefficients.iter().copied().collect(),
            residual: 0.0,
        };
        curve.residual = self
            .xs
            .iter()
            .zip(self.ys)
            .map(|(&x, &y)| (y - curve.evaluate(x)).powi(2))
            .sum();
        Ok(curve)
    }
}

/// `DᵀD` for the order-`d` difference matrix on `nb` coefficients.
fn difference_penalty(nb: usize, order: usize) -> DMatrix<f64> {
    let mut penalty = DMatrix::zeros(nb, nb);
    if nb <= order {
        return penalty;
    }
    // binomial coefficients with alternating sign
    let mut stencil = vec![1.0];
    for _ in 0..order {
        let mut next = vec![0.0; stencil.len() + 1];
        for (i, &c) in stencil.iter().enumerate() {
            next[i] -= c;
            next[i + 1] += c;
        }
        stencil = next;
    }
    for row in 0..nb - order {
        for (a, &ca) in stencil.iter().enumerate() {
            for (b, &cb) in stencil.iter().enumerate() {
                penalty[(row + a, row + b)] += ca * cb;
            }
        }
    }
    penalty
}
