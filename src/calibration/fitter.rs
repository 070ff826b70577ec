//! # Per-segment calibration fitter
//!
//! Finds the scalar `(gain, offset)` that maps a segment's template onto its raw samples,
//! `raw ≈ template · gain + offset`, by minimising
//!
//! ```text
//! cost(g, o) = mean_i ( (raw_i − (template_i · g + o)) / mean(σ) )²
//! ```
//!
//! Every sample gets the same weight, the *mean* uncertainty of the segment. The search is a
//! Nelder–Mead simplex started at `(1, 0)`.
//!
//! ## Refinement
//! -----------------
//! After each fit the working data is pulled towards the template,
//!
//! ```text
//! residual = (data − offset) / gain − template
//! data     ← data − gain · residual
//! ```
//!
//! and the fit is repeated on the adjusted data. Production runs use a single round.
//!
//! See also
//! ------------
//! * [`nelder_mead::minimize`](crate::calibration::nelder_mead::minimize) – the simplex search.
//! * [`Coadder`](crate::coadder::Coadder) – calls [`fit_segment`] once per segment and iteration.
use nalgebra::Vector2;

use super::nelder_mead::{minimize, NelderMeadParams};

/// Starting point of every search: identity calibration.
const INITIAL_GUESS: [f64; 2] = [1.0, 0.0];

/// Result of calibrating one segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationFit {
    pub gain: f64,
    pub offset: f64,
    /// Cost at the returned parameters, on the last refinement round.
    pub cost: f64,
    /// Cost evaluations over all rounds (0 for a degenerate segment).
    pub evaluations: usize,
}

impl CalibrationFit {
    /// Neutral calibration of a segment with no usable sample.
    pub fn neutral() -> Self {
        CalibrationFit {
            gain: 0.0,
            offset: 0.0,
            cost: 0.0,
            evaluations: 0,
        }
    }
}

/// Normalisation of the residuals: the mean uncertainty, or 1 when that mean is not a usable
/// divisor (all-zero or non-finite uncertainties).
pub fn uncertainty_scale(uncertainties: &[f64]) -> f64 {
    if uncertainties.is_empty() {
        return 1.0;
    }
    let mean = uncertainties.iter().sum::<f64>() / uncertainties.len() as f64;
    if mean.is_finite() && mean != 0.0 {
        mean
    } else {
        1.0
    }
}

/// Evaluate the calibration cost for `params = (gain, offset)`.
///
/// Arguments
/// -----------------
/// * `params`: candidate `(gain, offset)`.
/// * `raw`: working data of the segment.
/// * `template`: template values aligned with `raw`.
/// * `scale`: residual normalisation, see [`uncertainty_scale`].
///
/// Return
/// ----------
/// * The mean squared normalised residual, `0.0` for empty input.
pub fn chi_square(params: &Vector2<f64>, raw: &[f64], template: &[f64], scale: f64) -> f64 {
    if raw.is_empty() {
        return 0.0;
    }
    let (gain, offset) = (params[0], params[1]);
    let sum: f64 = raw
        .iter()
        .zip(template)
        .map(|(&r, &t)| ((r - (t * gain + offset)) / scale).powi(2))
        .sum();
    sum / raw.len() as f64
}

/// Iterative calibration of one segment against its template.
#[derive(Debug, Clone)]
pub struct IterativeFitter<'a> {
    template: &'a [f64],
    raw: &'a [f64],
    scale: f64,
    minimizer: NelderMeadParams,
}

impl<'a> IterativeFitter<'a> {
    pub fn new(
        template: &'a [f64],
        raw: &'a [f64],
        uncertainties: &'a [f64],
        minimizer: NelderMeadParams,
    ) -> Self {
        debug_assert_eq!(template.len(), raw.len());
        IterativeFitter {
            template,
            raw,
            scale: uncertainty_scale(uncertainties),
            minimizer,
        }
    }

    /// One simplex search of `(gain, offset)` on `data`.
    pub fn fit_to_template(&self, data: &[f64]) -> CalibrationFit {
        let result = minimize(
            |p: &Vector2<f64>| chi_square(p, data, self.template, self.scale),
            Vector2::from(INITIAL_GUESS),
            &self.minimizer,
        );
        CalibrationFit {
            gain: result.x[0],
            offset: result.x[1],
            cost: result.fun,
            evaluations: result.evaluations,
        }
    }

    /// Pull `data` towards the template given a fitted calibration.
    ///
    /// Contains the identity for `gain == 0`, where the residual is undefined.
    pub fn adjust_data(&self, gain: f64, offset: f64, data: &[f64]) -> Vec<f64> {
        if gain == 0.0 {
            return data.to_vec();
        }
        data.iter()
            .zip(self.template)
            .map(|(&d, &t)| {
                let residual = (d - offset) / gain - t;
                d - gain * residual
            })
            .collect()
    }

    /// Fit, adjust, and refit for `refinement_steps` rounds (at least one).
    ///
    /// Return
    /// ----------
    /// * The calibration of the last round, or [`CalibrationFit::neutral`] without any sample.
    ///
    /// Known limitation
    /// -----------------
    /// With large template values (hundreds), `σ ≳ 1` and a gain away from 1, the search can stop
    /// with the offset still near 0 and the gain absorbing it. The absolute `xatol`/`fatol` are
    /// met before the offset moves, because the offset vertex starts only `0.00025` away from
    /// the start. Extra rounds do not help: every round restarts from `(1, 0)` on data that
    /// is already consistent with the stalled fit. Tighter [`NelderMeadParams`] do.
    pub fn iterate_fit(&self, refinement_steps: usize) -> CalibrationFit {
        if self.raw.is_empty() {
            return CalibrationFit::neutral();
        }

        let mut data = self.raw.to_vec();
        let mut fit = CalibrationFit::neutral();
        let mut evaluations = 0;
        for step in 0..refinement_steps.max(1) {
            if step > 0 {
                data = self.adjust_data(fit.gain, fit.offset, &data);
            }
            fit = self.fit_to_template(&data);
            evaluations += fit.evaluations;
        }
        fit.evaluations = evaluations;
        fit
    }
}

/// Calibrate one masked segment with the default simplex tolerances.
///
/// Arguments
/// -----------------
/// * `template`: template values at the segment's unmasked samples.
/// * `raw`: unmasked samples (iteration > 0: with the previous map's contribution removed).
/// * `uncertainties`: standard errors of `raw`.
/// * `refinement_steps`: fit/adjust rounds.
///
/// Return
/// ----------
/// * `(gain, offset)` and fit diagnostics; exactly `(0, 0)` for an empty segment.
pub fn fit_segment(
    template: &[f64],
    raw: &[f64],
    uncertainties: &[f64],
    refinement_steps: usize,
) -> CalibrationFit {
    fit_segment_with(
        template,
        raw,
        uncertainties,
        refinement_steps,
        &NelderMeadParams::default(),
    )
}

/// Same as [`fit_segment`] with explicit minimiser settings.
pub fn fit_segment_with(
    template: &[f64],
    raw: &[f64],
    uncertainties: &[f64],
    refinement_steps: usize,
    minimizer: &NelderMeadParams,
) -> CalibrationFit {
    IterativeFitter::new(template, raw, uncertainties, *minimizer).iterate_fit(refinement_steps)
}
