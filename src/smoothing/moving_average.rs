//! Windowed weighted moving average over the segment axis.
//!
//! Each output value `p` is the weighted mean of the inputs in the symmetric, inclusive window
//! `[p − w/2, p + w/2]` (integer half-width), weighted by the segments' orbit sizes. The
//! [`BoundaryPolicy`] decides what the window sees past either end of the sequence.
//!
//! A window whose weights sum to zero returns the input value unchanged.
use serde::{Deserialize, Serialize};

use crate::{coadd_errors::CoaddError, constants::MOVING_AVERAGE_WINDOW};

/// Handling of windows that run past the ends of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    /// Indices wrap around: the sequence is treated as periodic.
    Wrap,

    /// Windows are truncated to the available range.
    #[default]
    Clamp,
}

/// Window configuration of the moving average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovingAverageParams {
    pub window: usize,
    pub boundary: BoundaryPolicy,
}

impl Default for MovingAverageParams {
    fn default() -> Self {
        MovingAverageParams {
            window: MOVING_AVERAGE_WINDOW,
            boundary: BoundaryPolicy::default(),
        }
    }
}

/// Weighted moving average of `values`.
///
/// Arguments
/// -----------------
/// * `values`: sequence to smooth, one entry per segment.
/// * `weights`: non-negative weight per entry (orbit sizes).
/// * `window`: nominal window length; the half-width is `window / 2`.
/// * `boundary`: behaviour past either end.
///
/// Return
/// ----------
/// * The smoothed sequence, same length as `values`.
/// * `Err(CoaddError::InvalidSmootherParameter)` if `weights` is not aligned with `values`.
pub fn weighted_moving_average(
    values: &[f64],
    weights: &[f64],
    window: usize,
    boundary: BoundaryPolicy,
) -> Result<Vec<f64>, CoaddError> {
    if values.len() != weights.len() {
        return Err(CoaddError::InvalidSmootherParameter(format!(
            "{} weights for {} values",
            weights.len(),
            values.len()
        )));
    }
    let n = values.len();
    let half = (window / 2) as isize;

    let smoothed = (0..n)
        .map(|p| {
            let mut weighted_sum = 0.0;
            let mut weight_total = 0.0;
            for offset in -half..=half {
                let Some(i) = window_index(p as isize + offset, n, boundary) else {
                    continue;
                };
                weighted_sum += values[i] * weights[i];
                weight_total += weights[i];
            }
            if weight_total == 0.0 {
                values[p]
            } else {
                weighted_sum / weight_total
            }
        })
        .collect();
    Ok(smoothed)
}

fn window_index(i: isize, n: usize, boundary: BoundaryPolicy) -> Option<usize> {
    match boundary {
        BoundaryPolicy::Wrap => Some(i.rem_euclid(n as isize) as usize),
        BoundaryPolicy::Clamp => (0..n as isize).contains(&i).then_some(i as usize),
    }
}

#[cfg(test)]
mod moving_average_tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_constant_sequence_is_unchanged() {
        let values = vec![2.5; 7];
        let weights = vec![1.0, 3.0, 0.0, 2.0, 5.0, 1.0, 1.0];
        for boundary in [BoundaryPolicy::Wrap, BoundaryPolicy::Clamp] {
            let smoothed = weighted_moving_average(&values, &weights, 3, boundary).unwrap();
            for v in smoothed {
                assert_relative_eq!(v, 2.5);
            }
        }
    }

    #[test]
    fn test_clamp_truncates_windows() {
        let values = [0.0, 3.0, 6.0, 9.0];
        let weights = [1.0; 4];
        let smoothed = weighted_moving_average(&values, &weights, 2, BoundaryPolicy::Clamp).unwrap();
        assert_eq!(smoothed, vec![1.5, 3.0, 6.0, 7.5]);
    }

    #[test]
    fn test_wrap_sees_the_other_end() {
        let values = [0.0, 3.0, 6.0, 9.0];
        let weights = [1.0; 4];
        let smoothed = weighted_moving_average(&values, &weights, 2, BoundaryPolicy::Wrap).unwrap();
        assert_eq!(smoothed, vec![4.0, 3.0, 6.0, 5.0]);
    }

    #[test]
    fn test_weights_are_orbit_sizes() {
        let values = [1.0, 10.0, 1.0];
        let weights = [1.0, 8.0, 1.0];
        let smoothed = weighted_moving_average(&values, &weights, 2, BoundaryPolicy::Clamp).unwrap();
        assert_relative_eq!(smoothed[1], 82.0 / 10.0);
    }

    #[test]
    fn test_zero_weight_window_keeps_the_value() {
        let values = [4.0, 5.0, 6.0];
        let weights = [0.0; 3];
        let smoothed = weighted_moving_average(&values, &weights, 25, BoundaryPolicy::Clamp).unwrap();
        assert_eq!(smoothed, values.to_vec());
    }

    #[test]
    fn test_misaligned_weights() {
        assert!(weighted_moving_average(&[1.0, 2.0], &[1.0], 3, BoundaryPolicy::Wrap).is_err());
        assert!(weighted_moving_average(&[], &[], 3, BoundaryPolicy::Wrap)
            .unwrap()
            .is_empty());
    }
}
