//! Outlier rejection ahead of curve fitting.
//!
//! Two filters are applied to each calibration sequence, independently for gains and offsets:
//!
//! * a z-score cut against the sequence's own mean and population standard deviation;
//! * fixed, closed time intervals known to produce corrupted fits (moon-stripe periods).
use crate::constants::MJD;

/// Keep flags of a z-score cut: `true` where `|value − mean| / std ≤ threshold`.
///
/// A sequence with zero (or undefined) spread keeps every entry.
pub fn zscore_keep(values: &[f64], threshold: f64) -> Vec<bool> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();

    if !(std > 0.0) || !std.is_finite() {
        return vec![true; values.len()];
    }
    values
        .iter()
        .map(|v| ((v - mean) / std).abs() <= threshold)
        .collect()
}

/// `true` if `time` falls inside any of the closed `intervals`.
#[inline]
pub fn in_intervals(time: MJD, intervals: &[(MJD, MJD)]) -> bool {
    intervals
        .iter()
        .any(|&(start, end)| (start..=end).contains(&time))
}

/// Apply the z-score cut, then drop entries inside `intervals`.
///
/// Arguments
/// -----------------
/// * `times`: position of each entry on the time axis.
/// * `values`: the sequence (gains or offsets), aligned with `times`.
/// * `threshold`: z-score cut.
/// * `intervals`: closed exclusion intervals.
///
/// Return
/// ----------
/// * The surviving `(times, values)`, in input order.
pub fn reject_outliers(
    times: &[MJD],
    values: &[f64],
    threshold: f64,
    intervals: &[(MJD, MJD)],
) -> (Vec<MJD>, Vec<f64>) {
    debug_assert_eq!(times.len(), values.len());
    zscore_keep(values, threshold)
        .into_iter()
        .zip(times.iter().zip(values))
        .filter(|&(keep, (&t, _))| keep && !in_intervals(t, intervals))
        .map(|(_, (&t, &v))| (t, v))
        .unzip()
}
