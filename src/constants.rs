//! # Constants and type definitions for skycoadd
//!
//! This module centralizes the **production defaults**, **geometric constants**, and **common type
//! definitions** used throughout the `skycoadd` library.
//!
//! ## Overview
//!
//! - Pixelization and band defaults (HEALPix `nside`, WISE band)
//! - Outer-loop defaults (segment universe size, outer iteration count, refinement rounds)
//! - Galactic-plane exclusion band, expressed as fractions of π on colatitude
//! - Temporal smoother defaults (spline degree, smoothing factors, z-score threshold)
//! - Known moon-stripe contamination periods (MJD) for gains and offsets
//! - Core type aliases used across the crate

use std::f64::consts::PI;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Modified Julian Date (days)
pub type MJD = f64;
/// Index of a pixel in the full-sky pixelization
pub type PixelIndex = usize;
/// Identifier of a scan segment (orbit)
pub type SegmentId = usize;
/// HEALPix resolution parameter
pub type Nside = u32;
/// Angle in radians
pub type Radian = f64;

// -------------------------------------------------------------------------------------------------
// Pixelization / instrument defaults
// -------------------------------------------------------------------------------------------------

/// Default HEALPix resolution of every map and mask of a run
pub const DEFAULT_NSIDE: Nside = 256;

/// Default instrument band (W3)
pub const DEFAULT_BAND: u8 = 3;

// -------------------------------------------------------------------------------------------------
// Outer loop defaults
// -------------------------------------------------------------------------------------------------

/// Size of the fixed segment universe processed in each outer iteration
pub const DEFAULT_NUM_SEGMENTS: usize = 150;

/// Number of outer calibration/coaddition iterations
pub const DEFAULT_ITERATIONS: usize = 20;

/// Refinement rounds of the per-segment fitter (production always uses one)
pub const DEFAULT_REFINEMENT_STEPS: usize = 1;

// -------------------------------------------------------------------------------------------------
// Galactic band
// -------------------------------------------------------------------------------------------------

/// Lower colatitude bound of the galactic exclusion band
pub const GALACTIC_BAND_MIN: Radian = 0.4 * PI;

/// Upper colatitude bound of the galactic exclusion band
pub const GALACTIC_BAND_MAX: Radian = 0.6 * PI;

// -------------------------------------------------------------------------------------------------
// Temporal smoother defaults
// -------------------------------------------------------------------------------------------------

/// Degree of the smoothing spline
pub const SPLINE_DEGREE: usize = 5;

/// Smoothing factor of the gain curve (sum of squared residuals target)
pub const GAIN_SMOOTHING: f64 = 5000.0;

/// Smoothing factor of the offset curve
pub const OFFSET_SMOOTHING: f64 = 500000.0;

/// Entries with `|z| > ZSCORE_THRESHOLD` are rejected before curve fitting
pub const ZSCORE_THRESHOLD: f64 = 1.0;

/// Neighbour count of the windowed weighted moving average
pub const MOVING_AVERAGE_WINDOW: usize = 25;

/// Closed MJD intervals where moon stripes corrupt the gain fits.
pub const GAIN_STRIPE_INTERVALS: &[(MJD, MJD)] = &[
    (55200.0, 55205.0),
    (55218.0, 55224.0),
    (55230.0, 55236.0),
    (55247.0, 55255.0),
    (55259.0, 55264.0),
    (55276.0, 55284.0),
    (55287.0, 55295.0),
    (55306.0, 55313.0),
    (55318.0, 55324.0),
    (55335.0, 55343.0),
    (55348.0, 55354.0),
    (55364.0, 55370.0),
    (55378.0, 55384.0),
    (55393.0, 55402.0),
    (55408.0, 55414.0),
];

/// Closed MJD intervals where moon stripes corrupt the offset fits.
///
/// Differs from [`GAIN_STRIPE_INTERVALS`] on the first, fifth and last periods.
pub const OFFSET_STRIPE_INTERVALS: &[(MJD, MJD)] = &[
    (55200.0, 55208.0),
    (55218.0, 55224.0),
    (55230.0, 55236.0),
    (55247.0, 55255.0),
    (55259.0, 55266.0),
    (55276.0, 55284.0),
    (55287.0, 55295.0),
    (55306.0, 55313.0),
    (55318.0, 55324.0),
    (55335.0, 55343.0),
    (55348.0, 55354.0),
    (55364.0, 55370.0),
    (55378.0, 55384.0),
    (55393.0, 55402.0),
    (55407.0, 55414.0),
];
