//! # skycoadd
//!
//! Iterative self-calibration of scan segments and their coaddition into a full-sky HEALPix
//! map.
//!
//! ## Pipeline
//! -----------------
//! 1. [`mask::Mask`] – galactic band ∪ defect map, built once per run.
//! 2. [`calibration::fitter`] – per-segment `(gain, offset)` against a template, Nelder–Mead
//!    on a scaled χ² cost.
//! 3. [`coadder::Coadder`] – outer loop: fit every segment, accumulate the inverse-variance
//!    weighted contributions, normalize, persist, repeat on the residual of the previous map.
//! 4. [`smoothing`] – optional temporal smoothing of the fitted gains and offsets.
//!
//! Input and output go through the [`segments::SegmentSource`], [`segments::TemplateSource`],
//! [`skymap::MapStore`] and [`calibration::archive::CalibrationArchive`] traits, with CSV and
//! in-memory implementations.
//!
//! ## Features
//! -----------------
//! * `parallel` – segment fitting on `rayon`.
//! * `progress` – `indicatif` progress bars.
pub mod calibration;
pub mod coadd_errors;
pub mod coadder;
pub mod constants;
pub mod healpix;
pub mod logging;
pub mod mask;
#[cfg(feature = "progress")]
pub mod progress_bar;
pub mod segments;
pub mod skymap;
pub mod smoothing;

pub use coadd_errors::CoaddError;
pub use coadder::{CoaddParams, Coadder};
pub use healpix::Pixelization;
pub use mask::Mask;
pub use skymap::SkyMap;
