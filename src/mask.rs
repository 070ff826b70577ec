//! # Mask Builder
//!
//! Derives the set of pixels excluded from every calibration fit and from map accumulation.
//! The combined [`Mask`] is the union of:
//!
//! 1. **Galactic band** – pixels whose colatitude lies in the closed interval
//!    `[GALACTIC_BAND_MIN, GALACTIC_BAND_MAX]` (0.4π–0.6π by default), where the zodiacal
//!    template is not the dominant foreground.
//! 2. **Static defect map** – a per-pixel table (moon stripes, instrumental artefacts),
//!    loaded verbatim; any non-zero value marks the pixel as excluded.
//!
//! The mask is built once at process start and then shared read-only for the whole run.
//!
//! ## Example
//!
//! ```rust
//! use skycoadd::healpix::Pixelization;
//! use skycoadd::mask::Mask;
//!
//! let pixelization = Pixelization::new(1);
//! let defects = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
//! let mask = Mask::build(&pixelization, &defects).unwrap();
//!
//! assert!(mask.is_excluded(0)); // defect
//! assert!(mask.is_excluded(5)); // equatorial ring, inside the galactic band
//! assert!(!mask.is_excluded(1));
//! ```
use std::collections::BTreeSet;

use camino::Utf8Path;
use tracing::info;

use crate::{
    coadd_errors::CoaddError,
    constants::{PixelIndex, Radian, GALACTIC_BAND_MAX, GALACTIC_BAND_MIN},
    healpix::Pixelization,
    skymap::read_dense_map,
};

/// Boolean exclusion flag per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    excluded: Vec<bool>,
}

impl Mask {
    /// Mask with no excluded pixel.
    pub fn empty(npix: usize) -> Self {
        Mask {
            excluded: vec![false; npix],
        }
    }

    /// Exclude pixels whose colatitude lies in the closed interval `[theta_min, theta_max]`.
    pub fn galactic_band(pixelization: &Pixelization, theta_min: Radian, theta_max: Radian) -> Self {
        let excluded = pixelization
            .colatitudes()
            .into_iter()
            .map(|theta| (theta_min..=theta_max).contains(&theta))
            .collect();
        Mask { excluded }
    }

    /// Interpret a dense defect map: any non-zero value is excluded.
    ///
    /// Return
    /// ----------
    /// * `Err(CoaddError::MaskSizeMismatch)` if `defects` does not cover the pixelization.
    pub fn from_defect_map(pixelization: &Pixelization, defects: &[f64]) -> Result<Self, CoaddError> {
        if defects.len() != pixelization.npix() {
            return Err(CoaddError::MaskSizeMismatch {
                expected: pixelization.npix(),
                found: defects.len(),
            });
        }
        Ok(Mask {
            excluded: defects.iter().map(|&v| v != 0.0).collect(),
        })
    }

    /// Build the production mask: default galactic band ∪ defect map.
    pub fn build(pixelization: &Pixelization, defects: &[f64]) -> Result<Self, CoaddError> {
        Self::build_with_band(pixelization, defects, GALACTIC_BAND_MIN, GALACTIC_BAND_MAX)
    }

    /// Same as [`Mask::build`] with an explicit galactic band.
    pub fn build_with_band(
        pixelization: &Pixelization,
        defects: &[f64],
        theta_min: Radian,
        theta_max: Radian,
    ) -> Result<Self, CoaddError> {
        let defect_mask = Self::from_defect_map(pixelization, defects)?;
        let galaxy_mask = Self::galactic_band(pixelization, theta_min, theta_max);
        let mask = defect_mask.union(&galaxy_mask);

        info!(
            "Mask built: nside={}, defect={}, galactic={}, combined={} of {} pixels",
            pixelization.nside(),
            defect_mask.excluded_count(),
            galaxy_mask.excluded_count(),
            mask.excluded_count(),
            mask.npix()
        );
        Ok(mask)
    }

    /// Load the defect map from a dense CSV table and build the combined mask.
    ///
    /// Return
    /// ----------
    /// * `Err(CoaddError::DefectMaskNotFound)` if the file does not exist.
    /// * Any read error of [`read_dense_map`] otherwise.
    pub fn from_defect_file(
        pixelization: &Pixelization,
        path: &Utf8Path,
        theta_min: Radian,
        theta_max: Radian,
    ) -> Result<Self, CoaddError> {
        if !path.exists() {
            return Err(CoaddError::DefectMaskNotFound(path.to_string()));
        }
        let defects = read_dense_map(path, pixelization.npix())?;
        Self::build_with_band(pixelization, &defects, theta_min, theta_max)
    }

    /// Pixel-wise OR of two masks of the same size.
    pub fn union(&self, other: &Mask) -> Mask {
        debug_assert_eq!(self.npix(), other.npix());
        Mask {
            excluded: self
                .excluded
                .iter()
                .zip(&other.excluded)
                .map(|(&a, &b)| a || b)
                .collect(),
        }
    }

    pub fn npix(&self) -> usize {
        self.excluded.len()
    }

    /// `true` if the pixel must be dropped; pixels outside the map are treated as excluded.
    #[inline]
    pub fn is_excluded(&self, pixel: PixelIndex) -> bool {
        self.excluded.get(pixel).copied().unwrap_or(true)
    }

    pub fn excluded_count(&self) -> usize {
        self.excluded.iter().filter(|&&e| e).count()
    }

    /// Sorted set of excluded pixel indices.
    pub fn excluded_indices(&self) -> BTreeSet<PixelIndex> {
        self.excluded
            .iter()
            .enumerate()
            .filter_map(|(i, &e)| e.then_some(i))
            .collect()
    }
}
