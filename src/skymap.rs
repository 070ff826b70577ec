//! # Full-sky maps and their persistence
//!
//! A [`SkyMap`] is the product of one outer iteration: a dense value array and an
//! equal-length uncertainty array over the whole pixelization. Once normalised and saved, a map
//! is never mutated again; the next iteration only borrows it as the *previous map*.
//!
//! Persistence is an injected collaborator behind the [`MapStore`] trait:
//!
//! * [`CsvMapStore`] – writes two dense CSV tables per iteration (values and uncertainties),
//!   named after [`MapKey::map_name`] and [`MapKey::uncertainty_name`].
//! * [`MemoryMapStore`] – keeps maps in memory, for tests and in-process pipelines.
//!
//! ## Dense map tables
//!
//! The CSV layout shared by output maps, per-segment templates and the defect mask is:
//!
//! ```text
//! pixel_index,value
//! 0,0.0
//! 1,12.5
//! ...
//! ```
//!
//! Rows may be sparse and unordered; missing pixels read as `0.0`. Extra columns are ignored.
use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::{coadd_errors::CoaddError, constants::PixelIndex};

/// Dense per-pixel values and uncertainties of one coadded map.
#[derive(Debug, Clone, PartialEq)]
pub struct SkyMap {
    values: Vec<f64>,
    uncertainties: Vec<f64>,
}

impl SkyMap {
    /// Zero-filled map of `npix` pixels.
    pub fn zeros(npix: usize) -> Self {
        SkyMap {
            values: vec![0.0; npix],
            uncertainties: vec![0.0; npix],
        }
    }

    /// Build a map from its two dense arrays.
    ///
    /// Return
    /// ----------
    /// * `Err(CoaddError::MapSizeMismatch)` if both arrays do not have the same length.
    pub fn from_parts(values: Vec<f64>, uncertainties: Vec<f64>) -> Result<Self, CoaddError> {
        if values.len() != uncertainties.len() {
            return Err(CoaddError::MapSizeMismatch {
                expected: values.len(),
                found: uncertainties.len(),
            });
        }
        Ok(SkyMap {
            values,
            uncertainties,
        })
    }

    /// Pair two arrays already known to have the same length.
    pub(crate) fn from_aligned(values: Vec<f64>, uncertainties: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), uncertainties.len());
        SkyMap {
            values,
            uncertainties,
        }
    }

    pub fn npix(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn uncertainties(&self) -> &[f64] {
        &self.uncertainties
    }

    #[inline]
    pub fn value(&self, pixel: PixelIndex) -> f64 {
        self.values[pixel]
    }

    /// Number of pixels that received at least one contribution.
    pub fn covered_pixels(&self) -> usize {
        self.uncertainties.iter().filter(|&&u| u != 0.0).count()
    }
}

/// Iteration-qualified identity of a persisted map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapKey {
    pub band: u8,
    pub iteration: usize,
}

impl MapKey {
    pub fn new(band: u8, iteration: usize) -> Self {
        MapKey { band, iteration }
    }

    pub fn map_name(&self) -> String {
        format!("fullskymap_band{}_iter_{}", self.band, self.iteration)
    }

    pub fn uncertainty_name(&self) -> String {
        format!("fullskymap_unc_band{}_iter_{}", self.band, self.iteration)
    }
}

/// Storage backend for coadded maps.
pub trait MapStore {
    /// Persist `map` under `key`, replacing any earlier map with the same key.
    fn save_map(&mut self, key: &MapKey, map: &SkyMap) -> Result<(), CoaddError>;

    /// Load the map stored under `key`, checking it has `npix` pixels.
    fn load_map(&self, key: &MapKey, npix: usize) -> Result<SkyMap, CoaddError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct DenseRecord {
    pixel_index: PixelIndex,
    value: f64,
}

/// Read a dense map table into a vector of `npix` values.
///
/// Arguments
/// -----------------
/// * `path`: CSV file with at least the `pixel_index` and `value` columns.
/// * `npix`: pixel count of the pixelization.
///
/// Return
/// ----------
/// * The dense values, zero where the table has no row.
/// * `Err(CoaddError::MapSizeMismatch)` if a row addresses a pixel `>= npix`.
/// * `Err(CoaddError::CsvError)` / `Err(CoaddError::IoError)` on unreadable input.
pub fn read_dense_map(path: &Utf8Path, npix: usize) -> Result<Vec<f64>, CoaddError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut values = vec![0.0; npix];
    for record in reader.deserialize::<DenseRecord>() {
        let record = record?;
        if record.pixel_index >= npix {
            return Err(CoaddError::MapSizeMismatch {
                expected: npix,
                found: record.pixel_index + 1,
            });
        }
        values[record.pixel_index] = record.value;
    }
    Ok(values)
}

/// Write `values` as a dense map table, one row per pixel.
pub fn write_dense_map(path: &Utf8Path, values: &[f64]) -> Result<(), CoaddError> {
    let mut writer = csv::Writer::from_path(path)?;
    for (pixel_index, &value) in values.iter().enumerate() {
        writer.serialize(DenseRecord { pixel_index, value })?;
    }
    writer.flush()?;
    Ok(())
}

/// [`MapStore`] writing dense CSV tables into a directory.
#[derive(Debug, Clone)]
pub struct CsvMapStore {
    directory: Utf8PathBuf,
}

impl CsvMapStore {
    /// Create a store rooted at `directory`, creating it if needed.
    pub fn new(directory: impl Into<Utf8PathBuf>) -> Result<Self, CoaddError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(CsvMapStore { directory })
    }

    pub fn map_path(&self, key: &MapKey) -> Utf8PathBuf {
        self.directory.join(format!("{}.csv", key.map_name()))
    }

    pub fn uncertainty_path(&self, key: &MapKey) -> Utf8PathBuf {
        self.directory.join(format!("{}.csv", key.uncertainty_name()))
    }
}

impl MapStore for CsvMapStore {
    fn save_map(&mut self, key: &MapKey, map: &SkyMap) -> Result<(), CoaddError> {
        write_dense_map(&self.map_path(key), map.values())?;
        write_dense_map(&self.uncertainty_path(key), map.uncertainties())
    }

    fn load_map(&self, key: &MapKey, npix: usize) -> Result<SkyMap, CoaddError> {
        let values = read_dense_map(&self.map_path(key), npix)?;
        let uncertainties = read_dense_map(&self.uncertainty_path(key), npix)?;
        SkyMap::from_parts(values, uncertainties)
    }
}

/// [`MapStore`] keeping every saved map in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryMapStore {
    maps: HashMap<MapKey, SkyMap>,
}

impl MemoryMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &MapKey) -> Option<&SkyMap> {
        self.maps.get(key)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

impl MapStore for MemoryMapStore {
    fn save_map(&mut self, key: &MapKey, map: &SkyMap) -> Result<(), CoaddError> {
        self.maps.insert(*key, map.clone());
        Ok(())
    }

    fn load_map(&self, key: &MapKey, npix: usize) -> Result<SkyMap, CoaddError> {
        let map = self.maps.get(key).ok_or_else(|| {
            CoaddError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                key.map_name(),
            ))
        })?;
        if map.npix() != npix {
            return Err(CoaddError::MapSizeMismatch {
                expected: npix,
                found: map.npix(),
            });
        }
        Ok(map.clone())
    }
}
