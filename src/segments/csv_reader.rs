//! File-based segment and template sources.
//!
//! Segment tables are CSV files named `band_w{band}_orbit_{id}_pixel_timestamps.csv`:
//!
//! ```text
//! pixel_value,pixel_unc,hp_pixel_index,pixel_mjd
//! 412.7,3.1,120934,55203.1182
//! ```
//!
//! `pixel_mjd` is optional. Template maps are dense map tables (see
//! [`read_dense_map`](crate::skymap::read_dense_map)) named `zodi_map_cal_W{band}_{id}.csv`,
//! one full-sky map per segment, zero outside the segment's scan.
//!
//! A missing file is reported as [`CoaddError::SegmentNotFound`] /
//! [`CoaddError::TemplateNotFound`]; a corrupt file surfaces as [`CoaddError::CsvError`].
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use super::{extract_template, Segment, SegmentSource, TemplateSource};
use crate::{
    coadd_errors::CoaddError,
    constants::{PixelIndex, SegmentId, MJD},
    skymap::read_dense_map,
};

#[derive(Debug, Deserialize)]
struct SampleRecord {
    pixel_value: f64,
    pixel_unc: f64,
    hp_pixel_index: PixelIndex,
    #[serde(default)]
    pixel_mjd: Option<MJD>,
}

/// Read one segment table.
///
/// Timestamps are kept only if every row carries one.
pub fn read_segment_csv(id: SegmentId, path: &Utf8Path) -> Result<Segment, CoaddError> {
    let mut reader = csv::Reader::from_path(path)?;

    let mut values = Vec::new();
    let mut uncertainties = Vec::new();
    let mut pixels = Vec::new();
    let mut timestamps = Vec::new();
    let mut every_row_timed = true;

    for record in reader.deserialize::<SampleRecord>() {
        let record = record?;
        values.push(record.pixel_value);
        uncertainties.push(record.pixel_unc);
        pixels.push(record.hp_pixel_index);
        match record.pixel_mjd {
            Some(t) => timestamps.push(t),
            None => every_row_timed = false,
        }
    }

    if !every_row_timed {
        timestamps.clear();
    }
    Segment::new(id, values, uncertainties, pixels, timestamps)
}

/// [`SegmentSource`] reading segment tables from a directory.
#[derive(Debug, Clone)]
pub struct CsvSegmentSource {
    directory: Utf8PathBuf,
    band: u8,
}

impl CsvSegmentSource {
    pub fn new(directory: impl Into<Utf8PathBuf>, band: u8) -> Self {
        CsvSegmentSource {
            directory: directory.into(),
            band,
        }
    }

    pub fn segment_path(&self, id: SegmentId) -> Utf8PathBuf {
        self.directory.join(format!(
            "band_w{}_orbit_{}_pixel_timestamps.csv",
            self.band, id
        ))
    }
}

impl SegmentSource for CsvSegmentSource {
    fn load_segment(&self, id: SegmentId) -> Result<Segment, CoaddError> {
        let path = self.segment_path(id);
        if !path.exists() {
            return Err(CoaddError::SegmentNotFound {
                id,
                path: path.to_string(),
            });
        }
        read_segment_csv(id, &path)
    }
}

/// [`TemplateSource`] reading one dense template map per segment from a directory.
#[derive(Debug, Clone)]
pub struct CsvTemplateSource {
    directory: Utf8PathBuf,
    band: u8,
    npix: usize,
}

impl CsvTemplateSource {
    pub fn new(directory: impl Into<Utf8PathBuf>, band: u8, npix: usize) -> Self {
        CsvTemplateSource {
            directory: directory.into(),
            band,
            npix,
        }
    }

    pub fn template_path(&self, id: SegmentId) -> Utf8PathBuf {
        self.directory
            .join(format!("zodi_map_cal_W{}_{}.csv", self.band, id))
    }
}

impl TemplateSource for CsvTemplateSource {
    fn load_template(&self, id: SegmentId, pixels: &[PixelIndex]) -> Result<Vec<f64>, CoaddError> {
        let path = self.template_path(id);
        if !path.exists() {
            return Err(CoaddError::TemplateNotFound {
                id,
                path: path.to_string(),
            });
        }
        let template_map = read_dense_map(&path, self.npix)?;
        extract_template(id, &template_map, pixels)
    }
}

#[cfg(test)]
mod csv_reader_tests {
    use super::*;

    fn temp_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_read_segment_with_timestamps() {
        let (_guard, dir) = temp_dir();
        let source = CsvSegmentSource::new(dir.clone(), 3);
        std::fs::write(
            source.segment_path(7),
            "pixel_value,pixel_unc,hp_pixel_index,pixel_mjd\n\
             10.5,0.5,3,55201.0\n\
             11.0,0.0,4,55201.5\n\
             12.0,0.25,9,55202.0\n",
        )
        .unwrap();

        let segment = source.load_segment(7).unwrap();
        assert_eq!(segment.id, 7);
        assert_eq!(segment.values(), &[10.5, 11.0, 12.0]);
        assert_eq!(segment.uncertainties(), &[0.5, 0.0, 0.25]);
        assert_eq!(segment.pixels(), &[3, 4, 9]);
        assert_eq!(segment.representative_timestamp(), Some(55201.5));
    }

    #[test]
    fn test_read_segment_without_timestamps() {
        let (_guard, dir) = temp_dir();
        let source = CsvSegmentSource::new(dir.clone(), 3);
        std::fs::write(
            source.segment_path(0),
            "pixel_value,pixel_unc,hp_pixel_index\n1.0,0.1,0\n",
        )
        .unwrap();

        let segment = source.load_segment(0).unwrap();
        assert_eq!(segment.len(), 1);
        assert!(segment.timestamps().is_empty());
    }

    #[test]
    fn test_missing_segment_names_the_file() {
        let (_guard, dir) = temp_dir();
        let source = CsvSegmentSource::new(dir.clone(), 3);
        let expected_path = source.segment_path(42).to_string();
        assert_eq!(
            source.load_segment(42).unwrap_err(),
            CoaddError::SegmentNotFound {
                id: 42,
                path: expected_path
            }
        );
    }

    #[test]
    fn test_corrupt_segment_is_an_error() {
        let (_guard, dir) = temp_dir();
        let source = CsvSegmentSource::new(dir.clone(), 3);
        std::fs::write(
            source.segment_path(1),
            "pixel_value,pixel_unc,hp_pixel_index\nnot-a-number,0.1,0\n",
        )
        .unwrap();
        assert!(matches!(
            source.load_segment(1),
            Err(CoaddError::CsvError(_))
        ));
    }

    #[test]
    fn test_template_source() {
        let (_guard, dir) = temp_dir();
        let source = CsvTemplateSource::new(dir.clone(), 3, 12);
        std::fs::write(
            source.template_path(2),
            "pixel_index,value\n0,4.0\n3,5.0\n11,6.0\n",
        )
        .unwrap();

        let values = source.load_template(2, &[11, 0, 3]).unwrap();
        assert_eq!(values, vec![6.0, 4.0, 5.0]);
        assert!(matches!(
            source.load_template(3, &[0]),
            Err(CoaddError::TemplateNotFound { id: 3, .. })
        ));
    }
}
