//! # Per-segment calibration: records, tables and history
//!
//! Every outer iteration produces one `(gain, offset, orbit size)` record per segment of the
//! universe. Those records are gathered into a [`CalibrationTable`] (one iteration), and the
//! tables of a run into a [`CalibrationHistory`], an explicit `iteration → segment → record`
//! table.
//!
//! The calibration convention throughout the crate is
//!
//! ```text
//! calibrated = (raw − offset) / gain
//! ```
//!
//! A record with `gain == 0` is *degenerate*: the segment had no usable sample, or it failed
//! to load and was skipped, and it never contributes to a map.
//!
//! ## Sub-modules
//! -----------------
//! * [`nelder_mead`] – derivative-free simplex minimiser.
//! * [`fitter`] – cost function and iterative per-segment fit.
//! * [`archive`] – per-iteration persistence of the tables.
pub mod archive;
pub mod fitter;
pub mod nelder_mead;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    coadd_errors::CoaddError,
    constants::{SegmentId, MJD},
    segments::median,
};

/// Calibration of one segment at one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub segment: SegmentId,
    pub gain: f64,
    pub offset: f64,
    /// Post-mask sample count.
    pub orbit_size: usize,
    /// Median sample timestamp, if the segment carries timestamps.
    pub timestamp: Option<MJD>,
}

impl CalibrationRecord {
    /// `(0, 0)` record of a segment that contributes nothing.
    pub fn neutral(segment: SegmentId, orbit_size: usize, timestamp: Option<MJD>) -> Self {
        CalibrationRecord {
            segment,
            gain: 0.0,
            offset: 0.0,
            orbit_size,
            timestamp,
        }
    }

    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.gain == 0.0
    }

    /// Apply `(raw − offset) / gain`.
    #[inline]
    pub fn calibrate(&self, raw: f64) -> f64 {
        (raw - self.offset) / self.gain
    }
}

/// Records of every segment for one outer iteration, ordered by segment id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CalibrationTable {
    pub iteration: usize,
    records: Vec<CalibrationRecord>,
}

impl CalibrationTable {
    /// Build a table; records are sorted by segment id.
    pub fn new(iteration: usize, mut records: Vec<CalibrationRecord>) -> Self {
        records.sort_by_key(|r| r.segment);
        CalibrationTable { iteration, records }
    }

    pub fn records(&self) -> &[CalibrationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record of `segment`, if present.
    pub fn get(&self, segment: SegmentId) -> Option<&CalibrationRecord> {
        self.records
            .binary_search_by_key(&segment, |r| r.segment)
            .ok()
            .map(|i| &self.records[i])
    }

    /// Gain of `segment`, `0.0` if the table has no record for it.
    pub fn gain(&self, segment: SegmentId) -> f64 {
        self.get(segment).map_or(0.0, |r| r.gain)
    }

    pub fn gains(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.gain).collect()
    }

    pub fn offsets(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.offset).collect()
    }

    pub fn orbit_sizes(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.orbit_size).collect()
    }

    pub fn timestamps(&self) -> Vec<Option<MJD>> {
        self.records.iter().map(|r| r.timestamp).collect()
    }

    /// Copy of this table with gains and offsets replaced, segment by segment.
    ///
    /// `gains` and `offsets` must be aligned with [`CalibrationTable::records`].
    pub fn with_values(&self, gains: &[f64], offsets: &[f64]) -> CalibrationTable {
        debug_assert_eq!(gains.len(), self.len());
        debug_assert_eq!(offsets.len(), self.len());
        let records = self
            .records
            .iter()
            .zip(gains.iter().zip(offsets))
            .map(|(r, (&gain, &offset))| CalibrationRecord { gain, offset, ..*r })
            .collect();
        CalibrationTable {
            iteration: self.iteration,
            records,
        }
    }

    /// Summary of the non-degenerate gains and offsets.
    ///
    /// Return
    /// ----------
    /// * `None` if every record is degenerate (or the table is empty).
    pub fn stats(&self) -> Option<CalibrationStats> {
        let usable: Vec<&CalibrationRecord> =
            self.records.iter().filter(|r| !r.is_degenerate()).collect();
        if usable.is_empty() {
            return None;
        }

        let summary = |values: Vec<f64>| -> (f64, f64, f64) {
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let med = median(&values).unwrap_or(f64::NAN);
            (min, med, max)
        };
        let (gain_min, gain_median, gain_max) = summary(usable.iter().map(|r| r.gain).collect());
        let (offset_min, offset_median, offset_max) =
            summary(usable.iter().map(|r| r.offset).collect());

        Some(CalibrationStats {
            iteration: self.iteration,
            segments: self.records.len(),
            degenerate: self.records.len() - usable.len(),
            gain_min,
            gain_median,
            gain_max,
            offset_min,
            offset_median,
            offset_max,
        })
    }
}

/// Summary of one calibration table.
///
/// `Display` is a single line by default and a multi-line block with `{:#}`:
///
/// ```text
/// Calibration summary of iteration 3
/// ---------------------------------
/// segments   : 150 (2 degenerate)
/// gain       : min 0.9812, median 1.0034, max 1.0421
/// offset     : min -3.2100, median 0.4410, max 5.0070
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationStats {
    pub iteration: usize,
    pub segments: usize,
    pub degenerate: usize,
    pub gain_min: f64,
    pub gain_median: f64,
    pub gain_max: f64,
    pub offset_min: f64,
    pub offset_median: f64,
    pub offset_max: f64,
}

impl fmt::Display for CalibrationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            writeln!(f, "Calibration summary of iteration {}", self.iteration)?;
            writeln!(f, "---------------------------------")?;
            writeln!(
                f,
                "segments   : {} ({} degenerate)",
                self.segments, self.degenerate
            )?;
            writeln!(
                f,
                "gain       : min {:.4}, median {:.4}, max {:.4}",
                self.gain_min, self.gain_median, self.gain_max
            )?;
            write!(
                f,
                "offset     : min {:.4}, median {:.4}, max {:.4}",
                self.offset_min, self.offset_median, self.offset_max
            )
        } else {
            write!(
                f,
                "iter={}, segments={}, degenerate={}, gain=[{:.4}, {:.4}, {:.4}], offset=[{:.4}, {:.4}, {:.4}]",
                self.iteration,
                self.segments,
                self.degenerate,
                self.gain_min,
                self.gain_median,
                self.gain_max,
                self.offset_min,
                self.offset_median,
                self.offset_max
            )
        }
    }
}

/// One calibration point of a segment's evolution across iterations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvolutionPoint {
    pub iteration: usize,
    pub gain: f64,
    pub offset: f64,
}

/// Calibration tables of a whole run, indexed by iteration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CalibrationHistory {
    tables: Vec<CalibrationTable>,
}

impl CalibrationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the table of the next iteration.
    ///
    /// Return
    /// ----------
    /// * `Err(CoaddError::NonContiguousIteration)` if `table` is not the iteration right after
    ///   the last recorded one.
    pub fn push(&mut self, table: CalibrationTable) -> Result<(), CoaddError> {
        let expected = self.tables.len();
        if table.iteration != expected {
            return Err(CoaddError::NonContiguousIteration {
                expected,
                found: table.iteration,
            });
        }
        self.tables.push(table);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iteration(&self, iteration: usize) -> Option<&CalibrationTable> {
        self.tables.get(iteration)
    }

    pub fn latest(&self) -> Option<&CalibrationTable> {
        self.tables.last()
    }

    pub fn tables(&self) -> &[CalibrationTable] {
        &self.tables
    }

    /// `(iteration, gain, offset)` of `segment` over every recorded iteration.
    pub fn segment_evolution(&self, segment: SegmentId) -> Vec<EvolutionPoint> {
        self.tables
            .iter()
            .filter_map(|table| {
                table.get(segment).map(|r| EvolutionPoint {
                    iteration: table.iteration,
                    gain: r.gain,
                    offset: r.offset,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod calibration_tests {
    use super::*;

    fn record(segment: SegmentId, gain: f64, offset: f64) -> CalibrationRecord {
        CalibrationRecord {
            segment,
            gain,
            offset,
            orbit_size: 10 * (segment + 1),
            timestamp: Some(55200.0 + segment as f64),
        }
    }

    #[test]
    fn test_table_is_sorted_and_indexed() {
        let table = CalibrationTable::new(0, vec![record(2, 1.2, 0.2), record(0, 1.0, 0.0)]);
        assert_eq!(table.gains(), vec![1.0, 1.2]);
        assert_eq!(table.get(2).map(|r| r.offset), Some(0.2));
        assert!(table.get(1).is_none());
        assert_eq!(table.gain(1), 0.0);
        assert_eq!(table.orbit_sizes(), vec![10, 30]);
    }

    #[test]
    fn test_calibrate() {
        let r = record(0, 2.0, 3.0);
        assert_eq!(r.calibrate(7.0), 2.0);
        assert!(CalibrationRecord::neutral(4, 0, None).is_degenerate());
    }

    #[test]
    fn test_stats_ignore_degenerate_segments() {
        let table = CalibrationTable::new(
            3,
            vec![
                record(0, 1.0, -1.0),
                record(1, 3.0, 2.0),
                CalibrationRecord::neutral(2, 0, None),
                record(3, 2.0, 5.0),
            ],
        );
        let stats = table.stats().unwrap();
        assert_eq!(stats.segments, 4);
        assert_eq!(stats.degenerate, 1);
        assert_eq!(stats.gain_min, 1.0);
        assert_eq!(stats.gain_median, 2.0);
        assert_eq!(stats.gain_max, 3.0);
        assert_eq!(stats.offset_median, 2.0);

        let compact = format!("{stats}");
        assert!(compact.starts_with("iter=3, segments=4, degenerate=1"));
        let pretty = format!("{stats:#}");
        assert_eq!(pretty.lines().count(), 5);

        let degenerate = CalibrationTable::new(0, vec![CalibrationRecord::neutral(0, 0, None)]);
        assert!(degenerate.stats().is_none());
    }

    #[test]
    fn test_with_values_keeps_metadata() {
        let table = CalibrationTable::new(1, vec![record(0, 1.0, 0.0), record(1, 1.0, 0.0)]);
        let smoothed = table.with_values(&[0.9, 1.1], &[0.5, -0.5]);
        assert_eq!(smoothed.iteration, 1);
        assert_eq!(smoothed.gains(), vec![0.9, 1.1]);
        assert_eq!(smoothed.orbit_sizes(), table.orbit_sizes());
        assert_eq!(smoothed.timestamps(), table.timestamps());
    }

    #[test]
    fn test_segment_evolution() {
        let mut history = CalibrationHistory::new();
        history
            .push(CalibrationTable::new(0, vec![record(0, 1.0, 0.0), record(1, 1.5, 1.0)]))
            .unwrap();
        history
            .push(CalibrationTable::new(1, vec![record(0, 1.1, 0.1), record(1, 1.6, 0.9)]))
            .unwrap();

        let evolution = history.segment_evolution(1);
        assert_eq!(
            evolution,
            vec![
                EvolutionPoint {
                    iteration: 0,
                    gain: 1.5,
                    offset: 1.0
                },
                EvolutionPoint {
                    iteration: 1,
                    gain: 1.6,
                    offset: 0.9
                },
            ]
        );
        assert!(history.segment_evolution(7).is_empty());
        assert_eq!(history.latest().map(|t| t.iteration), Some(1));
    }
}
