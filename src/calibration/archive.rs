//! Per-iteration persistence of calibration tables.
//!
//! The CSV archive writes one `fitvals_iter_{k}.csv` per outer iteration:
//!
//! ```text
//! segment,gain,offset,orbit_size,timestamp
//! 0,1.0021,0.4410,18234,55203.11
//! 1,0.0,0.0,0,
//! ```
//!
//! An empty `timestamp` field means the segment carried no timestamp.
use std::collections::BTreeMap;

use camino::Utf8PathBuf;

use super::{CalibrationHistory, CalibrationRecord, CalibrationTable};
use crate::coadd_errors::CoaddError;

/// Storage backend for per-iteration calibration tables.
pub trait CalibrationArchive {
    /// Persist `table` under its iteration, replacing any earlier table.
    fn save_iteration(&mut self, table: &CalibrationTable) -> Result<(), CoaddError>;

    /// Load the table archived for `iteration`.
    ///
    /// Return
    /// ----------
    /// * `Err(CoaddError::ArchiveIterationNotFound)` if nothing was archived for it.
    fn load_iteration(&self, iteration: usize) -> Result<CalibrationTable, CoaddError>;
}

/// [`CalibrationArchive`] writing one CSV table per iteration into a directory.
#[derive(Debug, Clone)]
pub struct CsvCalibrationArchive {
    directory: Utf8PathBuf,
}

impl CsvCalibrationArchive {
    /// Create an archive rooted at `directory`, creating it if needed.
    pub fn new(directory: impl Into<Utf8PathBuf>) -> Result<Self, CoaddError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(CsvCalibrationArchive { directory })
    }

    pub fn iteration_path(&self, iteration: usize) -> Utf8PathBuf {
        self.directory
            .join(format!("fitvals_iter_{iteration}.csv"))
    }
}

impl CalibrationArchive for CsvCalibrationArchive {
    fn save_iteration(&mut self, table: &CalibrationTable) -> Result<(), CoaddError> {
        let mut writer = csv::Writer::from_path(self.iteration_path(table.iteration))?;
        for record in table.records() {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn load_iteration(&self, iteration: usize) -> Result<CalibrationTable, CoaddError> {
        let path = self.iteration_path(iteration);
        if !path.exists() {
            return Err(CoaddError::ArchiveIterationNotFound(iteration));
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let records = reader
            .deserialize::<CalibrationRecord>()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CalibrationTable::new(iteration, records))
    }
}

/// [`CalibrationArchive`] keeping tables in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCalibrationArchive {
    tables: BTreeMap<usize, CalibrationTable>,
}

impl MemoryCalibrationArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Every archived table, in iteration order.
    ///
    /// Return
    /// ----------
    /// * `Err(CoaddError::NonContiguousIteration)` if the archived iterations do not run
    ///   `0, 1, 2, …` without a gap.
    pub fn to_history(&self) -> Result<CalibrationHistory, CoaddError> {
        let mut history = CalibrationHistory::new();
        for table in self.tables.values() {
            history.push(table.clone())?;
        }
        Ok(history)
    }
}

impl CalibrationArchive for MemoryCalibrationArchive {
    fn save_iteration(&mut self, table: &CalibrationTable) -> Result<(), CoaddError> {
        self.tables.insert(table.iteration, table.clone());
        Ok(())
    }

    fn load_iteration(&self, iteration: usize) -> Result<CalibrationTable, CoaddError> {
        self.tables
            .get(&iteration)
            .cloned()
            .ok_or(CoaddError::ArchiveIterationNotFound(iteration))
    }
}
