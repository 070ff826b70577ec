use thiserror::Error;

use crate::constants::{PixelIndex, SegmentId};

#[derive(Error, Debug)]
pub enum CoaddError {
    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV read/write error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Segment {id} could not be loaded from {path}")]
    SegmentNotFound { id: SegmentId, path: String },

    #[error("Template for segment {id} could not be loaded from {path}")]
    TemplateNotFound { id: SegmentId, path: String },

    #[error("Defect mask not found at: {0}")]
    DefectMaskNotFound(String),

    #[error("Mask has {found} pixels, pixelization expects {expected}")]
    MaskSizeMismatch { expected: usize, found: usize },

    #[error("Map has {found} pixels, pixelization expects {expected}")]
    MapSizeMismatch { expected: usize, found: usize },

    #[error("Segment {segment} references pixel {pixel} outside a {npix}-pixel map")]
    PixelOutOfRange {
        segment: SegmentId,
        pixel: PixelIndex,
        npix: usize,
    },

    #[error("Segment {segment}: {what} has {found} entries, expected {expected}")]
    SampleLengthMismatch {
        segment: SegmentId,
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Invalid coaddition parameter: {0}")]
    InvalidCoaddParameter(String),

    #[error("Invalid smoother parameter: {0}")]
    InvalidSmootherParameter(String),

    #[error("Spline of degree {degree} needs more than {degree} points, got {found}")]
    InsufficientSplineData { degree: usize, found: usize },

    #[error("Spline normal equations are singular")]
    SingularSplineSystem,

    #[error("No archived calibration for iteration {0}")]
    ArchiveIterationNotFound(usize),

    #[error("Segment {0} has no timestamp")]
    MissingTimestamp(SegmentId),

    #[error("Calibration history expects iteration {expected}, got {found}")]
    NonContiguousIteration { expected: usize, found: usize },
}

impl PartialEq for CoaddError {
    fn eq(&self, other: &Self) -> bool {
        use CoaddError::*;
        match (self, other) {
            // Wrapped library errors are not comparable: equal if same variant
            (IoError(_), IoError(_)) => true,
            (CsvError(_), CsvError(_)) => true,
            (JsonError(_), JsonError(_)) => true,

            (SegmentNotFound { id: a, path: pa }, SegmentNotFound { id: b, path: pb }) => {
                a == b && pa == pb
            }
            (TemplateNotFound { id: a, path: pa }, TemplateNotFound { id: b, path: pb }) => {
                a == b && pa == pb
            }
            (DefectMaskNotFound(a), DefectMaskNotFound(b)) => a == b,
            (
                MaskSizeMismatch {
                    expected: ea,
                    found: fa,
                },
                MaskSizeMismatch {
                    expected: eb,
                    found: fb,
                },
            ) => ea == eb && fa == fb,
            (
                MapSizeMismatch {
                    expected: ea,
                    found: fa,
                },
                MapSizeMismatch {
                    expected: eb,
                    found: fb,
                },
            ) => ea == eb && fa == fb,
            (
                PixelOutOfRange {
                    segment: sa,
                    pixel: pa,
                    npix: na,
                },
                PixelOutOfRange {
                    segment: sb,
                    pixel: pb,
                    npix: nb,
                },
            ) => sa == sb && pa == pb && na == nb,
            (
                SampleLengthMismatch {
                    segment: sa,
                    what: wa,
                    expected: ea,
                    found: fa,
                },
                SampleLengthMismatch {
                    segment: sb,
                    what: wb,
                    expected: eb,
                    found: fb,
                },
            ) => sa == sb && wa == wb && ea == eb && fa == fb,
            (InvalidCoaddParameter(a), InvalidCoaddParameter(b)) => a == b,
            (InvalidSmootherParameter(a), InvalidSmootherParameter(b)) => a == b,
            (
                InsufficientSplineData {
                    degree: da,
                    found: fa,
                },
                InsufficientSplineData {
                    degree: db,
                    found: fb,
                },
            ) => da == db && fa == fb,
            (ArchiveIterationNotFound(a), ArchiveIterationNotFound(b)) => a == b,
            (MissingTimestamp(a), MissingTimestamp(b)) => a == b,
            (
                NonContiguousIteration {
                    expected: ea,
                    found: fa,
                },
                NonContiguousIteration {
                    expected: eb,
                    found: fb,
                },
            ) => ea == eb && fa == fb,

            // Unit variants
            (SingularSplineSystem, SingularSplineSystem) => true,

            _ => false,
        }
    }
}
