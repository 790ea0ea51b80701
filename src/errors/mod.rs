pub mod dicom;

pub use dicom::DicomError;

use std::fmt;

/// Coarse classification shared by every pipeline error. Callers building a
/// cohort use it to decide between skipping an entry, a patient, or aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Empty or absent series directory, missing mask file.
    MissingData,
    /// Absent series identifier, unparsable contour fields.
    MalformedAnnotation,
    /// Annotation or mask does not line up with the volume.
    GeometryMismatch,
    /// Unreadable slice file or pixel data.
    CorruptImage,
    /// Any other filesystem or serialization failure.
    Io,
}

impl ErrorKind {
    /// Whether a cohort-level caller should skip the patient and continue.
    pub fn is_patient_recoverable(&self) -> bool {
        !matches!(self, ErrorKind::Io)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind_str = match self {
            ErrorKind::MissingData => "missing-data",
            ErrorKind::MalformedAnnotation => "malformed-annotation",
            ErrorKind::GeometryMismatch => "geometry-mismatch",
            ErrorKind::CorruptImage => "corrupt-image",
            ErrorKind::Io => "io",
        };
        write!(f, "{kind_str}")
    }
}

/// Implemented by the error type of each pipeline stage.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}
