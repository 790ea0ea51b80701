//! Reconstruction of calibrated CT volumes from a directory of single-frame slices.

use std::path::PathBuf;

use snafu::Snafu;

use crate::errors::{Classify, DicomError, ErrorKind};

pub mod series;
pub mod slice;
pub mod window;

pub use series::*;
pub use slice::*;
pub use window::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum VolumeError {
    #[snafu(display("no slice files found in {}", path.display()))]
    MissingData { path: PathBuf },

    #[snafu(display("could not list series directory {}", path.display()))]
    ListSeries {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("corrupt slice file {}: {}", path.display(), source))]
    CorruptImage {
        path: PathBuf,
        #[snafu(source(from(DicomError, Box::new)))]
        source: Box<DicomError>,
    },

    #[snafu(display("inconsistent series geometry: {}", message))]
    InconsistentGeometry { message: String },

    #[snafu(display("slice index {} out of range for depth {}", index, depth))]
    SliceOutOfRange { index: usize, depth: usize },

    #[snafu(display("cannot build a volume from zero slices"))]
    EmptyVolume,
}

impl Classify for VolumeError {
    fn kind(&self) -> ErrorKind {
        match self {
            VolumeError::MissingData { .. } | VolumeError::EmptyVolume => ErrorKind::MissingData,
            VolumeError::ListSeries { .. } => ErrorKind::Io,
            VolumeError::CorruptImage { .. } | VolumeError::InconsistentGeometry { .. } => {
                ErrorKind::CorruptImage
            }
            VolumeError::SliceOutOfRange { .. } => ErrorKind::GeometryMismatch,
        }
    }
}
