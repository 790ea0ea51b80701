//! Binary tumor masks rasterized from annotation contours, aligned with a volume.

use std::path::PathBuf;

use ndarray_npy::{ReadNpyError, WriteNpyError};
use snafu::Snafu;

use crate::errors::{Classify, ErrorKind};

pub mod build;
pub mod io;
pub mod raster;
pub mod stats;

pub use build::*;
pub use io::*;
pub use raster::*;
pub use stats::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MaskError {
    #[snafu(display("mask file not found: {}", path.display()))]
    MissingMask { path: PathBuf },

    #[snafu(display("could not read mask {}: {}", path.display(), source))]
    ReadNpy {
        path: PathBuf,
        #[snafu(source(from(ReadNpyError, Box::new)))]
        source: Box<ReadNpyError>,
    },

    #[snafu(display("could not write mask {}: {}", path.display(), source))]
    WriteNpy {
        path: PathBuf,
        #[snafu(source(from(WriteNpyError, Box::new)))]
        source: Box<WriteNpyError>,
    },

    #[snafu(display("could not create mask directory {}", path.display()))]
    CreateDir {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("mask {} holds non-binary value {}", path.display(), value))]
    NotBinary { path: PathBuf, value: u8 },

    #[snafu(display(
        "mask {} has shape {:?}, expected {:?}",
        path.display(),
        found,
        expected
    ))]
    ShapeMismatch {
        path: PathBuf,
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
}

impl Classify for MaskError {
    fn kind(&self) -> ErrorKind {
        match self {
            MaskError::MissingMask { .. } => ErrorKind::MissingData,
            MaskError::ReadNpy { .. } | MaskError::NotBinary { .. } => ErrorKind::CorruptImage,
            MaskError::ShapeMismatch { .. } => ErrorKind::GeometryMismatch,
            MaskError::WriteNpy { .. } | MaskError::CreateDir { .. } => ErrorKind::Io,
        }
    }
}
