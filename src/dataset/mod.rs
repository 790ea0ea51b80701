//! Training sample indexing: patient split, per-patient resolution, slice
//! balancing and lazy (image, mask) materialization.

use std::path::PathBuf;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use snafu::Snafu;

use crate::errors::{Classify, ErrorKind};
use crate::mask::MaskError;
use crate::volume::VolumeError;

pub mod cache;
pub mod index;
pub mod manifest;
pub mod resize;
pub mod sampling;
pub mod split;

pub use cache::*;
pub use index::*;
pub use manifest::*;
pub use resize::*;
pub use sampling::*;
pub use split::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DatasetError {
    #[snafu(display("sample {} out of range for index of {} samples", index, len))]
    SampleOutOfRange { index: usize, len: usize },

    #[snafu(display("patient {} is not part of this index", patient_id))]
    UnknownPatient { patient_id: String },

    #[snafu(display("not found: {}", path.display()))]
    MissingData { path: PathBuf },

    #[snafu(display("slice {} of patient {} is beyond depth {}", index, patient_id, depth))]
    GeometryMismatch {
        patient_id: String,
        index: usize,
        depth: usize,
    },

    #[snafu(display("could not load volume of patient {}: {}", patient_id, source))]
    Volume {
        patient_id: String,
        #[snafu(source(from(VolumeError, Box::new)))]
        source: Box<VolumeError>,
    },

    #[snafu(display("could not load mask of patient {}: {}", patient_id, source))]
    Mask {
        patient_id: String,
        #[snafu(source(from(MaskError, Box::new)))]
        source: Box<MaskError>,
    },

    #[snafu(display("could not resample slice {} of patient {}", index, patient_id))]
    Resize { patient_id: String, index: usize },

    #[snafu(display("manifest IO error for {}: {}", path.display(), source))]
    ManifestIo {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("error in CSV manifest {}: {}", path.display(), source))]
    Csv {
        path: PathBuf,
        #[snafu(source(from(csv::Error, Box::new)))]
        source: Box<csv::Error>,
    },

    #[snafu(display("Arrow error: {:?}", source))]
    Arrow {
        #[snafu(source(from(ArrowError, Box::new)))]
        source: Box<ArrowError>,
    },

    #[snafu(display("Parquet error: {:?}", source))]
    Parquet {
        #[snafu(source(from(ParquetError, Box::new)))]
        source: Box<ParquetError>,
    },

    #[snafu(display("invalid manifest {}: {}", path.display(), message))]
    InvalidManifest { path: PathBuf, message: String },

    #[snafu(display("unsupported manifest format: {} (expected .csv or .parquet)", path.display()))]
    UnsupportedManifestFormat { path: PathBuf },
}

impl Classify for DatasetError {
    fn kind(&self) -> ErrorKind {
        match self {
            DatasetError::Volume { source, .. } => source.kind(),
            DatasetError::Mask { source, .. } => source.kind(),
            DatasetError::UnknownPatient { .. } | DatasetError::MissingData { .. } => {
                ErrorKind::MissingData
            }
            DatasetError::SampleOutOfRange { .. }
            | DatasetError::GeometryMismatch { .. }
            | DatasetError::Resize { .. } => ErrorKind::GeometryMismatch,
            DatasetError::ManifestIo { .. }
            | DatasetError::Csv { .. }
            | DatasetError::Arrow { .. }
            | DatasetError::Parquet { .. }
            | DatasetError::InvalidManifest { .. }
            | DatasetError::UnsupportedManifestFormat { .. } => ErrorKind::Io,
        }
    }
}
