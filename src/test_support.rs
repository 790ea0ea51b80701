//! Synthetic series for tests and benchmarks.
//!
//! Each slice is a copy of a template file with its own position and SOP Instance UID.

use std::path::{Path, PathBuf};

use dicom::core::{dicom_value, DataElement, PrimitiveValue, VR};
use dicom::dictionary_std::tags;
use dicom::object::{open_file, ReadError, WriteError};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SeriesWriteError {
    #[snafu(display("could not read template {}: {:?}", path.display(), source))]
    ReadTemplate {
        path: PathBuf,
        #[snafu(source(from(ReadError, Box::new)))]
        source: Box<ReadError>,
    },

    #[snafu(display("could not create {}", path.display()))]
    CreateSeriesDir {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("could not write {}: {:?}", path.display(), source))]
    WriteSlice {
        path: PathBuf,
        #[snafu(source(from(WriteError, Box::new)))]
        source: Box<WriteError>,
    },
}

/// SOP Instance UID given to the `index`-th slice written by [`write_ct_series`].
pub fn series_sop_uid(index: usize) -> String {
    format!("1.2.826.0.1.3680043.2.1125.{}", index + 1)
}

/// Write one copy of `template` per entry of `zs` into `dir`, in order.
/// Returns the written paths.
pub fn write_ct_series(
    template: &Path,
    dir: &Path,
    zs: &[f64],
) -> Result<Vec<PathBuf>, SeriesWriteError> {
    std::fs::create_dir_all(dir).context(CreateSeriesDirSnafu { path: dir })?;
    zs.iter()
        .enumerate()
        .map(|(i, z)| {
            let mut file = open_file(template).context(ReadTemplateSnafu { path: template })?;
            let z = format!("{z}");
            file.put(DataElement::new(
                tags::IMAGE_POSITION_PATIENT,
                VR::DS,
                dicom_value!(Strs, ["-158.135803", "-179.035797", z.as_str()]),
            ));
            file.put(DataElement::new(
                tags::SOP_INSTANCE_UID,
                VR::UI,
                PrimitiveValue::from(series_sop_uid(i)),
            ));
            let path = dir.join(format!("slice_{i:03}.dcm"));
            file.write_to_file(&path)
                .context(WriteSliceSnafu { path: &path })?;
            Ok(path)
        })
        .collect()
}

/// Evenly spaced positions `0, step, 2 * step, ...`.
pub fn evenly_spaced(depth: usize, step: f64) -> Vec<f64> {
    (0..depth).map(|i| i as f64 * step).collect()
}
