//! Fixtures shared by unit tests.

use std::path::Path;

use ndarray::Array2;

use crate::metadata::{ImagePosition, PixelSpacing, Rescale, SliceThickness};
use crate::test_support::write_ct_series;
use crate::volume::{Slice, SliceHeader};

pub use crate::test_support::series_sop_uid as sop_uid;

pub const CT_SMALL: &str = "pydicom/CT_small.dcm";

/// A header with 0.7 mm pixels, 1.25 mm thickness and the usual CT intercept.
pub fn header(sop: Option<&str>, z: f64, (rows, columns): (usize, usize)) -> SliceHeader {
    SliceHeader {
        path: None,
        sop_instance_uid: sop.map(str::to_string),
        position: ImagePosition([-150.0, -150.0, z]),
        rescale: Rescale::new(1.0, -1024.0),
        spacing: PixelSpacing::new(0.7, 0.7),
        thickness: SliceThickness(Some(1.25)),
        rows,
        columns,
    }
}

pub fn slice(sop: Option<&str>, z: f64, pixels: Array2<i16>) -> Slice {
    Slice::new(header(sop, z, pixels.dim()), pixels)
}

/// Write one CT_small copy per entry of `zs` into `dir`. Returns the headers in write order.
pub fn write_series(dir: &Path, zs: &[f64]) -> Vec<SliceHeader> {
    let template = dicom_test_files::path(CT_SMALL).unwrap();
    write_ct_series(&template, dir, zs)
        .unwrap()
        .iter()
        .map(|path| SliceHeader::open(path).unwrap())
        .collect()
}

/// Lay out `raw_dir/{patient_id}/series/` with one slice per entry of `zs`.
pub fn write_patient(raw_dir: &Path, patient_id: &str, zs: &[f64]) -> Vec<SliceHeader> {
    write_series(&raw_dir.join(patient_id).join("series"), zs)
}
