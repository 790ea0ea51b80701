//! Typed views over the DICOM attributes a CT slice needs: geometry,
//! calibration and identity.

use dicom::core::Tag;
use dicom::object::{FileDicomObject, InMemDicomObject};
use snafu::{OptionExt, ResultExt};

use crate::errors::dicom::{ConvertValueSnafu, MissingPropertySnafu};
use crate::errors::DicomError;

pub mod calibration;
pub use calibration::*;

pub mod identity;
pub use identity::*;

pub mod position;
pub use position::*;

pub mod spacing;
pub use spacing::*;

pub(crate) fn required_str(
    file: &FileDicomObject<InMemDicomObject>,
    tag: Tag,
    name: &'static str,
) -> Result<String, DicomError> {
    Ok(file
        .get(tag)
        .context(MissingPropertySnafu { name })?
        .value()
        .to_str()
        .context(ConvertValueSnafu { name })?
        .trim()
        .trim_end_matches('\0')
        .to_string())
}

pub(crate) fn required_f64(
    file: &FileDicomObject<InMemDicomObject>,
    tag: Tag,
    name: &'static str,
) -> Result<f64, DicomError> {
    file.get(tag)
        .context(MissingPropertySnafu { name })?
        .value()
        .to_float64()
        .context(ConvertValueSnafu { name })
}

pub(crate) fn optional_f64(
    file: &FileDicomObject<InMemDicomObject>,
    tag: Tag,
    name: &'static str,
) -> Result<Option<f64>, DicomError> {
    match file.get(tag) {
        Some(element) => element
            .value()
            .to_float64()
            .map(Some)
            .context(ConvertValueSnafu { name }),
        None => Ok(None),
    }
}

pub(crate) fn required_multi_f64(
    file: &FileDicomObject<InMemDicomObject>,
    tag: Tag,
    name: &'static str,
) -> Result<Vec<f64>, DicomError> {
    file.get(tag)
        .context(MissingPropertySnafu { name })?
        .value()
        .to_multi_float64()
        .context(ConvertValueSnafu { name })
}

pub(crate) fn required_usize(
    file: &FileDicomObject<InMemDicomObject>,
    tag: Tag,
    name: &'static str,
) -> Result<usize, DicomError> {
    let value = file
        .get(tag)
        .context(MissingPropertySnafu { name })?
        .value()
        .to_int::<u32>()
        .context(ConvertValueSnafu { name })?;
    Ok(value as usize)
}
