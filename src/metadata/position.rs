use dicom::dictionary_std::tags;
use dicom::object::{FileDicomObject, InMemDicomObject};
use serde::Serialize;

use crate::errors::dicom::InvalidValueSnafu;
use crate::errors::DicomError;
use crate::metadata::{optional_f64, required_multi_f64};

/// Image Position (Patient): the centre of the first transmitted pixel, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImagePosition(pub [f64; 3]);

impl ImagePosition {
    /// Position along the stacking axis.
    pub fn z(&self) -> f64 {
        self.0[2]
    }
}

impl TryFrom<&FileDicomObject<InMemDicomObject>> for ImagePosition {
    type Error = DicomError;

    fn try_from(file: &FileDicomObject<InMemDicomObject>) -> Result<Self, Self::Error> {
        let values = required_multi_f64(
            file,
            tags::IMAGE_POSITION_PATIENT,
            "Image Position (Patient)",
        )?;
        match values.as_slice() {
            [x, y, z] if x.is_finite() && y.is_finite() && z.is_finite() => {
                Ok(Self([*x, *y, *z]))
            }
            _ => InvalidValueSnafu {
                name: "Image Position (Patient)",
                value: format!("{values:?}"),
            }
            .fail(),
        }
    }
}

/// Declared Slice Thickness, if present and positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SliceThickness(pub Option<f64>);

impl TryFrom<&FileDicomObject<InMemDicomObject>> for SliceThickness {
    type Error = DicomError;

    fn try_from(file: &FileDicomObject<InMemDicomObject>) -> Result<Self, Self::Error> {
        let thickness = optional_f64(file, tags::SLICE_THICKNESS, "Slice Thickness")?;
        Ok(Self(thickness.filter(|t| *t > 0.0)))
    }
}
