use dicom::dictionary_std::tags;
use dicom::object::{FileDicomObject, InMemDicomObject};
use ndarray::Array2;
use serde::Serialize;

use crate::errors::DicomError;
use crate::metadata::required_f64;

/// Linear calibration from stored pixel values to Hounsfield units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rescale {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for Rescale {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

impl Rescale {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    /// A slope of exactly one skips the floating point multiplication.
    pub fn has_unit_slope(&self) -> bool {
        self.slope == 1.0
    }

    /// Calibrate a single stored value. Multiplication happens in `f64` and is cast back
    /// to `i16` (saturating); the intercept is truncated to `i16` and added with saturation.
    pub fn apply_value(&self, raw: i16) -> i16 {
        let scaled = if self.has_unit_slope() {
            raw
        } else {
            (raw as f64 * self.slope) as i16
        };
        scaled.saturating_add(self.intercept as i16)
    }

    pub fn apply(&self, raw: &Array2<i16>) -> Array2<i16> {
        raw.mapv(|v| self.apply_value(v))
    }
}

impl TryFrom<&FileDicomObject<InMemDicomObject>> for Rescale {
    type Error = DicomError;

    fn try_from(file: &FileDicomObject<InMemDicomObject>) -> Result<Self, Self::Error> {
        let slope = required_f64(file, tags::RESCALE_SLOPE, "Rescale Slope")?;
        let intercept = required_f64(file, tags::RESCALE_INTERCEPT, "Rescale Intercept")?;
        Ok(Self { slope, intercept })
    }
}
