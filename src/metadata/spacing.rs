use dicom::dictionary_std::tags;
use dicom::object::{FileDicomObject, InMemDicomObject};
use serde::Serialize;
use snafu::{OptionExt, ResultExt};

use crate::errors::dicom::{ConvertValueSnafu, InvalidValueSnafu, MissingPropertySnafu};
use crate::errors::DicomError;

/// Physical distance between pixel centres within a slice, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelSpacing {
    pub row_mm: f64,
    pub column_mm: f64,
}

impl PixelSpacing {
    pub fn new(row_mm: f64, column_mm: f64) -> Self {
        Self { row_mm, column_mm }
    }

    /// Spacing after the slice is resampled from `(rows, columns)` to `(target_rows, target_columns)`.
    pub fn rescaled(
        &self,
        (rows, columns): (usize, usize),
        (target_rows, target_columns): (usize, usize),
    ) -> Self {
        Self {
            row_mm: self.row_mm * rows as f64 / target_rows.max(1) as f64,
            column_mm: self.column_mm * columns as f64 / target_columns.max(1) as f64,
        }
    }
}

impl From<PixelSpacing> for (f64, f64) {
    fn from(spacing: PixelSpacing) -> Self {
        (spacing.row_mm, spacing.column_mm)
    }
}

impl TryFrom<&FileDicomObject<InMemDicomObject>> for PixelSpacing {
    type Error = DicomError;

    fn try_from(file: &FileDicomObject<InMemDicomObject>) -> Result<Self, Self::Error> {
        // Read the spacing, first from the Pixel Spacing tag, then from the Imager Pixel Spacing tag.
        let spacing = file
            .get(tags::PIXEL_SPACING)
            .or_else(|| file.get(tags::IMAGER_PIXEL_SPACING))
            .context(MissingPropertySnafu {
                name: "Pixel Spacing",
            })?
            .value()
            .to_multi_float64()
            .context(ConvertValueSnafu {
                name: "Pixel Spacing",
            })?;

        // First value is row spacing (y), second is column spacing (x)
        match spacing.as_slice() {
            [row, column, ..] if *row > 0.0 && *column > 0.0 => Ok(Self::new(*row, *column)),
            _ => InvalidValueSnafu {
                name: "Pixel Spacing",
                value: format!("{spacing:?}"),
            }
            .fail(),
        }
    }
}

/// Spacing of a reconstructed volume as (stack, row, column), in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoxelSpacing {
    pub stack_mm: f64,
    pub row_mm: f64,
    pub column_mm: f64,
}

impl VoxelSpacing {
    pub fn new(stack_mm: f64, pixel: PixelSpacing) -> Self {
        Self {
            stack_mm,
            row_mm: pixel.row_mm,
            column_mm: pixel.column_mm,
        }
    }
}

impl From<VoxelSpacing> for (f64, f64, f64) {
    fn from(spacing: VoxelSpacing) -> Self {
        (spacing.stack_mm, spacing.row_mm, spacing.column_mm)
    }
}
