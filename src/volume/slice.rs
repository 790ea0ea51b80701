use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use dicom::dictionary_std::tags;
use dicom::object::{FileDicomObject, InMemDicomObject};
use dicom::pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder};
use ndarray::{Array2, Axis};
use snafu::ResultExt;

use crate::errors::dicom::{PixelDataSnafu, ReadSnafu, UnsupportedPixelLayoutSnafu};
use crate::errors::DicomError;
use crate::file::DicomFileOperations;
use crate::metadata::{
    required_str, required_usize, ImagePosition, PixelSpacing, Rescale, SliceKey,
    SliceKeyScheme, SliceThickness,
};
use crate::volume::{CorruptImageSnafu, VolumeError};

/// Everything about a slice except its pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceHeader {
    pub path: Option<PathBuf>,
    pub sop_instance_uid: Option<String>,
    pub position: ImagePosition,
    pub rescale: Rescale,
    pub spacing: PixelSpacing,
    pub thickness: SliceThickness,
    pub rows: usize,
    pub columns: usize,
}

impl SliceHeader {
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.columns)
    }

    /// Identity of this slice under `scheme`. `None` if the scheme's attribute is absent.
    pub fn key(&self, scheme: SliceKeyScheme) -> Option<SliceKey> {
        match scheme {
            SliceKeyScheme::SopInstanceUid => {
                self.sop_instance_uid.as_deref().map(SliceKey::from_sop)
            }
            SliceKeyScheme::ZPosition => Some(SliceKey::from_z(self.position.z())),
        }
    }

    /// Stacking order: ascending z, ties broken by SOP Instance UID and then by path.
    pub fn stack_order(&self, other: &Self) -> Ordering {
        self.position
            .z()
            .total_cmp(&other.position.z())
            .then_with(|| self.sop_instance_uid.cmp(&other.sop_instance_uid))
            .then_with(|| self.path.cmp(&other.path))
    }

    pub fn with_path<P: AsRef<Path>>(self, path: P) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            ..self
        }
    }

    /// Read only the header of a slice file, leaving the pixel data on disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let path = path.as_ref();
        let file = path
            .dcmread_header()
            .context(ReadSnafu)
            .context(CorruptImageSnafu { path })?;
        let header = Self::try_from(&file).context(CorruptImageSnafu { path })?;
        Ok(header.with_path(path))
    }
}

impl TryFrom<&FileDicomObject<InMemDicomObject>> for SliceHeader {
    type Error = DicomError;

    fn try_from(file: &FileDicomObject<InMemDicomObject>) -> Result<Self, Self::Error> {
        let sop_instance_uid = required_str(file, tags::SOP_INSTANCE_UID, "SOP Instance UID")
            .ok()
            .filter(|uid| !uid.is_empty());
        Ok(Self {
            path: None,
            sop_instance_uid,
            position: ImagePosition::try_from(file)?,
            rescale: Rescale::try_from(file)?,
            spacing: PixelSpacing::try_from(file)?,
            thickness: SliceThickness::try_from(file)?,
            rows: required_usize(file, tags::ROWS, "Rows")?,
            columns: required_usize(file, tags::COLUMNS, "Columns")?,
        })
    }
}

/// One decoded 2D frame with its stored (uncalibrated) pixel values.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub header: SliceHeader,
    pub pixels: Array2<i16>,
}

impl Slice {
    pub fn new(header: SliceHeader, pixels: Array2<i16>) -> Self {
        Self { header, pixels }
    }

    /// Pixel values in Hounsfield units.
    pub fn calibrated(&self) -> Array2<i16> {
        self.header.rescale.apply(&self.pixels)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let path = path.as_ref();
        let file = path
            .dcmread()
            .context(ReadSnafu)
            .context(CorruptImageSnafu { path })?;
        let slice = Self::try_from(&file).context(CorruptImageSnafu { path })?;
        Ok(Self {
            header: slice.header.with_path(path),
            ..slice
        })
    }
}

impl TryFrom<&FileDicomObject<InMemDicomObject>> for Slice {
    type Error = DicomError;

    fn try_from(file: &FileDicomObject<InMemDicomObject>) -> Result<Self, Self::Error> {
        let header = SliceHeader::try_from(file)?;
        let pixels = decode_stored_pixels(file)?;
        if pixels.dim() != header.shape() {
            return Err(DicomError::InvalidValueError {
                name: "Pixel Data",
                value: format!(
                    "decoded shape {:?} does not match Rows/Columns {:?}",
                    pixels.dim(),
                    header.shape()
                ),
            });
        }
        Ok(Self { header, pixels })
    }
}

/// Decode the stored values of a single-frame, single-sample image without applying
/// the modality LUT. Calibration is applied separately so it can be checked exactly.
pub fn decode_stored_pixels(
    file: &FileDicomObject<InMemDicomObject>,
) -> Result<Array2<i16>, DicomError> {
    let decoded = file.decode_pixel_data().context(PixelDataSnafu)?;
    let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
    let array = decoded
        .to_ndarray_with_options::<i16>(&options)
        .context(PixelDataSnafu)?;

    let (frames, _, _, samples) = array.dim();
    if frames != 1 || samples != 1 {
        return UnsupportedPixelLayoutSnafu { frames, samples }.fail();
    }
    Ok(array.index_axis_move(Axis(3), 0).index_axis_move(Axis(0), 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::header;
    use dicom::object::open_file;

    #[test]
    fn test_slice_from_ct_small() {
        let path = dicom_test_files::path("pydicom/CT_small.dcm").unwrap();
        let slice = Slice::open(&path).unwrap();

        assert_eq!(slice.pixels.dim(), (128, 128));
        assert_eq!(slice.header.shape(), (128, 128));
        assert_eq!(slice.header.path.as_deref(), Some(path.as_path()));
        assert!(slice.header.sop_instance_uid.is_some());

        // Calibrated values are exactly the stored values shifted by the intercept
        let calibrated = slice.calibrated();
        let intercept = slice.header.rescale.intercept as i16;
        assert!(slice.header.rescale.has_unit_slope());
        for (raw, hu) in slice.pixels.iter().zip(calibrated.iter()) {
            assert_eq!(*hu, raw + intercept);
        }
    }

    #[test]
    fn test_header_matches_full_read() {
        let path = dicom_test_files::path("pydicom/CT_small.dcm").unwrap();
        let header = SliceHeader::open(&path).unwrap();
        let slice = Slice::open(&path).unwrap();
        assert_eq!(header, slice.header);
    }

    #[test]
    fn test_open_corrupt_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.dcm");
        std::fs::write(&path, b"not a dicom file").unwrap();

        let result = Slice::open(&path);
        assert!(matches!(result, Err(VolumeError::CorruptImage { .. })));
    }

    #[test]
    fn test_missing_calibration_is_corrupt() {
        let path = dicom_test_files::path("pydicom/CT_small.dcm").unwrap();
        let mut file = open_file(&path).unwrap();
        file.remove_element(tags::RESCALE_SLOPE);
        let result = SliceHeader::try_from(&file);
        assert!(matches!(
            result,
            Err(DicomError::MissingPropertyError {
                name: "Rescale Slope"
            })
        ));
    }

    #[test]
    fn test_stack_order_tie_break() {
        let a = header(Some("1.2.1"), 10.0, (4, 4));
        let b = header(Some("1.2.2"), 10.0, (4, 4));
        let c = header(Some("1.2.0"), 12.5, (4, 4));
        assert_eq!(a.stack_order(&b), Ordering::Less);
        assert_eq!(b.stack_order(&a), Ordering::Greater);
        assert_eq!(c.stack_order(&a), Ordering::Greater);
    }

    #[test]
    fn test_key_schemes() {
        let h = header(Some("1.2.3"), -125.0, (4, 4));
        assert_eq!(
            h.key(SliceKeyScheme::SopInstanceUid),
            Some(SliceKey::Sop("1.2.3".into()))
        );
        assert_eq!(h.key(SliceKeyScheme::ZPosition), Some(SliceKey::from_z(-125.0)));

        let anonymous = header(None, -125.0, (4, 4));
        assert_eq!(anonymous.key(SliceKeyScheme::SopInstanceUid), None);
    }
}
