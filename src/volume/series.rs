use std::path::{Path, PathBuf};

use ndarray::{s, Array2, Array3, ArrayView2};
use snafu::ResultExt;
use tracing::debug;

use crate::file::DicomFileOperations;
use crate::metadata::{PixelSpacing, SliceKey, SliceKeyScheme, VoxelSpacing};
use crate::volume::{
    InconsistentGeometrySnafu, ListSeriesSnafu, Slice, SliceHeader, VolumeError, Window,
};

/// Stack spacing used when a series declares no thickness and has a single slice.
pub const FALLBACK_STACK_SPACING_MM: f64 = 1.0;

/// Tolerance when comparing pixel spacing between slices of one series.
const SPACING_TOLERANCE_MM: f64 = 1e-3;

fn check_geometry<'a, I>(headers: I) -> Result<(), VolumeError>
where
    I: IntoIterator<Item = &'a SliceHeader>,
{
    let mut headers = headers.into_iter();
    let first = match headers.next() {
        Some(first) => first,
        None => return Ok(()),
    };
    for header in headers {
        if header.shape() != first.shape() {
            return InconsistentGeometrySnafu {
                message: format!(
                    "slice shape {:?} differs from {:?}",
                    header.shape(),
                    first.shape()
                ),
            }
            .fail();
        }
        let row_delta = (header.spacing.row_mm - first.spacing.row_mm).abs();
        let column_delta = (header.spacing.column_mm - first.spacing.column_mm).abs();
        if row_delta > SPACING_TOLERANCE_MM || column_delta > SPACING_TOLERANCE_MM {
            return InconsistentGeometrySnafu {
                message: format!(
                    "pixel spacing {:?} differs from {:?}",
                    header.spacing, first.spacing
                ),
            }
            .fail();
        }
    }
    Ok(())
}

/// Stack spacing from the first slice's declared thickness, falling back to the
/// distance between the first two slice positions.
fn stack_spacing(headers: &[SliceHeader]) -> f64 {
    match headers {
        [] => FALLBACK_STACK_SPACING_MM,
        [first, rest @ ..] => first.thickness.0.unwrap_or_else(|| {
            rest.first()
                .map(|second| (second.position.z() - first.position.z()).abs())
                .filter(|d| *d > 0.0)
                .unwrap_or(FALLBACK_STACK_SPACING_MM)
        }),
    }
}

fn list_slice_files(dir: &Path) -> Result<Vec<PathBuf>, VolumeError> {
    if !dir.is_dir() {
        return Err(VolumeError::MissingData {
            path: dir.to_path_buf(),
        });
    }
    let files = dir.find_dicoms().context(ListSeriesSnafu { path: dir })?;
    if files.is_empty() {
        return Err(VolumeError::MissingData {
            path: dir.to_path_buf(),
        });
    }
    Ok(files)
}

/// Number of slice files below `dir`, without decoding any of them.
pub fn count_series_files<P: AsRef<Path>>(dir: P) -> Result<usize, VolumeError> {
    Ok(list_slice_files(dir.as_ref())?.len())
}

/// Ordered slice headers of one series. Pixel data stays on disk until requested.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesLayout {
    headers: Vec<SliceHeader>,
}

impl SeriesLayout {
    /// Sort headers into stacking order and check that they share one geometry.
    pub fn new(mut headers: Vec<SliceHeader>) -> Result<Self, VolumeError> {
        if headers.is_empty() {
            return Err(VolumeError::EmptyVolume);
        }
        check_geometry(&headers)?;
        headers.sort_by(|a, b| a.stack_order(b));
        Ok(Self { headers })
    }

    /// Read the headers of every slice file below `dir`.
    pub fn scan<P: AsRef<Path>>(dir: P) -> Result<Self, VolumeError> {
        let dir = dir.as_ref();
        let headers = list_slice_files(dir)?
            .iter()
            .map(SliceHeader::open)
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Scanned {} slice headers in {}", headers.len(), dir.display());
        Self::new(headers)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn headers(&self) -> &[SliceHeader] {
        &self.headers
    }

    /// (rows, columns) shared by every slice.
    pub fn slice_shape(&self) -> (usize, usize) {
        self.headers[0].shape()
    }

    /// (depth, rows, columns) of the volume this layout describes.
    pub fn shape(&self) -> (usize, usize, usize) {
        let (rows, columns) = self.slice_shape();
        (self.len(), rows, columns)
    }

    /// Decode and calibrate the slice at depth `index`.
    pub fn load_slice(&self, index: usize) -> Result<Array2<i16>, VolumeError> {
        let header = self
            .headers
            .get(index)
            .ok_or(VolumeError::SliceOutOfRange {
                index,
                depth: self.len(),
            })?;
        let path = header.path.as_ref().ok_or(VolumeError::InconsistentGeometry {
            message: format!("slice {index} has no source file"),
        })?;
        let slice = Slice::open(path)?;
        if slice.header.shape() != header.shape() {
            return InconsistentGeometrySnafu {
                message: format!("{} changed shape since it was scanned", path.display()),
            }
            .fail();
        }
        Ok(slice.calibrated())
    }

    /// Decode every slice into a volume.
    pub fn load_volume(&self) -> Result<Volume, VolumeError> {
        let slices = self
            .headers
            .iter()
            .map(|header| match &header.path {
                Some(path) => Slice::open(path),
                None => InconsistentGeometrySnafu {
                    message: "slice has no source file".to_string(),
                }
                .fail(),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Volume::from_slices(slices)
    }
}

/// A calibrated CT volume with shape (depth, rows, columns), ordered by ascending z.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Array3<i16>,
    headers: Vec<SliceHeader>,
    spacing: VoxelSpacing,
}

impl Volume {
    /// Stack slices in ascending z order, calibrating each to Hounsfield units.
    /// The result does not depend on the order of `slices`.
    pub fn from_slices(mut slices: Vec<Slice>) -> Result<Self, VolumeError> {
        if slices.is_empty() {
            return Err(VolumeError::EmptyVolume);
        }
        check_geometry(slices.iter().map(|s| &s.header))?;
        slices.sort_by(|a, b| a.header.stack_order(&b.header));

        let (rows, columns) = slices[0].header.shape();
        let mut data = Array3::<i16>::zeros((slices.len(), rows, columns));
        for (z, slice) in slices.iter().enumerate() {
            if slice.pixels.dim() != (rows, columns) {
                return InconsistentGeometrySnafu {
                    message: format!(
                        "pixel array {:?} differs from {:?}",
                        slice.pixels.dim(),
                        (rows, columns)
                    ),
                }
                .fail();
            }
            data.slice_mut(s![z, .., ..]).assign(&slice.calibrated());
        }

        let headers: Vec<SliceHeader> = slices.into_iter().map(|s| s.header).collect();
        let pixel_spacing: PixelSpacing = headers[0].spacing;
        let spacing = VoxelSpacing::new(stack_spacing(&headers), pixel_spacing);

        Ok(Self {
            data,
            headers,
            spacing,
        })
    }

    pub fn data(&self) -> &Array3<i16> {
        &self.data
    }

    pub fn into_data(self) -> Array3<i16> {
        self.data
    }

    pub fn headers(&self) -> &[SliceHeader] {
        &self.headers
    }

    pub fn depth(&self) -> usize {
        self.data.dim().0
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn slice_shape(&self) -> (usize, usize) {
        let (_, rows, columns) = self.data.dim();
        (rows, columns)
    }

    pub fn spacing(&self) -> VoxelSpacing {
        self.spacing
    }

    pub fn slice(&self, index: usize) -> Result<ArrayView2<'_, i16>, VolumeError> {
        if index >= self.depth() {
            return Err(VolumeError::SliceOutOfRange {
                index,
                depth: self.depth(),
            });
        }
        Ok(self.data.slice(s![index, .., ..]))
    }

    /// The slice at `index`, windowed to [0, 1]. Nothing is cached.
    pub fn windowed_slice(&self, index: usize, window: &Window) -> Result<Array2<f32>, VolumeError> {
        Ok(window.apply(&self.slice(index)?))
    }

    /// Slice identities in depth order.
    pub fn slice_keys(&self, scheme: SliceKeyScheme) -> Vec<Option<SliceKey>> {
        self.headers.iter().map(|h| h.key(scheme)).collect()
    }
}

/// Load one series directory into a calibrated volume.
pub fn load_series<P: AsRef<Path>>(dir: P) -> Result<Volume, VolumeError> {
    let dir = dir.as_ref();
    let slices = list_slice_files(dir)?
        .iter()
        .map(Slice::open)
        .collect::<Result<Vec<_>, _>>()?;
    debug!("Loaded {} slices from {}", slices.len(), dir.display());
    Volume::from_slices(slices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{header, slice, write_series};
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rstest::rstest;

    fn numbered_slices(zs: &[f64]) -> Vec<Slice> {
        zs.iter()
            .enumerate()
            .map(|(i, z)| {
                let pixels = Array2::from_elem((3, 4), (*z as i16) * 10 + i as i16);
                slice(Some(&format!("1.2.{i}")), *z, pixels)
            })
            .collect()
    }

    #[rstest]
    #[case(1)]
    #[case(7)]
    #[case(42)]
    fn test_order_invariant_under_permutation(#[case] seed: u64) {
        let slices = numbered_slices(&[-10.0, 5.0, -2.5, 0.0, 12.0, 3.0]);
        let reference = Volume::from_slices(slices.clone()).unwrap();

        let mut shuffled = slices;
        shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
        let volume = Volume::from_slices(shuffled).unwrap();

        assert_eq!(volume, reference);
        let zs: Vec<f64> = volume.headers().iter().map(|h| h.position.z()).collect();
        assert_eq!(zs, vec![-10.0, -2.5, 0.0, 3.0, 5.0, 12.0]);
    }

    #[test]
    fn test_calibration_applied_per_slice() {
        let mut a = slice(Some("1.1"), 0.0, Array2::from_elem((2, 2), 100));
        a.header.rescale = crate::metadata::Rescale::new(1.0, -1024.0);
        let mut b = slice(Some("1.2"), 1.0, Array2::from_elem((2, 2), 100));
        b.header.rescale = crate::metadata::Rescale::new(2.0, -1000.0);

        let volume = Volume::from_slices(vec![b, a]).unwrap();
        assert!(volume.slice(0).unwrap().iter().all(|v| *v == -924));
        assert!(volume.slice(1).unwrap().iter().all(|v| *v == -800));
    }

    #[test]
    fn test_inconsistent_shape_rejected() {
        let a = slice(Some("1.1"), 0.0, Array2::zeros((4, 4)));
        let b = slice(Some("1.2"), 1.0, Array2::zeros((4, 5)));
        let result = Volume::from_slices(vec![a, b]);
        assert!(matches!(
            result,
            Err(VolumeError::InconsistentGeometry { .. })
        ));
    }

    #[test]
    fn test_inconsistent_spacing_rejected() {
        let a = header(Some("1.1"), 0.0, (4, 4));
        let mut b = header(Some("1.2"), 1.0, (4, 4));
        b.spacing = PixelSpacing::new(0.9, 0.7);
        assert!(matches!(
            SeriesLayout::new(vec![a, b]),
            Err(VolumeError::InconsistentGeometry { .. })
        ));
    }

    #[test]
    fn test_empty_volume() {
        assert!(matches!(
            Volume::from_slices(vec![]),
            Err(VolumeError::EmptyVolume)
        ));
    }

    #[test]
    fn test_voxel_spacing() {
        let volume = Volume::from_slices(numbered_slices(&[0.0, 2.5])).unwrap();
        let (stack, row, column) = volume.spacing().into();
        // Thickness declared by the test headers wins over the position delta
        assert_relative_eq!(stack, 1.25);
        assert_relative_eq!(row, 0.7);
        assert_relative_eq!(column, 0.7);
    }

    #[test]
    fn test_stack_spacing_fallback_to_positions() {
        let mut slices = numbered_slices(&[0.0, 2.5]);
        for s in slices.iter_mut() {
            s.header.thickness = crate::metadata::SliceThickness(None);
        }
        let volume = Volume::from_slices(slices).unwrap();
        assert_relative_eq!(volume.spacing().stack_mm, 2.5);
    }

    #[test]
    fn test_slice_out_of_range() {
        let volume = Volume::from_slices(numbered_slices(&[0.0])).unwrap();
        assert!(matches!(
            volume.slice(1),
            Err(VolumeError::SliceOutOfRange { index: 1, depth: 1 })
        ));
    }

    #[test]
    fn test_windowed_slice_bounds() {
        let volume = Volume::from_slices(numbered_slices(&[0.0, 1.0])).unwrap();
        let windowed = volume.windowed_slice(1, &Window::default()).unwrap();
        assert_eq!(windowed.dim(), (3, 4));
        assert!(windowed.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_load_series_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let written = write_series(temp_dir.path(), &[10.0, -5.0, 2.5]);

        let volume = load_series(temp_dir.path()).unwrap();
        assert_eq!(volume.shape(), (3, 128, 128));

        let keys = volume.slice_keys(SliceKeyScheme::ZPosition);
        assert_eq!(
            keys,
            vec![
                Some(SliceKey::from_z(-5.0)),
                Some(SliceKey::from_z(2.5)),
                Some(SliceKey::from_z(10.0)),
            ]
        );
        let sops = volume.slice_keys(SliceKeyScheme::SopInstanceUid);
        assert_eq!(sops[0], written[1].key(SliceKeyScheme::SopInstanceUid));
    }

    #[test]
    fn test_load_series_is_repeatable() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_series(temp_dir.path(), &[3.0, 1.0, 2.0, 0.0]);

        let first = load_series(temp_dir.path()).unwrap();
        let second = load_series(temp_dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_layout_matches_volume() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_series(temp_dir.path(), &[1.0, 0.0, 2.0]);

        let layout = SeriesLayout::scan(temp_dir.path()).unwrap();
        let volume = load_series(temp_dir.path()).unwrap();
        assert_eq!(layout.shape(), volume.shape());
        assert_eq!(layout.headers(), volume.headers());
        for z in 0..layout.len() {
            assert_eq!(layout.load_slice(z).unwrap(), volume.slice(z).unwrap());
        }
        assert_eq!(layout.load_volume().unwrap(), volume);
    }

    #[test]
    fn test_missing_data() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("readme.txt"), "no slices").unwrap();

        assert!(matches!(
            load_series(temp_dir.path()),
            Err(VolumeError::MissingData { .. })
        ));
        assert!(matches!(
            load_series(temp_dir.path().join("absent")),
            Err(VolumeError::MissingData { .. })
        ));
        assert!(matches!(
            count_series_files(temp_dir.path()),
            Err(VolumeError::MissingData { .. })
        ));
    }

    #[test]
    fn test_corrupt_file_fails_volume() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_series(temp_dir.path(), &[0.0, 1.0]);
        std::fs::write(temp_dir.path().join("zz_broken.dcm"), b"garbage").unwrap();

        assert!(matches!(
            load_series(temp_dir.path()),
            Err(VolumeError::CorruptImage { .. })
        ));
    }

    #[test]
    fn test_count_series_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_series(temp_dir.path(), &[0.0, 1.0, 2.0]);
        assert_eq!(count_series_files(temp_dir.path()).unwrap(), 3);
    }
}
