use std::path::{Path, PathBuf};

use ndarray::Array3;
use snafu::ResultExt;

use crate::file::mask_path;
use crate::mask::{CreateDirSnafu, MaskError, ReadNpySnafu, WriteNpySnafu};

/// Write `mask` to `{mask_dir}/{patient_id}_mask.npy`, creating `mask_dir` if needed.
pub fn save_mask<P: AsRef<Path>>(
    mask: &Array3<u8>,
    mask_dir: P,
    patient_id: &str,
) -> Result<PathBuf, MaskError> {
    let mask_dir = mask_dir.as_ref();
    std::fs::create_dir_all(mask_dir).context(CreateDirSnafu { path: mask_dir })?;
    let path = mask_path(mask_dir, patient_id);
    write_mask(&path, mask)?;
    Ok(path)
}

pub fn write_mask<P: AsRef<Path>>(path: P, mask: &Array3<u8>) -> Result<(), MaskError> {
    let path = path.as_ref();
    ndarray_npy::write_npy(path, mask).context(WriteNpySnafu { path })
}

/// Read a mask file, checking that it holds only zeros and ones.
pub fn load_mask<P: AsRef<Path>>(path: P) -> Result<Array3<u8>, MaskError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(MaskError::MissingMask {
            path: path.to_path_buf(),
        });
    }
    let mask: Array3<u8> = ndarray_npy::read_npy(path).context(ReadNpySnafu { path })?;
    if let Some(value) = mask.iter().find(|v| **v > 1) {
        return Err(MaskError::NotBinary {
            path: path.to_path_buf(),
            value: *value,
        });
    }
    Ok(mask)
}

/// Read a mask file and check it against the expected (depth, rows, columns).
pub fn load_mask_with_shape<P: AsRef<Path>>(
    path: P,
    expected: (usize, usize, usize),
) -> Result<Array3<u8>, MaskError> {
    let path = path.as_ref();
    let mask = load_mask(path)?;
    if mask.dim() != expected {
        return Err(MaskError::ShapeMismatch {
            path: path.to_path_buf(),
            expected,
            found: mask.dim(),
        });
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array1};

    #[test]
    fn test_save_then_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mask_dir = temp_dir.path().join("masks");
        let mut mask = Array3::<u8>::zeros((3, 8, 6));
        mask.slice_mut(s![1, 2..5, 1..3]).fill(1);

        let path = save_mask(&mask, &mask_dir, "LIDC-IDRI-0001").unwrap();
        assert_eq!(path, mask_dir.join("LIDC-IDRI-0001_mask.npy"));
        assert_eq!(load_mask(&path).unwrap(), mask);
        assert_eq!(load_mask_with_shape(&path, (3, 8, 6)).unwrap(), mask);
    }

    #[test]
    fn test_shape_mismatch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = save_mask(&Array3::zeros((2, 4, 4)), temp_dir.path(), "p").unwrap();
        assert!(matches!(
            load_mask_with_shape(&path, (3, 4, 4)),
            Err(MaskError::ShapeMismatch {
                expected: (3, 4, 4),
                found: (2, 4, 4),
                ..
            })
        ));
    }

    #[test]
    fn test_not_binary() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut mask = Array3::<u8>::zeros((1, 2, 2));
        mask[[0, 1, 1]] = 255;
        let path = save_mask(&mask, temp_dir.path(), "p").unwrap();
        assert!(matches!(
            load_mask(&path),
            Err(MaskError::NotBinary { value: 255, .. })
        ));
    }

    #[test]
    fn test_missing_and_wrong_dimensionality() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_mask(temp_dir.path().join("absent_mask.npy")),
            Err(MaskError::MissingMask { .. })
        ));

        let flat = temp_dir.path().join("flat_mask.npy");
        ndarray_npy::write_npy(&flat, &Array1::<u8>::zeros(4)).unwrap();
        assert!(matches!(load_mask(&flat), Err(MaskError::ReadNpy { .. })));
    }
}
