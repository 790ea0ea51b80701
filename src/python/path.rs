use crate::file::{patients_from_mask_dir, DicomFileOperations};
use pyo3::{
    exceptions::{PyNotADirectoryError, PyRuntimeError},
    pymodule,
    types::{PyAnyMethods, PyList, PyModule},
    Bound, FromPyObject, IntoPyObject, PyAny, PyErr, PyResult, Python,
};
use std::ops::Deref;
use std::path::Path;
use std::path::PathBuf;

use pyo3::prelude::*;

/// Wrapper to convert between Python Path and Rust PathBuf
pub struct PyPath(PathBuf);

impl PyPath {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        PyPath(PathBuf::from(path.as_ref()))
    }
}

impl FromPyObject<'_> for PyPath {
    fn extract_bound(ob: &Bound<'_, PyAny>) -> PyResult<Self> {
        let path = ob.extract::<PathBuf>()?;
        Ok(PyPath(path))
    }
}

impl<'py> IntoPyObject<'py> for PyPath {
    type Target = PyAny;
    type Output = Bound<'py, PyAny>;
    type Error = PyErr;

    fn into_pyobject(self, py: Python<'py>) -> Result<Self::Output, Self::Error> {
        let path_class = py.import("pathlib")?.getattr("Path")?;
        path_class.call1((self.0.to_string_lossy().into_owned(),))
    }
}

impl Deref for PyPath {
    type Target = PathBuf;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for PyPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl From<PyPath> for PathBuf {
    fn from(path: PyPath) -> Self {
        path.0
    }
}

fn require_dir(path: &PyPath) -> PyResult<()> {
    if !path.is_dir() {
        return Err(PyNotADirectoryError::new_err(format!(
            "Not a directory: {}",
            path.display()
        )));
    }
    Ok(())
}

#[pymodule]
#[pyo3(name = "path")]
pub(crate) fn register_submodule<'py>(_py: Python<'py>, m: &Bound<'py, PyModule>) -> PyResult<()> {
    #[pyfn(m)]
    #[pyo3(name = "find_dicom_files")]
    fn find_dicom_files<'py>(
        py: Python<'py>,
        path: &Bound<'py, PyAny>,
    ) -> PyResult<Bound<'py, PyList>> {
        let path = path.extract::<PyPath>()?;
        require_dir(&path)?;
        let result: Vec<PyPath> = path.find_dicoms()?.into_iter().map(PyPath).collect();
        PyList::new(py, result)
    }

    #[pyfn(m)]
    #[pyo3(name = "series_dirs")]
    fn series_dirs<'py>(
        py: Python<'py>,
        path: &Bound<'py, PyAny>,
    ) -> PyResult<Bound<'py, PyList>> {
        let path = path.extract::<PyPath>()?;
        require_dir(&path)?;
        let result: Vec<PyPath> = path.series_dirs()?.into_iter().map(PyPath).collect();
        PyList::new(py, result)
    }

    #[pyfn(m)]
    #[pyo3(name = "patients_with_masks")]
    fn patients_with_masks(path: &Bound<'_, PyAny>) -> PyResult<Vec<String>> {
        let path = path.extract::<PyPath>()?;
        require_dir(&path)?;
        patients_from_mask_dir(&*path)
            .map_err(|e| PyRuntimeError::new_err(format!("Failed to list masks: {e}")))
    }

    Ok(())
}
