use crate::config::PipelineConfig;
use crate::dataset::{
    read_manifest, split_patients as split_patient_ids, write_manifest, Cohort, DatasetError,
    SampleIndex,
};
use crate::errors::{Classify, ErrorKind};
use crate::python::path::PyPath;
use numpy::{IntoPyArray, PyArray3};
use pyo3::prelude::*;
use pyo3::{
    exceptions::{PyFileNotFoundError, PyIndexError, PyRuntimeError, PyValueError},
    pymodule,
    types::PyModule,
    Bound, PyErr, PyResult, Python,
};

fn to_py_err(error: DatasetError) -> PyErr {
    match error {
        DatasetError::SampleOutOfRange { .. } => PyIndexError::new_err(error.to_string()),
        _ => match error.kind() {
            ErrorKind::MissingData => PyFileNotFoundError::new_err(error.to_string()),
            ErrorKind::GeometryMismatch | ErrorKind::MalformedAnnotation => {
                PyValueError::new_err(error.to_string())
            }
            ErrorKind::CorruptImage | ErrorKind::Io => PyRuntimeError::new_err(error.to_string()),
        },
    }
}

fn load_config(config: Option<PyPath>) -> PyResult<PipelineConfig> {
    PipelineConfig::load_or_default(config).map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Indexable (image, mask) pairs, each a float32 array shaped (1, H, W).
#[pyclass(name = "LungSegmentationDataset", frozen)]
pub struct PyLungSegmentationDataset {
    index: SampleIndex,
}

#[pymethods]
impl PyLungSegmentationDataset {
    #[new]
    #[pyo3(signature = (raw_dir, mask_dir, patient_ids=None, config=None, resize_to=None))]
    fn new(
        py: Python<'_>,
        raw_dir: PyPath,
        mask_dir: PyPath,
        patient_ids: Option<Vec<String>>,
        config: Option<PyPath>,
        resize_to: Option<(u32, u32)>,
    ) -> PyResult<Self> {
        let config = load_config(config)?;
        let mut dataset_config = config.dataset;
        if resize_to.is_some() {
            dataset_config.resize_to = resize_to;
        }
        dataset_config
            .validate()
            .map_err(|e| PyValueError::new_err(e.to_string()))?;

        let cohort = match patient_ids {
            Some(ids) => Cohort::new(&*raw_dir, &*mask_dir, ids),
            None => Cohort::from_mask_dir(&*raw_dir, &*mask_dir).map_err(|e| {
                PyFileNotFoundError::new_err(format!(
                    "Failed to list masks in {}: {e}",
                    mask_dir.display()
                ))
            })?,
        };
        let index = py.allow_threads(|| SampleIndex::build(&cohort, &dataset_config));
        Ok(Self {
            index: index.with_window(config.volume.window),
        })
    }

    /// Rebuild a dataset from a manifest written by `write_manifest` or `lung-index`.
    #[staticmethod]
    #[pyo3(signature = (path, config=None))]
    fn from_manifest(py: Python<'_>, path: PyPath, config: Option<PyPath>) -> PyResult<Self> {
        let config = load_config(config)?;
        let index = py
            .allow_threads(|| {
                let samples = read_manifest(&*path)?;
                SampleIndex::from_samples(samples, &config.dataset)
            })
            .map_err(to_py_err)?;
        Ok(Self {
            index: index.with_window(config.volume.window),
        })
    }

    fn __len__(&self) -> usize {
        self.index.len()
    }

    fn __getitem__<'py>(
        &self,
        py: Python<'py>,
        index: isize,
    ) -> PyResult<(Bound<'py, PyArray3<f32>>, Bound<'py, PyArray3<f32>>)> {
        let len = self.index.len() as isize;
        let resolved = if index < 0 { index + len } else { index };
        if resolved < 0 || resolved >= len {
            return Err(PyIndexError::new_err(format!(
                "Index {index} out of range for dataset of {len} samples"
            )));
        }
        let pair = py
            .allow_threads(|| self.index.get(resolved as usize))
            .map_err(to_py_err)?;
        Ok((pair.image.into_pyarray(py), pair.mask.into_pyarray(py)))
    }

    /// (patient_id, slice_index, policy) of a sample.
    fn sample_info(&self, index: usize) -> PyResult<(String, usize, String)> {
        let sample = self.index.samples().get(index).ok_or_else(|| {
            PyIndexError::new_err(format!("Index {index} out of range"))
        })?;
        Ok((
            sample.patient_id.clone(),
            sample.slice_index,
            sample.policy.to_string(),
        ))
    }

    /// (patient_id, reason) for every patient left out of the index.
    #[getter]
    fn skipped(&self) -> Vec<(String, String)> {
        self.index
            .skipped()
            .iter()
            .map(|s| (s.patient_id.clone(), s.reason.to_string()))
            .collect()
    }

    fn write_manifest(&self, path: PyPath) -> PyResult<()> {
        write_manifest(self.index.samples(), &*path).map_err(to_py_err)
    }

    fn clear_cache(&self) {
        self.index.cache().clear();
    }
}

#[pymodule]
#[pyo3(name = "dataset")]
pub(crate) fn register_submodule<'py>(_py: Python<'py>, m: &Bound<'py, PyModule>) -> PyResult<()> {
    m.add_class::<PyLungSegmentationDataset>()?;

    /// Split patient ids into (train, val) with a seeded shuffle.
    #[pyfn(m)]
    #[pyo3(name = "split_patients", signature = (patient_ids, val_fraction=0.2, seed=42))]
    fn split_patients(
        patient_ids: Vec<String>,
        val_fraction: f64,
        seed: u64,
    ) -> PyResult<(Vec<String>, Vec<String>)> {
        if !(0.0..=1.0).contains(&val_fraction) {
            return Err(PyValueError::new_err(format!(
                "val_fraction must be in [0, 1], got {val_fraction}"
            )));
        }
        let split = split_patient_ids(&patient_ids, val_fraction, seed);
        Ok((split.train, split.val))
    }

    Ok(())
}
