pub mod dataset;
pub mod path;

use pyo3::prelude::*;

#[pymodule]
pub fn lung_ct_prep<'py>(py: Python<'py>, m: &Bound<'py, PyModule>) -> PyResult<()> {
    dataset::register_submodule(py, m)?;
    path::register_submodule(py, m)?;
    Ok(())
}
