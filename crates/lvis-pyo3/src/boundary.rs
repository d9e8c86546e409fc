use lvis_core::boundary as rboundary;
use numpy::{PyArray1, PyArray2, PyArrayMethods, PyReadonlyArray2, PyUntypedArrayMethods};
use pyo3::prelude::*;

/// Boundary of a binary `(h, w)` mask, returned with the same shape.
#[pyfunction]
#[pyo3(signature = (mask, dilation_ratio = 0.02))]
pub fn mask_to_boundary<'py>(
    py: Python<'py>,
    mask: PyReadonlyArray2<'py, u8>,
    dilation_ratio: f64,
) -> PyResult<Bound<'py, PyArray2<u8>>> {
    let (h, w) = (mask.shape()[0], mask.shape()[1]);
    let pixels: Vec<u8> = mask.as_array().iter().map(|&v| (v != 0) as u8).collect();

    // Erosion with a square element commutes with transposition, so the
    // row-major buffer is passed as the column-major mask of the transpose.
    let boundary = py.allow_threads(|| {
        rboundary::mask_to_boundary(&pixels, w as u32, h as u32, dilation_ratio)
    });
    PyArray1::from_vec(py, boundary).reshape([h, w])
}
