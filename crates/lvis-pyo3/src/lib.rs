use std::path::Path;

use lvis_core::{Lvis, LvisConfig, ResultsConfig};
use pyo3::exceptions::PyTypeError;
use pyo3::prelude::*;
use pyo3::types::PyList;

mod boundary;
mod convert;

use convert::{lvis_err, py_to_annotations, records_to_py, value_to_py};

fn dataset_to_py(py: Python<'_>, lvis: &Lvis) -> PyResult<PyObject> {
    let value = serde_json::to_value(lvis.dataset())
        .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))?;
    value_to_py(py, &value)
}

fn load_anns_py(py: Python<'_>, lvis: &Lvis, ids: Option<Vec<u64>>) -> PyResult<PyObject> {
    let anns = lvis.load_anns(ids.as_deref()).map_err(lvis_err)?;
    records_to_py(py, &anns)
}

fn load_cats_py(py: Python<'_>, lvis: &Lvis, ids: Option<Vec<u64>>) -> PyResult<PyObject> {
    let cats = lvis.load_cats(ids.as_deref()).map_err(lvis_err)?;
    records_to_py(py, &cats)
}

fn load_imgs_py(py: Python<'_>, lvis: &Lvis, ids: Option<Vec<u64>>) -> PyResult<PyObject> {
    let imgs = lvis.load_imgs(ids.as_deref()).map_err(lvis_err)?;
    records_to_py(py, &imgs)
}

/// Normalizes `results` (a path or a list of dicts) against `gt`.
fn ingest(
    py: Python<'_>,
    gt: &Lvis,
    results: &Bound<'_, PyAny>,
    config: &ResultsConfig,
) -> PyResult<Lvis> {
    let lvis = if let Ok(list) = results.downcast::<PyList>() {
        let anns = py_to_annotations(list)?;
        py.allow_threads(|| gt.from_results(anns, config))
    } else {
        let path: String = results.extract()?;
        py.allow_threads(|| gt.load_results(Path::new(&path), config))
    };
    lvis.map_err(lvis_err)
}

// ---------------------------------------------------------------------------
// LVIS
// ---------------------------------------------------------------------------

#[pyclass(name = "LVIS")]
struct PyLVIS {
    inner: Lvis,
}

#[pymethods]
impl PyLVIS {
    #[new]
    #[pyo3(signature = (annotation_path, precompute_boundary=false, dilation_ratio=0.02, max_cpu_num=80))]
    fn new(
        py: Python<'_>,
        annotation_path: &str,
        precompute_boundary: bool,
        dilation_ratio: f64,
        max_cpu_num: usize,
    ) -> PyResult<Self> {
        let config = LvisConfig {
            precompute_boundary,
            dilation_ratio,
            max_cpu_num,
        };
        let inner = py
            .allow_threads(|| Lvis::new(Path::new(annotation_path), config))
            .map_err(lvis_err)?;
        Ok(PyLVIS { inner })
    }

    #[pyo3(signature = (img_ids=None, cat_ids=None, area_rng=None))]
    fn get_ann_ids(
        &self,
        img_ids: Option<Vec<u64>>,
        cat_ids: Option<Vec<u64>>,
        area_rng: Option<[f64; 2]>,
    ) -> Vec<u64> {
        self.inner
            .get_ann_ids(img_ids.as_deref(), cat_ids.as_deref(), area_rng)
    }

    fn get_cat_ids(&self) -> Vec<u64> {
        self.inner.get_cat_ids()
    }

    fn get_img_ids(&self) -> Vec<u64> {
        self.inner.get_img_ids()
    }

    #[pyo3(signature = (ids=None))]
    fn load_anns(&self, py: Python<'_>, ids: Option<Vec<u64>>) -> PyResult<PyObject> {
        load_anns_py(py, &self.inner, ids)
    }

    #[pyo3(signature = (ids=None))]
    fn load_cats(&self, py: Python<'_>, ids: Option<Vec<u64>>) -> PyResult<PyObject> {
        load_cats_py(py, &self.inner, ids)
    }

    #[pyo3(signature = (ids=None))]
    fn load_imgs(&self, py: Python<'_>, ids: Option<Vec<u64>>) -> PyResult<PyObject> {
        load_imgs_py(py, &self.inner, ids)
    }

    #[getter]
    fn dataset(&self, py: Python<'_>) -> PyResult<PyObject> {
        dataset_to_py(py, &self.inner)
    }
}

// ---------------------------------------------------------------------------
// LVISResults
// ---------------------------------------------------------------------------

#[pyclass(name = "LVISResults")]
struct PyLVISResults {
    inner: Lvis,
}

#[pymethods]
impl PyLVISResults {
    /// `lvis_gt` is an `LVIS` object or a path to a ground truth JSON file.
    /// `results` is a path to a JSON list or a list of detection dicts.
    /// Negative caps mean unlimited.
    ///
    /// Given an `LVIS` object, the results take `precompute_boundary` from it.
    /// Given a path, the ground truth is loaded without boundaries and the
    /// `precompute_boundary` argument applies. `dilation_ratio` always comes
    /// from the argument.
    #[new]
    #[pyo3(signature = (lvis_gt, results, max_dets_per_cat=-1, max_dets_per_im=300, precompute_boundary=false, dilation_ratio=0.02))]
    fn new(
        py: Python<'_>,
        lvis_gt: &Bound<'_, PyAny>,
        results: &Bound<'_, PyAny>,
        max_dets_per_cat: i64,
        max_dets_per_im: i64,
        precompute_boundary: bool,
        dilation_ratio: f64,
    ) -> PyResult<Self> {
        let config = ResultsConfig::from_signed(max_dets_per_cat, max_dets_per_im);
        let inner = if let Ok(gt) = lvis_gt.downcast::<PyLVIS>() {
            let gt = gt.borrow();
            let boundary = LvisConfig {
                dilation_ratio,
                ..gt.inner.config().clone()
            };
            ingest(py, &gt.inner, results, &config.with_boundary(boundary))?
        } else if let Ok(path) = lvis_gt.extract::<String>() {
            let gt = py
                .allow_threads(|| Lvis::new(Path::new(&path), LvisConfig::default()))
                .map_err(lvis_err)?;
            let boundary = LvisConfig {
                precompute_boundary,
                dilation_ratio,
                ..LvisConfig::default()
            };
            ingest(py, &gt, results, &config.with_boundary(boundary))?
        } else {
            return Err(PyTypeError::new_err(
                "lvis_gt must be an LVIS object or a path to an annotation file",
            ));
        };
        Ok(PyLVISResults { inner })
    }

    #[pyo3(signature = (img_ids=None, cat_ids=None, area_rng=None))]
    fn get_ann_ids(
        &self,
        img_ids: Option<Vec<u64>>,
        cat_ids: Option<Vec<u64>>,
        area_rng: Option<[f64; 2]>,
    ) -> Vec<u64> {
        self.inner
            .get_ann_ids(img_ids.as_deref(), cat_ids.as_deref(), area_rng)
    }

    fn get_cat_ids(&self) -> Vec<u64> {
        self.inner.get_cat_ids()
    }

    fn get_img_ids(&self) -> Vec<u64> {
        self.inner.get_img_ids()
    }

    #[pyo3(signature = (ids=None))]
    fn load_anns(&self, py: Python<'_>, ids: Option<Vec<u64>>) -> PyResult<PyObject> {
        load_anns_py(py, &self.inner, ids)
    }

    #[pyo3(signature = (ids=None))]
    fn load_cats(&self, py: Python<'_>, ids: Option<Vec<u64>>) -> PyResult<PyObject> {
        load_cats_py(py, &self.inner, ids)
    }

    #[pyo3(signature = (ids=None))]
    fn load_imgs(&self, py: Python<'_>, ids: Option<Vec<u64>>) -> PyResult<PyObject> {
        load_imgs_py(py, &self.inner, ids)
    }

    /// Detections of one image scoring above `score_thr`.
    fn get_top_results(&self, py: Python<'_>, img_id: u64, score_thr: f64) -> PyResult<PyObject> {
        let anns = self.inner.get_top_results(img_id, score_thr);
        records_to_py(py, &anns)
    }

    #[getter]
    fn dataset(&self, py: Python<'_>) -> PyResult<PyObject> {
        dataset_to_py(py, &self.inner)
    }
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

#[pymodule]
fn lvis_rust(py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyLVIS>()?;
    m.add_class::<PyLVISResults>()?;

    let boundary_mod = PyModule::new(py, "boundary")?;
    boundary_mod.add_function(wrap_pyfunction!(boundary::mask_to_boundary, &boundary_mod)?)?;
    m.add_submodule(&boundary_mod)?;

    Ok(())
}
