use lvis_core::{Annotation, LvisError};
use pyo3::exceptions::{PyIOError, PyKeyError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyFloat, PyList, PyString, PyTuple};
use serde::Serialize;
use serde_json::{Map, Number, Value};

pub fn lvis_err(err: LvisError) -> PyErr {
    match err {
        LvisError::Io(_) | LvisError::Json { .. } => PyIOError::new_err(err.to_string()),
        LvisError::NotFound { .. } => PyKeyError::new_err(err.to_string()),
        _ => PyValueError::new_err(err.to_string()),
    }
}

/// Convert a JSON value into the equivalent Python object.
pub fn value_to_py(py: Python<'_>, value: &Value) -> PyResult<PyObject> {
    let obj = match value {
        Value::Null => py.None(),
        Value::Bool(b) => PyBool::new(py, *b).to_owned().into_any().unbind(),
        Value::Number(n) => {
            if let Some(i) = n.as_u64() {
                i.into_pyobject(py)?.into_any().unbind()
            } else if let Some(i) = n.as_i64() {
                i.into_pyobject(py)?.into_any().unbind()
            } else {
                PyFloat::new(py, n.as_f64().unwrap_or(f64::NAN))
                    .into_any()
                    .unbind()
            }
        }
        Value::String(s) => PyString::new(py, s).into_any().unbind(),
        Value::Array(items) => PyList::new(
            py,
            items
                .iter()
                .map(|v| value_to_py(py, v))
                .collect::<PyResult<Vec<_>>>()?,
        )?
        .into_any()
        .unbind(),
        Value::Object(map) => {
            let dict = PyDict::new(py);
            for (k, v) in map {
                dict.set_item(k, value_to_py(py, v)?)?;
            }
            dict.into_any().unbind()
        }
    };
    Ok(obj)
}

/// Convert a Python object made of dicts, lists, and scalars into JSON.
pub fn py_to_value(obj: &Bound<'_, PyAny>) -> PyResult<Value> {
    if obj.is_none() {
        return Ok(Value::Null);
    }
    if let Ok(b) = obj.downcast::<PyBool>() {
        return Ok(Value::Bool(b.is_true()));
    }
    if obj.is_instance_of::<PyString>() {
        return Ok(Value::String(obj.extract()?));
    }
    if let Ok(dict) = obj.downcast::<PyDict>() {
        let mut map = Map::new();
        for (k, v) in dict.iter() {
            let key: String = k
                .extract()
                .map_err(|_| PyTypeError::new_err("dict keys must be strings"))?;
            map.insert(key, py_to_value(&v)?);
        }
        return Ok(Value::Object(map));
    }
    if let Ok(list) = obj.downcast::<PyList>() {
        return list
            .iter()
            .map(|v| py_to_value(&v))
            .collect::<PyResult<_>>()
            .map(Value::Array);
    }
    if let Ok(tuple) = obj.downcast::<PyTuple>() {
        return tuple
            .iter()
            .map(|v| py_to_value(&v))
            .collect::<PyResult<_>>()
            .map(Value::Array);
    }
    if let Ok(i) = obj.extract::<u64>() {
        return Ok(Value::Number(i.into()));
    }
    if let Ok(i) = obj.extract::<i64>() {
        return Ok(Value::Number(i.into()));
    }
    if let Ok(f) = obj.extract::<f64>() {
        return Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| PyValueError::new_err("NaN and infinity are not valid JSON"));
    }
    Err(PyTypeError::new_err(format!(
        "cannot convert {} to JSON",
        obj.get_type().name()?
    )))
}

/// Convert any serializable record (annotation, image, category) to a dict.
pub fn record_to_py<T: Serialize>(py: Python<'_>, record: &T) -> PyResult<PyObject> {
    let value =
        serde_json::to_value(record).map_err(|e| PyValueError::new_err(e.to_string()))?;
    value_to_py(py, &value)
}

pub fn records_to_py<T: Serialize>(py: Python<'_>, records: &[&T]) -> PyResult<PyObject> {
    let list = PyList::new(
        py,
        records
            .iter()
            .map(|r| record_to_py(py, *r))
            .collect::<PyResult<Vec<_>>>()?,
    )?;
    Ok(list.into_any().unbind())
}

/// Parse a list of detection dicts.
pub fn py_to_annotations(list: &Bound<'_, PyList>) -> PyResult<Vec<Annotation>> {
    list.iter()
        .enumerate()
        .map(|(i, item)| {
            let value = py_to_value(&item)?;
            serde_json::from_value(value)
                .map_err(|e| PyValueError::new_err(format!("detection {}: {}", i, e)))
        })
        .collect()
}
