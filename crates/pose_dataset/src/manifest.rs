//! Manifest CSV and filter-list loading.

use crate::types::{DatasetResult, PoseDatasetError};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// One manifest row; filenames are relative to the image directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestRow {
    pub pose_image: String,
    pub app_image: String,
    pub target_image: String,
    /// Instance (flow) map filename; only required when instance maps are enabled.
    #[serde(default)]
    pub flow: Option<String>,
}

pub fn read_manifest(path: &Path) -> DatasetResult<Vec<ManifestRow>> {
    let csv_err = |source| PoseDatasetError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let file = fs::File::open(path).map_err(|e| PoseDatasetError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(file);
    let mut rows = Vec::new();
    for record in reader.deserialize::<ManifestRow>() {
        let mut row = record.map_err(csv_err)?;
        // Empty cells deserialize to Some(""); treat them as absent.
        row.flow = row.flow.filter(|f| !f.trim().is_empty());
        rows.push(row);
    }
    tracing::info!(path = %path.display(), rows = rows.len(), "loaded manifest");
    Ok(rows)
}

/// Read a filter list: a JSON object keyed by row index with inclusion flags.
///
/// Only `.json` files are accepted; YAML and pickle filter lists must be converted first.
pub fn load_filter_list(path: &Path) -> DatasetResult<Map<String, Value>> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if !is_json {
        return Err(PoseDatasetError::Config {
            path: path.to_path_buf(),
            msg: "filter list must be a .json file".to_string(),
        });
    }
    let raw = fs::read(path).map_err(|e| PoseDatasetError::io(path, e))?;
    serde_json::from_slice(&raw).map_err(|e| PoseDatasetError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Row indices whose flag is truthy, in key order.
pub fn selected_rows(filter: &Map<String, Value>, path: &Path) -> DatasetResult<Vec<usize>> {
    filter
        .iter()
        .filter(|(_, flag)| is_truthy(flag))
        .map(|(key, _)| {
            key.trim().parse::<usize>().map_err(|e| PoseDatasetError::Config {
                path: path.to_path_buf(),
                msg: format!("filter key `{key}` is not a row index: {e}"),
            })
        })
        .collect()
}

/// Pick `indices` out of `rows`, in the order given.
pub fn restrict_rows(
    rows: &[ManifestRow],
    indices: &[usize],
    path: &Path,
) -> DatasetResult<Vec<ManifestRow>> {
    indices
        .iter()
        .map(|&index| {
            rows.get(index)
                .cloned()
                .ok_or_else(|| PoseDatasetError::FilterIndexOutOfRange {
                    path: path.to_path_buf(),
                    index,
                    rows: rows.len(),
                })
        })
        .collect()
}

/// Load the manifest and, if a filter list is given, keep only its selected rows.
pub fn load_rows(ann_file: &Path, filter_list: Option<&Path>) -> DatasetResult<Vec<ManifestRow>> {
    let rows = read_manifest(ann_file)?;
    let Some(filter_path) = filter_list else {
        return Ok(rows);
    };
    let filter = load_filter_list(filter_path)?;
    let keep = selected_rows(&filter, filter_path)?;
    let rows = restrict_rows(&rows, &keep, filter_path)?;
    tracing::info!(
        filter = %filter_path.display(),
        kept = rows.len(),
        "applied filter list"
    );
    Ok(rows)
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
