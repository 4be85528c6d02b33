//! Core types, error definitions, and data structures for pose_dataset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type DatasetResult<T> = Result<T, PoseDatasetError>;

#[derive(Debug, Error)]
pub enum PoseDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config error at {path}: {msg}")]
    Config { path: PathBuf, msg: String },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("manifest {path} row {row}: column `{column}` is missing")]
    MissingColumn {
        path: PathBuf,
        row: usize,
        column: &'static str,
    },
    #[error("filter list {path} selects row {index} but the manifest has {rows} rows")]
    FilterIndexOutOfRange {
        path: PathBuf,
        index: usize,
        rows: usize,
    },
    #[error(
        "The label-image pair ({}, {}) do not look like the right pair because the filenames are quite different. \
         Are you sure about the pairing? Set no_pairing_check to bypass this.",
        pose.display(),
        image.display()
    )]
    PairingMismatch { pose: PathBuf, image: PathBuf },
    #[error("resolved path sequences disagree in length: {lengths:?}")]
    InconsistentLengths { lengths: Vec<(&'static str, usize)> },
    #[error("sample index {index} out of range for dataset of size {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

impl PoseDatasetError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        PoseDatasetError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn image(path: &Path, source: image::ImageError) -> Self {
        // Decoders surface missing files as ImageError::IoError; keep those as Io.
        match source {
            image::ImageError::IoError(e) => Self::io(path, e),
            other => PoseDatasetError::Image {
                path: path.to_path_buf(),
                source: other,
            },
        }
    }
}

/// Element storage for a [`SampleTensor`].
#[derive(Debug, Clone, PartialEq)]
pub enum TensorValues {
    Float(Vec<f32>),
    Int(Vec<i64>),
}

impl TensorValues {
    pub fn len(&self) -> usize {
        match self {
            TensorValues::Float(v) => v.len(),
            TensorValues::Int(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dense tensor in CHW layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTensor {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub values: TensorValues,
}

impl SampleTensor {
    pub fn float(channels: usize, height: usize, width: usize, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), channels * height * width);
        Self {
            channels,
            height,
            width,
            values: TensorValues::Float(values),
        }
    }

    pub fn int(channels: usize, height: usize, width: usize, values: Vec<i64>) -> Self {
        debug_assert_eq!(values.len(), channels * height * width);
        Self {
            channels,
            height,
            width,
            values: TensorValues::Int(values),
        }
    }

    /// `[channels, height, width]`.
    pub fn shape(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    pub fn is_int(&self) -> bool {
        matches!(self.values, TensorValues::Int(_))
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.values {
            TensorValues::Float(v) => Some(v),
            TensorValues::Int(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.values {
            TensorValues::Int(v) => Some(v),
            TensorValues::Float(_) => None,
        }
    }

    /// Values widened to f32 regardless of storage.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.values {
            TensorValues::Float(v) => v.clone(),
            TensorValues::Int(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }

    /// Value at channel `c`, row `y`, column `x`, widened to f32.
    pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        let idx = (c * self.height + y) * self.width + x;
        match &self.values {
            TensorValues::Float(v) => v[idx],
            TensorValues::Int(v) => v[idx] as f32,
        }
    }

    /// Smallest and largest element; `None` for an empty tensor.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        let vals = self.to_f32_vec();
        let first = *vals.first()?;
        Some(
            vals.iter()
                .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
        )
    }
}

/// Optional per-sample instance map.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum InstanceMap {
    /// Instance maps are disabled; nothing was loaded.
    #[default]
    Absent,
    Present(SampleTensor),
}

impl InstanceMap {
    pub fn is_absent(&self) -> bool {
        matches!(self, InstanceMap::Absent)
    }

    pub fn tensor(&self) -> Option<&SampleTensor> {
        match self {
            InstanceMap::Absent => None,
            InstanceMap::Present(t) => Some(t),
        }
    }
}

/// One training sample, index-aligned across all sources.
#[derive(Debug, Clone, PartialEq)]
pub struct PairedSample {
    pub pose: SampleTensor,
    pub pose_mask: SampleTensor,
    pub app: SampleTensor,
    pub instance: InstanceMap,
    pub image: SampleTensor,
    /// Path of the target image this sample was built from.
    pub path: PathBuf,
    /// Fields added by a post-process hook.
    pub extra: BTreeMap<String, SampleTensor>,
}

/// Borrowed view of a named sample field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleField<'a> {
    Tensor(&'a SampleTensor),
    Absent,
    Path(&'a Path),
}

impl PairedSample {
    pub const FIELD_NAMES: [&'static str; 6] =
        ["pose", "pose_mask", "app", "instance", "image", "path"];

    /// Look a field up by its name, including hook-added extras.
    pub fn field(&self, name: &str) -> Option<SampleField<'_>> {
        match name {
            "pose" => Some(SampleField::Tensor(&self.pose)),
            "pose_mask" => Some(SampleField::Tensor(&self.pose_mask)),
            "app" => Some(SampleField::Tensor(&self.app)),
            "image" => Some(SampleField::Tensor(&self.image)),
            "instance" => Some(match &self.instance {
                InstanceMap::Absent => SampleField::Absent,
                InstanceMap::Present(t) => SampleField::Tensor(t),
            }),
            "path" => Some(SampleField::Path(&self.path)),
            other => self.extra.get(other).map(SampleField::Tensor),
        }
    }

    pub fn field_names(&self) -> Vec<&str> {
        Self::FIELD_NAMES
            .iter()
            .copied()
            .chain(self.extra.keys().map(String::as_str))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSummary {
    pub total: usize,
    pub missing_pose: usize,
    pub missing_pose_mask: usize,
    pub missing_app: usize,
    pub missing_image: usize,
    pub missing_instance: usize,
    /// Samples with at least one missing file.
    pub incomplete: usize,
    /// First few missing paths, for diagnostics.
    pub examples: Vec<PathBuf>,
}

impl PathSummary {
    pub fn missing_files(&self) -> usize {
        self.missing_pose
            + self.missing_pose_mask
            + self.missing_app
            + self.missing_image
            + self.missing_instance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Warn,
    Fail,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Pass => "pass",
            ValidationOutcome::Warn => "warn",
            ValidationOutcome::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub max_missing: Option<usize>,
    pub max_missing_ratio: Option<f32>,
}

impl ValidationThresholds {
    pub fn from_env() -> Self {
        fn parse_usize(key: &str) -> Option<usize> {
            std::env::var(key).ok()?.parse().ok()
        }
        fn parse_ratio(key: &str) -> Option<f32> {
            std::env::var(key).ok()?.parse().ok()
        }
        ValidationThresholds {
            max_missing: parse_usize("POSE_DATASET_MAX_MISSING"),
            max_missing_ratio: parse_ratio("POSE_DATASET_MAX_MISSING_RATIO"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub summary: PathSummary,
}
