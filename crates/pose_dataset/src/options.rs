//! Dataset configuration: defaults, TOML loading, and validation.

use crate::transform::PreprocessMode;
use crate::types::{DatasetResult, PoseDatasetError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_NAME: &str = "pose-dataset.toml";
const CONFIG_ENV: &str = "POSE_DATASET_CONFIG";

/// How resolved path sequences are ordered before truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Natural-sort every sequence on its own.
    #[default]
    PerSequence,
    /// Natural-sort whole rows by the pose path, keeping sequences row-aligned.
    ByPose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetOptions {
    /// Root holding `crop_Img/` and `crop_Mask_Img/`.
    pub dataroot: PathBuf,
    /// Manifest CSV with `pose_image`, `app_image`, `target_image`, `flow` columns.
    pub ann_file: PathBuf,
    /// JSON object of row index -> inclusion flag.
    pub filter_list: Option<PathBuf>,
    /// Read background-removed images from `crop_Mask_Img/`.
    pub rm_bg: bool,
    pub no_instance: bool,
    pub no_pairing_check: bool,
    pub max_dataset_size: usize,
    /// Number of label classes; 0 treats the pose mask as a color image.
    pub label_nc: usize,
    pub preprocess_mode: PreprocessMode,
    pub load_size: u32,
    pub crop_size: u32,
    pub aspect_ratio: f32,
    pub is_train: bool,
    pub no_flip: bool,
    /// Seed for per-sample transform parameters; thread RNG when unset.
    pub seed: Option<u64>,
    pub sort_order: SortOrder,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            dataroot: PathBuf::from("datasets"),
            ann_file: PathBuf::from("datasets/annotations.csv"),
            filter_list: None,
            rm_bg: false,
            no_instance: false,
            no_pairing_check: false,
            max_dataset_size: usize::MAX,
            label_nc: 0,
            preprocess_mode: PreprocessMode::ResizeAndCrop,
            load_size: 286,
            crop_size: 256,
            aspect_ratio: 1.0,
            is_train: true,
            no_flip: false,
            seed: None,
            sort_order: SortOrder::PerSequence,
        }
    }
}

impl DatasetOptions {
    pub fn new(dataroot: impl Into<PathBuf>, ann_file: impl Into<PathBuf>) -> Self {
        Self {
            dataroot: dataroot.into(),
            ann_file: ann_file.into(),
            ..Default::default()
        }
    }

    /// Load from `$POSE_DATASET_CONFIG`, else `pose-dataset.toml` in the working directory.
    pub fn load() -> DatasetResult<Self> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_NAME));
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> DatasetResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| PoseDatasetError::io(path, e))?;
        Self::from_toml_str(&raw, path)
    }

    pub(crate) fn from_toml_str(raw: &str, path: &Path) -> DatasetResult<Self> {
        let mut opts: DatasetOptions =
            toml::from_str(raw).map_err(|e| PoseDatasetError::Config {
                path: path.to_path_buf(),
                msg: e.to_string(),
            })?;
        opts.dataroot = expand_path(&opts.dataroot);
        opts.ann_file = expand_path(&opts.ann_file);
        opts.filter_list = opts.filter_list.as_deref().map(expand_path);
        opts.validate().map_err(|msg| PoseDatasetError::Config {
            path: path.to_path_buf(),
            msg,
        })?;
        Ok(opts)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.crop_size == 0 {
            return Err("crop_size must be positive".into());
        }
        if self.load_size == 0 {
            return Err("load_size must be positive".into());
        }
        if !self.aspect_ratio.is_finite() || self.aspect_ratio <= 0.0 {
            return Err(format!(
                "aspect_ratio must be positive and finite, got {}",
                self.aspect_ratio
            ));
        }
        if self.preprocess_mode.crops() && self.load_size < self.crop_size {
            tracing::warn!(
                load_size = self.load_size,
                crop_size = self.crop_size,
                "load_size is smaller than crop_size; crops will be zero-padded"
            );
        }
        Ok(())
    }

    /// Whether the horizontal flip drawn in the transform parameters is honored.
    pub fn flips(&self) -> bool {
        self.is_train && !self.no_flip
    }
}

fn expand_path(raw: &Path) -> PathBuf {
    let Some(raw) = raw.to_str() else {
        return raw.to_path_buf();
    };
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
