//! Paired pose / appearance / target image dataset for conditional image generation.
//!
//! This crate provides utilities for:
//! - Reading a CSV manifest and optional JSON filter list
//! - Resolving and validating index-aligned path sequences
//! - Loading samples with one set of transform parameters shared across all fields
//! - Parallel batch iteration and Burn-compatible batching

pub mod dataset;
pub mod loader;
pub mod manifest;
pub mod options;
pub mod paths;
pub mod transform;
pub mod types;
pub mod validation;

pub use dataset::{Chain, Identity, PairedDataset, PairedDatasetBuilder, SamplePostprocess};
pub use loader::{LoaderConfig, SampleLoader};
pub use manifest::{load_rows, read_manifest, ManifestRow};
pub use options::{DatasetOptions, SortOrder};
pub use paths::{natural_cmp, natural_sort, paths_match, PathLayout, ResolvedPaths};
pub use transform::{PreprocessMode, Transform, TransformParams};
pub use types::*;
pub use validation::{summarize_paths, validate_paths, validate_summary};

#[cfg(feature = "burn-runtime")]
pub use loader::{PairedBatch, PairedBatcher};
