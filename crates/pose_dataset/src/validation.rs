//! Preflight checks that every resolved file exists.

use crate::paths::ResolvedPaths;
use crate::types::{PathSummary, ValidationOutcome, ValidationReport, ValidationThresholds};
use std::path::PathBuf;

/// Missing paths kept in the summary for diagnostics.
const MAX_EXAMPLES: usize = 8;

fn apply_thresholds(
    label: &str,
    count: usize,
    ratio: f32,
    max_count: Option<usize>,
    max_ratio: Option<f32>,
    outcome: &mut ValidationOutcome,
    reasons: &mut Vec<String>,
) {
    if let Some(max) = max_count {
        if count > max {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!("{label}: {count} exceeds max {max}"));
        }
    }
    if let Some(max_r) = max_ratio {
        if ratio > max_r {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!(
                "{label}: ratio {:.3} exceeds max {:.3}",
                ratio, max_r
            ));
        }
    }
    if count > 0 {
        if *outcome == ValidationOutcome::Pass {
            *outcome = ValidationOutcome::Warn;
        }
        reasons.push(format!("{label}: {count} observed"));
    }
}

/// Count missing files per field across all samples.
pub fn summarize_paths(paths: &ResolvedPaths) -> PathSummary {
    let mut summary = PathSummary {
        total: paths.pose.len(),
        ..Default::default()
    };
    let mut check = |p: Option<&PathBuf>, counter: fn(&mut PathSummary) -> &mut usize| -> bool {
        let Some(p) = p else { return false };
        if p.is_file() {
            return false;
        }
        *counter(&mut summary) += 1;
        if summary.examples.len() < MAX_EXAMPLES {
            summary.examples.push(p.clone());
        }
        true
    };
    let mut incomplete = 0usize;
    for i in 0..paths.pose.len() {
        // Non-short-circuiting so every field is counted.
        let missing = [
            check(paths.pose.get(i), |s| &mut s.missing_pose),
            check(paths.pose_mask.get(i), |s| &mut s.missing_pose_mask),
            check(paths.app.get(i), |s| &mut s.missing_app),
            check(paths.image.get(i), |s| &mut s.missing_image),
            check(paths.instance.get(i), |s| &mut s.missing_instance),
        ];
        if missing.iter().any(|&m| m) {
            incomplete += 1;
        }
    }
    summary.incomplete = incomplete;
    tracing::debug!(
        total = summary.total,
        incomplete = summary.incomplete,
        "summarized resolved paths"
    );
    summary
}

pub fn validate_summary(summary: PathSummary, thresholds: &ValidationThresholds) -> ValidationReport {
    let denom = summary.total.max(1) as f32;
    let mut outcome = ValidationOutcome::Pass;
    let mut reasons = Vec::new();

    apply_thresholds(
        "incomplete samples",
        summary.incomplete,
        summary.incomplete as f32 / denom,
        thresholds.max_missing,
        thresholds.max_missing_ratio,
        &mut outcome,
        &mut reasons,
    );
    if summary.total == 0 {
        outcome = ValidationOutcome::Fail;
        reasons.push("no samples resolved".to_string());
    }

    ValidationReport {
        outcome,
        reasons,
        summary,
    }
}

pub fn validate_paths(paths: &ResolvedPaths, thresholds: &ValidationThresholds) -> ValidationReport {
    validate_summary(summarize_paths(paths), thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(total: usize, incomplete: usize) -> PathSummary {
        PathSummary {
            total,
            incomplete,
            missing_image: incomplete,
            ..Default::default()
        }
    }

    #[test]
    fn clean_summary_passes() {
        let report = validate_summary(summary(10, 0), &ValidationThresholds::default());
        assert_eq!(report.outcome, ValidationOutcome::Pass);
        assert!(report.reasons.is_empty());
    }

    #[test]
    fn missing_files_warn_without_thresholds() {
        let report = validate_summary(summary(10, 2), &ValidationThresholds::default());
        assert_eq!(report.outcome, ValidationOutcome::Warn);
    }

    #[test]
    fn ratio_threshold_fails() {
        let thresholds = ValidationThresholds {
            max_missing: None,
            max_missing_ratio: Some(0.1),
        };
        let report = validate_summary(summary(10, 2), &thresholds);
        assert_eq!(report.outcome, ValidationOutcome::Fail);
        assert!(report.reasons.iter().any(|r| r.contains("ratio")));
    }

    #[test]
    fn empty_dataset_fails() {
        let report = validate_summary(summary(0, 0), &ValidationThresholds::default());
        assert_eq!(report.outcome, ValidationOutcome::Fail);
    }

    #[test]
    fn counts_each_missing_field() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.jpg");
        std::fs::write(&present, b"x").unwrap();
        let paths = ResolvedPaths {
            pose: vec![present.clone(), present.clone()],
            pose_mask: vec![present.clone(), dir.path().join("gone_mask.jpg")],
            app: vec![dir.path().join("gone_app.jpg"), present.clone()],
            image: vec![present.clone(), present.clone()],
            instance: Vec::new(),
        };
        let s = summarize_paths(&paths);
        assert_eq!(s.total, 2);
        assert_eq!(s.missing_pose_mask, 1);
        assert_eq!(s.missing_app, 1);
        assert_eq!(s.missing_instance, 0);
        assert_eq!(s.incomplete, 2);
        assert_eq!(s.missing_files(), 2);
        assert_eq!(s.examples.len(), 2);
    }
}
