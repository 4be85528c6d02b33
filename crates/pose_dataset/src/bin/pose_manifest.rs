use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use pose_dataset::{
    validate_paths, DatasetOptions, PairedDataset, PreprocessMode, SampleTensor,
    ValidationOutcome, ValidationThresholds,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pose_manifest",
    about = "Resolve a paired pose dataset manifest, check its files, and optionally load samples"
)]
struct Args {
    /// TOML config; falls back to $POSE_DATASET_CONFIG or ./pose-dataset.toml.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    dataroot: Option<PathBuf>,
    #[arg(long)]
    ann_file: Option<PathBuf>,
    #[arg(long)]
    filter_list: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    rm_bg: bool,
    #[arg(long, default_value_t = false)]
    no_instance: bool,
    #[arg(long, default_value_t = false)]
    no_pairing_check: bool,
    #[arg(long)]
    max_dataset_size: Option<usize>,
    #[arg(long)]
    label_nc: Option<usize>,
    #[arg(long, value_parser = parse_mode)]
    preprocess_mode: Option<PreprocessMode>,
    #[arg(long)]
    seed: Option<u64>,
    /// Load these sample indices and log their tensor shapes.
    #[arg(long = "sample")]
    samples: Vec<usize>,
    /// Print the validation report as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn parse_mode(raw: &str) -> Result<PreprocessMode, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| format!("unknown preprocess mode `{raw}`"))
}

fn resolve_options(args: &Args) -> Result<DatasetOptions> {
    let mut opts = match &args.config {
        Some(path) => DatasetOptions::from_path(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None if args.ann_file.is_some() => DatasetOptions::default(),
        None => DatasetOptions::load().context("load default config")?,
    };
    if let Some(v) = &args.dataroot {
        opts.dataroot = v.clone();
    }
    if let Some(v) = &args.ann_file {
        opts.ann_file = v.clone();
    }
    if let Some(v) = &args.filter_list {
        opts.filter_list = Some(v.clone());
    }
    opts.rm_bg |= args.rm_bg;
    opts.no_instance |= args.no_instance;
    opts.no_pairing_check |= args.no_pairing_check;
    if let Some(v) = args.max_dataset_size {
        opts.max_dataset_size = v;
    }
    if let Some(v) = args.label_nc {
        opts.label_nc = v;
    }
    if let Some(v) = args.preprocess_mode {
        opts.preprocess_mode = v;
    }
    if args.seed.is_some() {
        opts.seed = args.seed;
    }
    Ok(opts)
}

fn describe(t: &SampleTensor) -> String {
    let [c, h, w] = t.shape();
    let kind = if t.is_int() { "i64" } else { "f32" };
    match t.min_max() {
        Some((lo, hi)) => format!("{kind}[{c}, {h}, {w}] range [{lo:.3}, {hi:.3}]"),
        None => format!("{kind}[{c}, {h}, {w}] empty"),
    }
}

fn main() -> Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args = Args::parse();
    let opts = resolve_options(&args)?;
    let dataset = PairedDataset::new(opts).context("build paired dataset")?;

    let report = validate_paths(dataset.paths(), &ValidationThresholds::from_env());
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        tracing::info!(
            outcome = report.outcome.as_str(),
            samples = report.summary.total,
            incomplete = report.summary.incomplete,
            missing_files = report.summary.missing_files(),
            "validation finished"
        );
        for reason in &report.reasons {
            tracing::warn!("{reason}");
        }
        for path in &report.summary.examples {
            tracing::warn!(path = %path.display(), "missing file");
        }
    }

    for &index in &args.samples {
        let sample = dataset
            .get(index)
            .with_context(|| format!("load sample {index}"))?;
        tracing::info!(
            index,
            path = %sample.path.display(),
            pose = %describe(&sample.pose),
            pose_mask = %describe(&sample.pose_mask),
            app = %describe(&sample.app),
            image = %describe(&sample.image),
            instance = %sample
                .instance
                .tensor()
                .map(describe)
                .unwrap_or_else(|| "absent".to_string()),
            "loaded sample"
        );
    }

    Ok(if report.outcome == ValidationOutcome::Fail {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
