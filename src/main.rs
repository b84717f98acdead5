//! synthscan CLI - classify images as AI generated or real, with Grad-CAM overlays.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use synthscan::image::{fetch_image, load_image, save_overlay};
use synthscan::pipeline::Certainty;
use synthscan::{Analyzer, Config};

/// Classify images as AI generated or real photos using a CNN, with optional
/// Grad-CAM overlays showing which regions drove the decision.
#[derive(Parser, Debug)]
#[command(name = "synthscan")]
#[command(version, about, long_about = None)]
struct Args {
    /// Input images: file paths or http(s) URLs.
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<String>,

    /// Model directory containing model.json and weights.npz.
    #[arg(short, long, value_name = "DIR")]
    model: PathBuf,

    /// Where to save the Grad-CAM overlay (single input only).
    #[arg(short, long, value_name = "PATH", conflicts_with = "output_dir")]
    output: Option<PathBuf>,

    /// Directory to save one overlay per input, named <stem>_gradcam.png.
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Overlay blend factor (0.0-1.0).
    #[arg(short, long, default_value = "0.4", value_name = "FLOAT")]
    alpha: f32,

    /// Skip Grad-CAM entirely; classification only.
    #[arg(long)]
    no_gradcam: bool,

    /// JPEG quality for saved overlays (1-100).
    #[arg(short, long, default_value = "95", value_name = "INT")]
    quality: u8,

    /// Emit results as JSON instead of a text report.
    #[arg(long)]
    json: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

/// One line of the machine-readable report.
#[derive(Serialize)]
struct Report {
    input: String,
    label: synthscan::Label,
    raw_score: f32,
    confidence: f32,
    certainty: Certainty,
    width: u32,
    height: u32,
    overlay: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("synthscan={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(err) = run(&args) {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(args: &Args) -> Result<()> {
    if args.output.is_some() && args.inputs.len() > 1 {
        anyhow::bail!("--output only works with a single input; use --output-dir for batches");
    }
    if !(1..=100).contains(&args.quality) {
        anyhow::bail!("--quality must be between 1 and 100");
    }

    let config = Config {
        alpha: args.alpha,
        gradcam: !args.no_gradcam,
        ..Config::default()
    };

    let model = synthscan::model::load_model(&args.model).context("Failed to load model")?;
    let analyzer = Analyzer::new(model, config).context("Failed to initialize analyzer")?;

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let progress = if args.inputs.len() > 1 && !args.json {
        let pb = ProgressBar::new(args.inputs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} Analyzing [{bar:40.cyan/blue}] {pos}/{len}")
                .expect("valid template")
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut reports = Vec::with_capacity(args.inputs.len());
    let mut failures = 0usize;

    for input in &args.inputs {
        match analyze_one(&analyzer, input, args) {
            Ok(report) => reports.push(report),
            Err(err) => {
                failures += 1;
                tracing::error!("{input}: {err:#}");
            }
        }
        if let Some(pb) = &progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    if failures > 0 {
        if reports.is_empty() {
            anyhow::bail!("all {failures} input(s) failed");
        }
        tracing::warn!("{failures} of {} input(s) failed", args.inputs.len());
    }

    Ok(())
}

fn analyze_one(analyzer: &Analyzer, input: &str, args: &Args) -> Result<Report> {
    let img = if input.starts_with("http://") || input.starts_with("https://") {
        fetch_image(input).context("Failed to fetch image")?
    } else {
        let path = Path::new(input);
        if !path.exists() {
            anyhow::bail!("input file does not exist: {}", path.display());
        }
        load_image(path).context("Failed to load image")?
    };

    let analysis = analyzer.analyze(&img).context("Failed to analyze image")?;

    let overlay_path = match (&analysis.overlay, overlay_target(input, args)) {
        (Some(overlay), Some(path)) => {
            save_overlay(overlay, &path, args.quality).context("Failed to save overlay")?;
            tracing::debug!("Saved overlay to {}", path.display());
            Some(path)
        }
        _ => None,
    };

    Ok(Report {
        input: input.to_string(),
        label: analysis.prediction.label,
        raw_score: analysis.prediction.raw_score,
        confidence: analysis.prediction.confidence,
        certainty: analysis.prediction.certainty(),
        width: analysis.dimensions.0,
        height: analysis.dimensions.1,
        overlay: overlay_path,
    })
}

/// Where the overlay for this input should land, if anywhere.
fn overlay_target(input: &str, args: &Args) -> Option<PathBuf> {
    if let Some(path) = &args.output {
        return Some(path.clone());
    }
    let dir = args.output_dir.as_ref()?;

    let stem = Path::new(input)
        .file_stem()
        .and_then(|s| s.to_str())
        .map_or_else(|| "image".to_string(), str::to_string);
    let stem = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect::<String>();

    Some(dir.join(format!("{stem}_gradcam.png")))
}

fn print_report(report: &Report) {
    let certainty = match report.certainty {
        Certainty::High => "High",
        Certainty::Medium => "Medium",
        Certainty::Low => "Low",
    };

    println!(
        "{}: {} ({:.1}% confidence, {certainty}) [raw {:.4}, {}x{}]",
        report.input,
        report.label,
        report.confidence,
        report.raw_score,
        report.width,
        report.height
    );
    if let Some(path) = &report.overlay {
        println!("  overlay: {}", path.display());
    }
}
