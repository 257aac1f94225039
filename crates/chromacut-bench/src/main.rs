//! chromacut-bench: CLI tool for matting parameter experimentation and
//! diagnostics.
//!
//! Runs the matting pipeline on an image file with configurable
//! parameters, printing per-stage diagnostics. Useful for:
//!
//! - Tuning tolerance and refinement settings against real shots
//! - Measuring per-stage durations to find the expensive knobs
//! - Comparing the heavy tier with a light-tier re-run from the cached base
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin chromacut-bench -- [OPTIONS] <IMAGE_PATH>
//! ```
//!
//! Set `RUST_LOG=debug` to see pipeline logging on stderr.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use chromacut_pipeline::diagnostics::duration_ms;
use chromacut_pipeline::{
    ChromaMode, MorphOp, NeverCancel, ParameterSet, PipelineDiagnostics, Stage, WebClock,
    run_heavy, run_light,
};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Matting parameter experimentation and diagnostics for chromacut.
///
/// Runs the chroma-key pipeline on a given image with configurable
/// parameters and prints per-stage timing and alpha statistics.
#[derive(Parser)]
#[command(name = "chromacut-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Key color: `auto`, a preset (green, blue, magenta, cyan) or `#rrggbb`.
    #[arg(long, default_value = "auto", value_parser = parse_chroma)]
    chroma: ChromaMode,

    /// RGB distance at or below which pixels become transparent.
    #[arg(long, default_value_t = ParameterSet::DEFAULT_TOLERANCE)]
    tolerance: f32,

    /// Morphology direction.
    #[arg(long, value_enum, default_value_t = Morph::Dilate)]
    morph_op: Morph,

    /// Morphology passes.
    #[arg(long, default_value_t = ParameterSet::DEFAULT_MORPH_ITERATIONS)]
    morph_iterations: u32,

    /// Feather radius in pixels.
    #[arg(long, default_value_t = ParameterSet::DEFAULT_FEATHER_RADIUS)]
    feather_radius: u32,

    /// Signed edge choke (positive grows, negative shrinks).
    #[arg(long, default_value_t = ParameterSet::DEFAULT_EDGE_CHOKE, allow_negative_numbers = true)]
    edge_choke: f32,

    /// Corner smoothing strength.
    #[arg(long, default_value_t = ParameterSet::DEFAULT_CORNER_SMOOTHING)]
    corner_smoothing: f32,

    /// Gradient gate for corner smoothing.
    #[arg(long, default_value_t = ParameterSet::DEFAULT_CORNER_REFINEMENT_THRESHOLD)]
    corner_threshold: f32,

    /// Median smoothing of edge alpha.
    #[arg(long, default_value_t = ParameterSet::DEFAULT_EDGE_SMOOTHING)]
    edge_smoothing: f32,

    /// Minimum island size kept by cleanup.
    #[arg(long, default_value_t = ParameterSet::DEFAULT_BORDER_CLEANUP)]
    border_cleanup: u32,

    /// Artifact cleanup level.
    #[arg(long, default_value_t = ParameterSet::DEFAULT_ARTIFACT_CLEANUP_SIZE)]
    artifact_cleanup: u32,

    /// Alpha contrast enhancement.
    #[arg(long, default_value_t = ParameterSet::DEFAULT_CONTRAST_ENHANCEMENT)]
    contrast: f32,

    /// Edge softening radius.
    #[arg(long, default_value_t = ParameterSet::DEFAULT_EDGE_RADIUS)]
    edge_radius: f32,

    /// Matte edge blend radius.
    #[arg(long, default_value_t = ParameterSet::DEFAULT_MATTE_EDGE)]
    matte_edge: f32,

    /// Color decontamination strength.
    #[arg(long, default_value_t = ParameterSet::DEFAULT_DECONTAMINATION_STRENGTH)]
    decontamination: f32,

    /// Supersampling level (0 disables).
    #[arg(long, default_value_t = ParameterSet::DEFAULT_SSAA_QUALITY)]
    ssaa: u32,

    /// Write the cutout as PNG.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Also re-run the light tier from the cached base after each run.
    #[arg(long)]
    light: bool,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Full parameter set as a JSON string.
    ///
    /// When provided, all other parameter flags are ignored. Missing
    /// fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Morphology direction selection.
#[derive(Clone, Copy, ValueEnum)]
enum Morph {
    /// Grow the opaque region.
    Dilate,
    /// Shrink the opaque region.
    Erode,
}

fn parse_chroma(s: &str) -> Result<ChromaMode, String> {
    s.parse().map_err(|e| format!("{e}"))
}

/// Build a [`ParameterSet`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn params_from_cli(cli: &Cli) -> Result<ParameterSet, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(ParameterSet {
        tolerance: cli.tolerance,
        morph_op: match cli.morph_op {
            Morph::Dilate => MorphOp::Dilate,
            Morph::Erode => MorphOp::Erode,
        },
        morph_iterations: cli.morph_iterations,
        feather_radius: cli.feather_radius,
        edge_choke: cli.edge_choke,
        corner_smoothing: cli.corner_smoothing,
        corner_refinement_threshold: cli.corner_threshold,
        edge_smoothing: cli.edge_smoothing,
        border_cleanup: cli.border_cleanup,
        artifact_cleanup_size: cli.artifact_cleanup,
        contrast_enhancement: cli.contrast,
        edge_radius: cli.edge_radius,
        matte_edge: cli.matte_edge,
        decontamination_strength: cli.decontamination,
        ssaa_quality: cli.ssaa,
        chroma: cli.chroma,
    })
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn emit(diagnostics: &PipelineDiagnostics, json: bool) -> Result<(), String> {
    if json {
        let text = serde_json::to_string_pretty(diagnostics)
            .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
        println!("{text}");
    } else {
        println!("{}", diagnostics.report());
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let params = match params_from_cli(&cli) {
        Ok(p) => p.clamped(),
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let source = match image::open(&cli.image_path) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Image: {} ({}x{})",
        cli.image_path.display(),
        source.width(),
        source.height(),
    );
    eprintln!("Params: {params:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut heavy_runs = Vec::with_capacity(cli.runs);
    let mut light_runs = Vec::new();

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let output = match run_heavy(&source, &params, &NeverCancel, &WebClock) {
            Ok(output) => output,
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(msg) = emit(&output.diagnostics, cli.json) {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }

        if cli.light
            && let Some(base) = &output.base
        {
            match run_light(base, &params, &NeverCancel, &WebClock) {
                Ok(light) => {
                    if let Err(msg) = emit(&light.diagnostics, cli.json) {
                        eprintln!("{msg}");
                        return ExitCode::FAILURE;
                    }
                    light_runs.push(light.diagnostics);
                }
                Err(e) => {
                    eprintln!("Light tier error: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }

        // Write the cutout on the first run only.
        if run == 0
            && let Some(ref out_path) = cli.out
        {
            match output.raster.save(out_path) {
                Ok(()) => eprintln!("Cutout written to {}", out_path.display()),
                Err(e) => eprintln!("Error writing cutout to {}: {e}", out_path.display()),
            }
        }

        heavy_runs.push(output.diagnostics);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary("Heavy", &heavy_runs);
        if !light_runs.is_empty() {
            print_multi_run_summary("Light", &light_runs);
        }
    }

    ExitCode::SUCCESS
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(label: &str, all_diagnostics: &[PipelineDiagnostics]) {
    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    println!();
    println!(
        "{label} summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| duration_ms(d.total_duration))
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<20} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(36));

    for stage in Stage::HEAVY.into_iter().chain(Stage::REFINE) {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(|d| d.stage_duration(stage))
            .map(duration_ms)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{:<20} {stage_mean:>10.3}ms", stage.label());
    }
}
