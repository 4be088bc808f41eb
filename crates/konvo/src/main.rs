//! konvo: step-by-step 3x3 image convolution from the command line.
//!
//! Decodes an image, scales it onto the processing canvas, and runs it
//! through the konvo engine pixel by pixel, writing the grayscale result
//! as a PNG.
//!
//! # Usage
//!
//! ```text
//! konvo run photo.jpg -o out.png --preset sharpen --delay-ms 1 --interactive
//! konvo serve < commands.jsonl > events.jsonl
//! konvo presets
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod serve;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;

use clap::{Parser, Subcommand, ValueEnum};
use image::imageops::{self, FilterType};
use konvo_engine::convolve::convolve_image;
use konvo_engine::{
    Command, Commander, Dimensions, Engine, Event, ImageBuffer, Kernel, KernelPreset, Progress,
    ResultRaster, RgbaImage, RunConfig, StartRequest,
};
use tracing_subscriber::EnvFilter;

/// Side length of the square canvas images are scaled onto by default.
const DEFAULT_CANVAS_SIZE: u32 = 100;

/// Step-by-step 3x3 image convolution.
#[derive(Parser)]
#[command(name = "konvo", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,

    /// Log engine activity at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Convolve an image file and write the result as a PNG.
    Run(RunArgs),
    /// Speak the engine's JSON-lines protocol on stdin/stdout.
    Serve,
    /// List the built-in kernel presets.
    Presets,
}

#[derive(Parser)]
struct RunArgs {
    /// Input image (PNG, JPEG, BMP, WebP).
    input: PathBuf,

    /// Output image path (PNG recommended).
    #[arg(short, long)]
    output: PathBuf,

    /// Built-in kernel to apply.
    #[arg(long, value_enum, default_value_t = Preset::Identity)]
    preset: Preset,

    /// Custom kernel: nine comma-separated weights, row-major.
    /// Takes precedence over `--preset`.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, value_name = "W,W,...")]
    kernel: Option<Vec<f64>>,

    /// Do not divide by the kernel's weight sum.
    #[arg(long)]
    no_normalize: bool,

    /// Milliseconds to wait after each pixel.
    #[arg(long, default_value_t = RunConfig::DEFAULT_DELAY_MS)]
    delay_ms: u64,

    /// Side length of the square canvas the image is scaled onto.
    #[arg(long, default_value_t = DEFAULT_CANVAS_SIZE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    size: u32,

    /// Keep the decoded image size instead of scaling to the canvas.
    #[arg(long, conflicts_with = "size")]
    original_size: bool,

    /// Full run config as a JSON string, e.g. `{"normalize":true,"delay":5}`.
    ///
    /// When provided, `--no-normalize` and `--delay-ms` are ignored.
    #[arg(long)]
    config_json: Option<String>,

    /// Read `p` (pause), `r` (resume) and `x` (reset) lines from stdin
    /// while the run is in progress.
    #[arg(long, conflicts_with = "instant")]
    interactive: bool,

    /// Compute the whole result at once, bypassing the scheduled run.
    #[arg(long)]
    instant: bool,
}

/// Kernel preset selection.
#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    /// Leaves the grayscale image unchanged.
    Identity,
    /// Emphasises local contrast.
    Sharpen,
    /// Diagonal edge detector.
    Edge,
    /// 3x3 box blur.
    Blur,
}

impl From<Preset> for KernelPreset {
    fn from(preset: Preset) -> Self {
        match preset {
            Preset::Identity => Self::Identity,
            Preset::Sharpen => Self::Sharpen,
            Preset::Edge => Self::Edge,
            Preset::Blur => Self::Blur,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.cmd {
        Cmd::Run(args) => run(args),
        Cmd::Serve => serve::serve(),
        Cmd::Presets => {
            print_presets();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

/// Install a stderr `fmt` subscriber. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_presets() {
    for preset in KernelPreset::ALL {
        println!("{:<10} {}", preset.name(), preset.kernel());
    }
}

/// Build the [`RunConfig`] from CLI arguments.
///
/// If `--config-json` is provided it is parsed directly and the
/// individual flags are ignored.
fn config_from_args(args: &RunArgs) -> Result<RunConfig, String> {
    if let Some(ref json) = args.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(RunConfig {
        normalize: !args.no_normalize,
        delay_ms: args.delay_ms,
    })
}

fn kernel_from_args(args: &RunArgs) -> Result<Kernel, String> {
    match &args.kernel {
        Some(weights) => {
            Kernel::try_from(weights.as_slice()).map_err(|e| format!("Invalid --kernel: {e}"))
        }
        None => Ok(KernelPreset::from(args.preset).kernel()),
    }
}

/// Decode the input and scale it onto the canvas.
fn load_image(args: &RunArgs) -> Result<RgbaImage, String> {
    let decoded = image::open(&args.input)
        .map_err(|e| format!("Error reading {}: {e}", args.input.display()))?
        .to_rgba8();

    if args.original_size {
        Ok(decoded)
    } else {
        Ok(imageops::resize(&decoded, args.size, args.size, FilterType::Triangle))
    }
}

fn run(args: &RunArgs) -> Result<(), String> {
    let config = config_from_args(args)?;
    let kernel = kernel_from_args(args)?;
    let rgba = load_image(args)?;
    let image = ImageBuffer::try_from(&rgba).map_err(|e| format!("Unusable image: {e}"))?;
    let dims = image.dimensions();

    eprintln!("Image: {} ({}x{})", args.input.display(), dims.width, dims.height);
    eprintln!("Kernel: {kernel}");
    eprintln!("Config: {config:?}");

    if args.instant {
        let raster = instant_raster(&image, &kernel, &config);
        return save(raster, &args.output);
    }

    let engine = Engine::spawn().map_err(|e| format!("Engine error: {e}"))?;
    if args.interactive {
        eprintln!("Controls: p = pause, r = resume, x = reset (then Enter)");
        spawn_stdin_controls(engine.commander());
    }
    engine
        .send(Command::Start(StartRequest::new(image, kernel, config)))
        .map_err(|e| format!("Engine error: {e}"))?;

    match paint_run(engine.events(), dims)? {
        Some(raster) => save(raster, &args.output),
        None => Ok(()),
    }
}

/// Paint progress events until the run ends.
///
/// Returns the finished raster on `done` and `None` on `cancelled`.
fn paint_run(
    events: impl IntoIterator<Item = Event>,
    dims: Dimensions,
) -> Result<Option<ResultRaster>, String> {
    let mut raster = ResultRaster::new(dims);
    for event in events {
        match event {
            Event::Progress(progress) => {
                raster.apply(&progress);
                report_progress(&progress, &raster, dims);
            }
            Event::Done => {
                eprintln!();
                return Ok(Some(raster));
            }
            Event::Cancelled => {
                eprintln!();
                eprintln!(
                    "Cancelled after {} of {} pixels; nothing written.",
                    raster.processed(),
                    raster.total(),
                );
                return Ok(None);
            }
            // The CLI sends a single start, so any failure ends the run.
            Event::Failed { error } => return Err(format!("Engine error: {error}")),
        }
    }

    Err("Engine stopped before the run finished".into())
}

/// Paint the one-shot convolution into a raster, as a finished run would.
fn instant_raster(image: &ImageBuffer, kernel: &Kernel, config: &RunConfig) -> ResultRaster {
    let dims = image.dimensions();
    let mut raster = ResultRaster::new(dims);
    let values = convolve_image(image, kernel, config);
    let coords = (0..dims.height).flat_map(|y| (0..dims.width).map(move |x| (x, y)));
    for ((x, y), value) in coords.zip(values) {
        raster.apply(&Progress::new(dims, x, y, value));
    }
    raster
}

/// Overwrite one status line on stderr at the end of each row.
fn report_progress(progress: &Progress, raster: &ResultRaster, dims: Dimensions) {
    if progress.x + 1 == dims.width {
        eprint!(
            "\rProcessing: ({}, {}) / {}x{}  {:>5.1}%",
            progress.x + 1,
            progress.y + 1,
            dims.width,
            dims.height,
            raster.fraction() * 100.0,
        );
    }
}

fn save(raster: ResultRaster, output: &Path) -> Result<(), String> {
    raster
        .into_image()
        .save(output)
        .map_err(|e| format!("Error writing {}: {e}", output.display()))?;
    eprintln!("Result written to {}", output.display());
    Ok(())
}

/// Forward single-letter control lines from stdin to the engine.
///
/// The thread is detached; it ends with the process or when stdin closes.
fn spawn_stdin_controls(commander: Commander) {
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim() {
                "p" => Command::Pause,
                "r" => Command::Resume,
                "x" => Command::Reset,
                "" => continue,
                other => {
                    eprintln!("\nUnknown control '{other}' (p = pause, r = resume, x = reset)");
                    continue;
                }
            };
            if commander.send(command).is_err() {
                break;
            }
        }
    });
}
