//! Planetary mosaic tiler.
//!
//! Turns a directory of georeferenced rasters into a `{z}/{x}/{y}.png`
//! tile pyramid for web map viewers.

mod config_loader;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config_loader::{load_config, LogFormat, LoggingConfig};
use mosaic_common::TileScheme;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tile_pipeline::{
    locate_tile, EmptyTilePolicy, PipelineConfig, PipelineOrchestrator, PipelineState,
    ResamplingMethod, SourceErrorPolicy,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "tiler")]
#[command(about = "Build web-map tile pyramids from planetary rasters")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "TILER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty or json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize, mosaic and tile every source in the input directory
    Run(PipelineArgs),

    /// Print the pyramid a run would build, without writing anything
    Plan(PipelineArgs),

    /// Print the position of a tile and a zoom to center a viewer on it
    Locate(LocateArgs),
}

#[derive(Args, Debug, Default)]
struct PipelineArgs {
    /// Directory scanned for source rasters
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Directory for intermediate rasters and manifests
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Directory receiving the tiles
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Finest zoom level, or "auto" to derive it from the sources
    #[arg(long)]
    max_zoom: Option<String>,

    #[arg(long)]
    min_zoom: Option<i32>,

    #[arg(long)]
    tile_size: Option<u32>,

    /// Worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Output bands (1 = gray, 3 = RGB)
    #[arg(long)]
    bands: Option<u8>,

    /// No-data sentinel value
    #[arg(long)]
    nodata: Option<u8>,

    #[arg(long)]
    scheme: Option<TileScheme>,

    #[arg(long)]
    resampling: Option<ResamplingMethod>,

    #[arg(long)]
    empty_tiles: Option<EmptyTilePolicy>,

    /// Skip unreadable inputs instead of aborting
    #[arg(long)]
    skip_bad_inputs: bool,
}

impl PipelineArgs {
    fn apply(&self, config: &mut PipelineConfig) -> Result<()> {
        if let Some(dir) = &self.input_dir {
            config.input_dir = dir.clone();
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(zoom) = &self.max_zoom {
            config.max_zoom = if zoom.eq_ignore_ascii_case("auto") {
                None
            } else {
                Some(
                    zoom.parse()
                        .with_context(|| format!("Invalid --max-zoom '{}'", zoom))?,
                )
            };
        }
        if let Some(zoom) = self.min_zoom {
            config.min_zoom = zoom;
        }
        if let Some(size) = self.tile_size {
            config.tile_size = size;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(bands) = self.bands {
            config.encoding.bands = bands;
        }
        if let Some(nodata) = self.nodata {
            config.encoding.nodata = nodata;
        }
        if let Some(scheme) = self.scheme {
            config.tile_scheme = scheme;
        }
        if let Some(method) = self.resampling {
            config.resampling = method;
        }
        if let Some(policy) = self.empty_tiles {
            config.empty_tiles = policy;
        }
        if self.skip_bad_inputs {
            config.source_errors = SourceErrorPolicy::Skip;
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
struct LocateArgs {
    z: u32,
    x: u32,
    y: u32,

    /// Locate the tile center instead of its north-west corner
    #[arg(long)]
    center: bool,

    /// Addressing scheme of the given coordinates
    #[arg(long, default_value = "xyz")]
    scheme: TileScheme,
}

fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<ExitCode> {
    if let Command::Locate(args) = &cli.command {
        locate(args)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    init_tracing(&config.logging);

    match &cli.command {
        Command::Run(args) => {
            args.apply(&mut config.pipeline)?;
            run(config.pipeline)
        }
        Command::Plan(args) => {
            args.apply(&mut config.pipeline)?;
            plan(config.pipeline)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Locate(_) => Ok(ExitCode::SUCCESS),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn run(config: PipelineConfig) -> Result<ExitCode> {
    let orchestrator = PipelineOrchestrator::new(config)?;
    let report = orchestrator.run(PipelineState::new());

    if let Some(message) = report.outcome.message() {
        eprintln!("{}", message);
        return Ok(ExitCode::FAILURE);
    }

    info!(
        run_id = %report.run_id,
        elapsed_ms = report.elapsed_ms,
        skipped_stages = report.state.all_skipped(),
        "Run complete"
    );
    for (zoom, count) in &report.tile_counts {
        println!("z{:<2} {:>8} tiles", zoom, count);
    }
    for input in &report.skipped_inputs {
        println!("skipped {}", input);
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct LevelLine {
    zoom: u32,
    meters_per_pixel: f64,
    tiles_per_axis: u64,
}

#[derive(Serialize)]
struct PlanReport {
    sources: Vec<String>,
    max_zoom: u32,
    min_zoom: u32,
    auto_zoom: bool,
    tile_size: u32,
    scheme: TileScheme,
    crs: String,
    levels: Vec<LevelLine>,
}

fn plan(config: PipelineConfig) -> Result<()> {
    let orchestrator = PipelineOrchestrator::new(config)?;
    let (plan, sources) = orchestrator.plan()?;
    let report = PlanReport {
        sources: sources.iter().map(|s| s.id.clone()).collect(),
        max_zoom: plan.max_zoom,
        min_zoom: plan.min_zoom,
        auto_zoom: plan.auto_zoom,
        tile_size: plan.tile_size,
        scheme: plan.scheme,
        crs: plan.crs.to_string(),
        levels: plan
            .levels()
            .map(|zoom| LevelLine {
                zoom,
                meters_per_pixel: plan.resolution(zoom),
                tiles_per_axis: plan.level_grid(zoom).tiles_per_axis(),
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn locate(args: &LocateArgs) -> Result<()> {
    let loc = locate_tile(args.z, args.x, args.y, args.scheme, args.center)?;
    let what = if args.center { "center" } else { "corner" };
    println!(
        "tile {}/{}/{} ({}) {}",
        args.z,
        args.x,
        args.y,
        args.scheme.as_str(),
        what
    );
    println!("lat: {:.6}", loc.lat);
    println!("lon: {:.6}", loc.lon);
    println!("map.setView([{:.6}, {:.6}], {});", loc.lat, loc.lon, loc.view_zoom);
    Ok(())
}
