//! Raster Series CLI
//!
//! Per-scene index time series and clipped rasters from a scene archive.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use raster_series::config::StoreLocation;
use raster_series::pipeline::stop_signal;
use raster_series::{build_runtime, init_rayon, inspect, io, run_pipeline, Config, Mode};

#[derive(Parser)]
#[command(name = "raster-series")]
#[command(about = "Extract per-scene index time series from a scene archive", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override concurrency level
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Override the aggregation mode (statistic or export)
    #[arg(long, global = true)]
    mode: Option<Mode>,

    /// Override the output location (local directory or s3://bucket/prefix)
    #[arg(long, global = true)]
    output: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline (default if no command specified)
    Run,

    /// List matching scenes without processing them
    Inspect,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            let config = load_config(&cli)?;
            run_command(config)?;
        }

        Some(Commands::Inspect) => {
            let config = load_config(&cli)?;
            inspect_command(config)?;
        }

        Some(Commands::Validate) => {
            load_config(&cli)?;
            println!("Configuration is valid");
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

/// Load, apply CLI overrides, validate.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_file(&cli.config)?;

    if let Some(c) = cli.concurrency {
        config.processing.concurrency = c;
    }
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(output) = &cli.output {
        config.output = parse_location(output)?;
    }

    config.validate()?;
    Ok(config)
}

fn parse_location(location: &str) -> Result<StoreLocation> {
    if location.starts_with("s3://") {
        let (bucket, prefix) = io::parse_s3_uri(location)?;
        Ok(StoreLocation {
            local_path: None,
            bucket: Some(bucket.to_string()),
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
        })
    } else {
        Ok(StoreLocation::local(location))
    }
}

fn run_command(config: Config) -> Result<()> {
    init_rayon(config.processing.rayon_threads)?;

    let runtime = build_runtime(config.processing.worker_threads)?;
    let outcome = runtime.block_on(async {
        let (stop_tx, stop) = stop_signal();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing in-flight scenes");
                let _ = stop_tx.send(true);
            }
        });

        run_pipeline(config, stop).await
    })?;

    println!("\n=== Run Summary ===");
    println!("{}", outcome.report);
    for (kind, count) in outcome.report.failed_by_kind() {
        println!("  {:<20} {}", kind.to_string(), count);
    }
    println!("{}", outcome.metrics);
    for path in &outcome.written {
        println!("Wrote {}", path);
    }
    println!("===================\n");

    Ok(())
}

fn inspect_command(config: Config) -> Result<()> {
    let runtime = build_runtime(None)?;
    let refs = runtime.block_on(inspect(&config))?;

    println!("\n=== Matching Scenes ===");
    println!("Product: {}", config.archive.product);
    println!(
        "Dates: {} to {} (end exclusive)",
        config.filter.start_date, config.filter.end_date
    );
    for scene in &refs {
        println!("{}  {}  {}", scene.date(), scene.id, scene.location);
    }
    println!("Total scenes: {}", refs.len());
    println!("=======================\n");

    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let yaml = r#"# Raster Series Configuration

# statistic: one table row per scene; export: one clipped raster per scene
mode: statistic

# === ARCHIVE: Where scenes come from ===
archive:
  # catalog: parquet catalog + per-scene Zarr groups
  # exports: a folder of previously exported scenes named {prefix}_YYYY_MM_DD
  kind: catalog

  # Option 1: local directory
  local_path: "./archive"

  # Option 2: S3 (comment out local_path and uncomment these)
  # bucket: "scene-archive"
  # prefix: "modis/mod09a1"

  catalog_path: "catalog.parquet"
  product: "MODIS/061/MOD09A1"

  # Name prefix when kind = exports
  export_prefix: "MODIS_NDVI"

# === FILTER: Region and dates ===
filter:
  # Polygon as [lon, lat] vertices (Kanha Tiger Reserve)
  region:
    - [80.53, 22.05]
    - [81.2, 22.05]
    - [81.2, 22.45]
    - [80.53, 22.45]
    - [80.53, 22.05]
  # Start inclusive, end exclusive
  start_date: "2010-02-01"
  end_date: "2011-06-30"

# === MASK: QA cloud mask ===
mask:
  enabled: true
  qa_band: "StateQA"
  # A pixel is clear when (qa & bit_mask) == clear_value
  bit_mask: 3
  clear_value: 0

# === INDEX: normalized difference (band_a - band_b) / (band_a + band_b) ===
index:
  enabled: true
  band_a: "sur_refl_b02"
  band_b: "sur_refl_b01"
  output: "NDVI"

# === STATISTIC MODE ===
statistic:
  band: "NDVI"
  # mean, median, min, max, sum, count, std_dev
  kind: mean
  # Ignore values outside [min, max]
  # valid_range: [-0.3, 1.0]
  source_label: "MODIS"
  description: "MODIS_NDVI_2010_2011"
  folder: "GEE_Exports"
  value_column: "statistic_value"
  label_column: "source_label"
  formats: [csv, json]

# === EXPORT MODE ===
export:
  prefix: "MODIS_NDVI"
  folder: "MODIS_NDVI_TIFS"
  crs: "EPSG:4326"
  # Ground sample distance in metres
  scale: 500
  bands: ["NDVI"]
  compression_level: 3

# === OUTPUT: Where tables and rasters are written ===
output:
  local_path: "./output"
  # bucket: "results"
  # prefix: "kanha"

# === PROCESSING: Performance tuning ===
processing:
  # Scenes processed concurrently
  concurrency: 16

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 8

  # Rayon thread pool size for per-pixel work (null = num CPUs)
  # rayon_threads: 8

  # Per archive-call timeout in seconds (omit to wait indefinitely)
  # archive_timeout_secs: 60

  retry:
    max_retries: 3
    initial_backoff_ms: 100
    max_backoff_ms: 10000

  enable_metrics: true
  metrics_interval_secs: 10
  # metrics_output_path: "metrics.json"
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
