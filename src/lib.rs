//! Raster Series
//!
//! Extract a per-scene index time series (or one clipped raster per scene)
//! from a timestamped scene archive.
//!
//! # Architecture
//!
//! - **Scene**: scenes, regions, time ranges and grids
//! - **Archive**: scene catalogs, filtering, retries
//! - **Transform**: QA masking, normalized-difference indices, clip, resample
//! - **Pipeline**: statistic reduction or per-scene export, with ordering,
//!   cancellation, metrics and run reports
//! - **I/O**: object stores, per-scene Zarr groups, CSV/JSON tables
//!
//! # Usage
//!
//! ```no_run
//! use raster_series::{pipeline::stop_signal, run_pipeline, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let (_stop, token) = stop_signal();
//!     let outcome = run_pipeline(config, token).await?;
//!     println!("{}", outcome.report);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod crs;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod scene;
pub mod transform;

pub use archive::{Archive, InMemoryArchive, SceneRef, ZarrArchive};
pub use config::{Config, Mode};
pub use error::{ArchiveError, ExportError, FailureKind, SceneError};
pub use pipeline::{AggregateRecord, RunOutcome, RunReport, StopToken};
pub use scene::{Region, Scene, TimeRange};

use anyhow::{Context, Result};
use std::sync::Arc;

/// Run the configured pipeline against the configured archive and output.
pub async fn run_pipeline(config: Config, stop: StopToken) -> Result<RunOutcome> {
    config.validate()?;

    tracing::info!("Starting raster-series in {} mode", config.mode);
    tracing::info!(
        "Archive: {} ({:?}), product '{}'",
        config.archive.location.path_display(),
        config.archive.kind,
        config.archive.product
    );

    let archive = ZarrArchive::from_config(&config.archive).context("Failed to open scene archive")?;

    let output = io::create_store(&config.output)?;
    tracing::info!("Writing output to: {}", config.output.path_display());

    pipeline::run(&config, Arc::new(archive), output, stop).await
}

/// List the scenes a configuration would process, without loading them.
pub async fn inspect(config: &Config) -> Result<Vec<SceneRef>> {
    let archive = ZarrArchive::from_config(&config.archive).context("Failed to open scene archive")?;

    let sequence = archive::filter(
        Arc::new(archive),
        config.archive.product.clone(),
        config.filter.time_range()?,
        config.filter.region()?,
        archive::RetryPolicy::from(&config.processing),
    );
    Ok(sequence.refs().await?)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

/// Initialize the Rayon thread pool.
pub fn init_rayon(threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    Ok(())
}
