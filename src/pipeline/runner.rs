//! Run orchestration for both aggregation modes.
//!
//! ```text
//! SceneSequence ──▶ load (retry) ──▶ transforms ──▶ reduce ──▶ reorder ──▶ table
//!                                         │
//!                                         └──▶ clip/resample ──▶ sink (export)
//! ```
//!
//! Archive loads and sink writes run on the async executor; transforms,
//! reductions and export preparation run in `spawn_blocking` so per-pixel
//! work never stalls I/O.

use super::export::{ExportHandle, Exporter, ZarrSceneSink};
use super::metrics::{Metrics, MetricsReporter, MetricsSnapshot};
use super::reorder::ReorderBuffer;
use super::report::{Failure, RunReport};
use super::{AggregateRecord, Reducer};
use crate::archive::{filter, Archive, RetryPolicy, SceneRef, SceneSequence};
use crate::config::{Config, Mode};
use crate::error::FailureKind;
use crate::io::{self, TableColumns, TableWriter};
use crate::scene::Scene;
use crate::transform::TransformSpec;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use object_store::ObjectStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};

/// Receiving side of a stop signal.
#[derive(Debug, Clone)]
pub struct StopToken(watch::Receiver<bool>);

impl StopToken {
    /// A token that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }
}

/// Create a stop signal. Sending `true` stops the run after the in-flight
/// batch.
pub fn stop_signal() -> (watch::Sender<bool>, StopToken) {
    let (tx, rx) = watch::channel(false);
    (tx, StopToken(rx))
}

/// Everything a run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// Statistic mode rows, in archive order
    pub records: Vec<AggregateRecord>,
    /// Export mode artifacts, in archive order
    pub exports: Vec<ExportHandle>,
    pub report: RunReport,
    pub metrics: MetricsSnapshot,
    /// Table paths or export destinations
    pub written: Vec<String>,
}

/// Drives scenes from a sequence through transforms into an aggregator.
pub struct Runner {
    sequence: SceneSequence,
    transforms: Arc<TransformSpec>,
    concurrency: usize,
    metrics: Arc<Metrics>,
    stop: StopToken,
}

impl Runner {
    pub fn new(sequence: SceneSequence, transforms: TransformSpec, concurrency: usize) -> Self {
        Self {
            sequence,
            transforms: Arc::new(transforms),
            concurrency: concurrency.max(1),
            metrics: Metrics::new(),
            stop: StopToken::never(),
        }
    }

    pub fn with_stop(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }

    pub fn sequence(&self) -> &SceneSequence {
        &self.sequence
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Reduce every scene to a record.
    ///
    /// Scenes are processed in batches of `concurrency`; results complete in
    /// any order and are released in archive order. A stop signal is checked
    /// before each batch.
    pub async fn run_statistic(&self, refs: Vec<SceneRef>, reducer: Reducer) -> RunOutcome {
        let reducer = Arc::new(reducer);
        let mut report = RunReport::new(refs.len());
        let mut records = Vec::with_capacity(refs.len());
        let mut reorder = ReorderBuffer::new();

        let indexed: Vec<(usize, SceneRef)> = refs.into_iter().enumerate().collect();

        for batch in indexed.chunks(self.concurrency) {
            if self.stop.is_stopped() {
                tracing::warn!("Stop requested, not starting {} remaining scenes", report.matched - report.attempted);
                report.cancelled = true;
                break;
            }

            let mut completed = stream::iter(batch.iter().cloned())
                .map(|(index, scene_ref)| {
                    let reducer = reducer.clone();
                    async move { (index, self.statistic_for(scene_ref, reducer).await) }
                })
                .buffer_unordered(self.concurrency);

            while let Some((index, result)) = completed.next().await {
                for ready in reorder.push(index, result) {
                    match ready {
                        Ok(record) => {
                            if record.statistic_value.is_none() {
                                self.metrics.add_null_record();
                            }
                            self.metrics.add_scene_succeeded();
                            report.record_success();
                            records.push(record);
                        }
                        Err(failure) => {
                            self.metrics.add_scene_failed();
                            report.record_failure(failure);
                        }
                    }
                }
            }
        }

        if reorder.pending() > 0 {
            tracing::warn!("{} results never became contiguous", reorder.pending());
        }

        RunOutcome {
            records,
            exports: Vec::new(),
            report,
            metrics: self.metrics.snapshot(),
            written: Vec::new(),
        }
    }

    async fn statistic_for(&self, scene_ref: SceneRef, reducer: Arc<Reducer>) -> Result<AggregateRecord, Failure> {
        let scene = load_scene(&self.sequence, &scene_ref, &self.metrics).await?;
        let transforms = self.transforms.clone();
        let metrics = self.metrics.clone();

        run_blocking(&scene_ref.id, move || {
            let start = Instant::now();
            let transformed = transforms.apply(&scene).map_err(|e| scene_failure(&scene, &e))?;
            metrics.add_transform_time(start.elapsed());

            let start = Instant::now();
            let record = reducer.record(&transformed).map_err(|e| scene_failure(&scene, &e))?;
            metrics.add_reduce_time(start.elapsed());
            Ok(record)
        })
        .await
    }

    /// Export every scene through `exporter`.
    ///
    /// `concurrency` workers share a queue; each checks the stop signal before
    /// taking the next scene, so nothing new starts once it fires. Scenes
    /// whose artifact name is already claimed by an earlier scene fail
    /// without being loaded.
    pub async fn run_export(&self, refs: Vec<SceneRef>, exporter: Arc<Exporter>) -> RunOutcome {
        let mut report = RunReport::new(refs.len());
        let ids: Vec<String> = refs.iter().map(|r| r.id.clone()).collect();
        let mut results: Vec<(usize, Result<ExportHandle, Failure>)> = Vec::new();

        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut queued = Vec::with_capacity(refs.len());
        for (index, scene_ref) in refs.into_iter().enumerate() {
            let name = exporter.name_for(scene_ref.date());
            match claimed.get(&name) {
                Some(owner) => {
                    self.metrics.add_scene_failed();
                    let message = format!("destination {} already claimed by {}", name, owner);
                    results.push((index, Err(Failure::new(&scene_ref.id, FailureKind::ExportFailure, message))));
                }
                None => {
                    claimed.insert(name, scene_ref.id.clone());
                    queued.push((index, scene_ref));
                }
            }
        }

        let (work_tx, work_rx) = async_channel::bounded::<(usize, SceneRef)>(queued.len().max(1));
        for item in queued {
            let _ = work_tx.send(item).await;
        }
        work_tx.close();

        let (result_tx, result_rx) = async_channel::unbounded::<(usize, Result<ExportHandle, Failure>)>();

        let mut handles = Vec::with_capacity(self.concurrency);
        for _ in 0..self.concurrency {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let sequence = self.sequence.clone();
            let transforms = self.transforms.clone();
            let exporter = exporter.clone();
            let metrics = self.metrics.clone();
            let stop = self.stop.clone();

            handles.push(tokio::spawn(async move {
                while let Ok((index, scene_ref)) = work_rx.recv().await {
                    if stop.is_stopped() {
                        return true;
                    }

                    let task = {
                        let sequence = sequence.clone();
                        let transforms = transforms.clone();
                        let exporter = exporter.clone();
                        let metrics = metrics.clone();
                        let scene_ref = scene_ref.clone();
                        tokio::spawn(async move {
                            export_one(&sequence, &transforms, &exporter, &metrics, &scene_ref).await
                        })
                    };
                    let result = match task.await {
                        Ok(result) => result,
                        Err(e) => Err(Failure::new(&scene_ref.id, FailureKind::Internal, e)),
                    };

                    match &result {
                        Ok(_) => metrics.add_scene_succeeded(),
                        Err(_) => metrics.add_scene_failed(),
                    }
                    if result_tx.send((index, result)).await.is_err() {
                        break;
                    }
                }
                false
            }));
        }
        drop(result_tx);

        while let Ok(item) = result_rx.recv().await {
            results.push(item);
        }
        for handle in handles {
            match handle.await {
                Ok(stopped) => report.cancelled |= stopped,
                Err(e) => tracing::error!("Export worker panicked: {}", e),
            }
        }

        // Anything neither reported nor skipped by a stop was lost with its worker
        if !report.cancelled {
            let reported: HashSet<usize> = results.iter().map(|(index, _)| *index).collect();
            for (index, id) in ids.iter().enumerate() {
                if !reported.contains(&index) {
                    self.metrics.add_scene_failed();
                    let failure = Failure::new(id, FailureKind::Internal, "export worker exited before reporting");
                    results.push((index, Err(failure)));
                }
            }
        }
        results.sort_by_key(|(index, _)| *index);

        let mut exports = Vec::new();
        for (_, result) in results {
            match result {
                Ok(handle) => {
                    report.record_success();
                    exports.push(handle);
                }
                Err(failure) => report.record_failure(failure),
            }
        }

        if report.cancelled {
            tracing::warn!("Stop requested, {} scenes were not exported", report.skipped());
        }

        let written = exports.iter().map(|h| h.destination.clone()).collect();
        RunOutcome {
            records: Vec::new(),
            exports,
            report,
            metrics: self.metrics.snapshot(),
            written,
        }
    }
}

async fn load_scene(sequence: &SceneSequence, scene_ref: &SceneRef, metrics: &Metrics) -> Result<Scene, Failure> {
    let start = Instant::now();
    let scene = sequence
        .load(scene_ref)
        .await
        .map_err(|e| Failure::new(&scene_ref.id, FailureKind::from(&e), e))?;
    metrics.add_load_time(start.elapsed());
    metrics.add_scene_loaded();
    Ok(scene)
}

async fn export_one(
    sequence: &SceneSequence,
    transforms: &Arc<TransformSpec>,
    exporter: &Arc<Exporter>,
    metrics: &Arc<Metrics>,
    scene_ref: &SceneRef,
) -> Result<ExportHandle, Failure> {
    let scene = load_scene(sequence, scene_ref, metrics).await?;

    let prepared = {
        let transforms = transforms.clone();
        let exporter = exporter.clone();
        let metrics = metrics.clone();
        run_blocking(&scene_ref.id, move || {
            let start = Instant::now();
            let transformed = transforms.apply(&scene).map_err(|e| scene_failure(&scene, &e))?;
            let prepared = exporter
                .prepare(&transformed)
                .map_err(|e| Failure::new(scene.id(), FailureKind::ExportFailure, e))?;
            metrics.add_transform_time(start.elapsed());
            Ok(prepared)
        })
        .await?
    };

    let start = Instant::now();
    let handle = exporter
        .write(&scene_ref.id, &prepared)
        .await
        .map_err(|e| Failure::new(&scene_ref.id, FailureKind::ExportFailure, e))?;
    metrics.add_export_time(start.elapsed());
    metrics.add_bytes_exported(handle.bytes);
    Ok(handle)
}

fn scene_failure(scene: &Scene, error: &crate::error::SceneError) -> Failure {
    Failure::new(scene.id(), FailureKind::from(error), error)
}

/// Run CPU-bound scene work off the async executor.
async fn run_blocking<T, F>(scene_id: &str, work: F) -> Result<T, Failure>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, Failure> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) => Err(Failure::new(scene_id, FailureKind::Internal, e)),
    }
}

/// Run the configured pipeline end to end.
///
/// Queries `archive`, processes every matching scene, and writes the table
/// (statistic mode) or one artifact per scene (export mode) to `output`.
/// Archive query failures abort the run; per-scene failures are reported.
pub async fn run(
    config: &Config,
    archive: Arc<dyn Archive>,
    output: Arc<dyn ObjectStore>,
    stop: StopToken,
) -> Result<RunOutcome> {
    let region = config.filter.region()?;
    let range = config.filter.time_range()?;
    let sequence = filter(
        archive,
        config.archive.product.clone(),
        range,
        region.clone(),
        RetryPolicy::from(&config.processing),
    );

    let transforms = config.transform_spec();
    tracing::info!("Transforms: {:?}", transforms.names());

    let runner = Runner::new(sequence, transforms, config.processing.concurrency).with_stop(stop);
    let refs = runner.sequence().refs().await.context("Archive query failed")?;

    let (shutdown_tx, reporter_handle) = if config.processing.enable_metrics {
        let (tx, rx) = mpsc::channel::<()>(1);
        let reporter = MetricsReporter::new(
            runner.metrics().clone(),
            config.processing.metrics_interval_secs,
            refs.len() as u64,
        );
        (Some(tx), Some(tokio::spawn(reporter.run(rx))))
    } else {
        (None, None)
    };

    let prefix = io::store_prefix(&config.output).to_string();
    let mut outcome = match config.mode {
        Mode::Statistic => {
            let reducer = Reducer {
                region,
                band: config.statistic.band.clone(),
                kind: config.statistic.kind,
                valid_range: config.statistic.valid_range,
                source_label: config.statistic.source_label.clone(),
            };
            runner.run_statistic(refs, reducer).await
        }
        Mode::Export => {
            let root = io::join_path(&[&prefix, &config.export.folder]).to_string();
            let sink = Arc::new(ZarrSceneSink::new(output.clone(), root, config.export.compression_level));
            let exporter = Exporter::new(
                region,
                Some(config.export.resample_target()?),
                config.export.prefix.clone(),
                sink,
            );
            runner.run_export(refs, Arc::new(exporter)).await
        }
    };

    if config.mode == Mode::Statistic && !outcome.report.cancelled {
        let writer = TableWriter::new(
            output,
            prefix,
            config.statistic.folder.clone(),
            config.statistic.description.clone(),
            TableColumns {
                value: config.statistic.value_column.clone(),
                label: config.statistic.label_column.clone(),
            },
        );
        let paths = writer
            .write(&outcome.records, &config.statistic.formats)
            .await
            .with_context(|| format!("Failed to write table after run ({})", outcome.report))?;
        outcome.written = paths.iter().map(|p| p.to_string()).collect();
    }

    if let Some(tx) = shutdown_tx {
        let _ = tx.send(()).await;
    }
    if let Some(handle) = reporter_handle {
        let _ = handle.await;
    }

    outcome.metrics = runner.metrics().snapshot();
    if let Some(path) = &config.processing.metrics_output_path {
        outcome.metrics.save_to_file(path)?;
    }

    tracing::info!("Run complete: {}", outcome.report);
    Ok(outcome)
}
