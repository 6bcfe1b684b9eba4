//! Progress monitoring and run metrics.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Counters shared by all pipeline workers.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Scenes loaded from the archive
    pub scenes_loaded: AtomicU64,

    /// Scenes that produced a record or an export
    pub scenes_succeeded: AtomicU64,

    /// Scenes that failed at any stage
    pub scenes_failed: AtomicU64,

    /// Records with no statistic value
    pub null_records: AtomicU64,

    /// Bytes of exported band data
    pub bytes_exported: AtomicU64,

    start_time: Option<Instant>,

    // Per-stage timing in microseconds, summed across workers
    pub load_us: AtomicU64,
    pub transform_us: AtomicU64,
    pub reduce_us: AtomicU64,
    pub export_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    pub fn add_scene_loaded(&self) {
        self.scenes_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_scene_succeeded(&self) {
        self.scenes_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_scene_failed(&self) {
        self.scenes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_null_record(&self) {
        self.null_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_exported(&self, bytes: u64) {
        self.bytes_exported.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_load_time(&self, duration: Duration) {
        self.load_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_transform_time(&self, duration: Duration) {
        self.transform_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_reduce_time(&self, duration: Duration) {
        self.reduce_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_export_time(&self, duration: Duration) {
        self.export_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Finished scenes (succeeded or failed) per second.
    pub fn scenes_per_second(&self) -> f64 {
        let done = self.scenes_succeeded.load(Ordering::Relaxed) + self.scenes_failed.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            done as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let secs = |c: &AtomicU64| c.load(Ordering::Relaxed) as f64 / 1_000_000.0;

        MetricsSnapshot {
            scenes_loaded: self.scenes_loaded.load(Ordering::Relaxed),
            scenes_succeeded: self.scenes_succeeded.load(Ordering::Relaxed),
            scenes_failed: self.scenes_failed.load(Ordering::Relaxed),
            null_records: self.null_records.load(Ordering::Relaxed),
            bytes_exported: self.bytes_exported.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            scenes_per_second: self.scenes_per_second(),
            load_secs: secs(&self.load_us),
            transform_secs: secs(&self.transform_us),
            reduce_secs: secs(&self.reduce_us),
            export_secs: secs(&self.export_us),
        }
    }
}

/// Metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub scenes_loaded: u64,
    pub scenes_succeeded: u64,
    pub scenes_failed: u64,
    pub null_records: u64,
    pub bytes_exported: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub scenes_per_second: f64,
    /// Time waiting on the archive (seconds, summed across workers)
    pub load_secs: f64,
    pub transform_secs: f64,
    pub reduce_secs: f64,
    pub export_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }

    fn stage_shares(&self) -> [f64; 4] {
        let stages = [self.load_secs, self.transform_secs, self.reduce_secs, self.export_secs];
        let total: f64 = stages.iter().sum();
        if total > 0.0 {
            stages.map(|s| s / total * 100.0)
        } else {
            [0.0; 4]
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [load, transform, reduce, export] = self.stage_shares();

        write!(
            f,
            "Scenes: {} loaded, {} ok, {} failed, {} null | Exported: {:.1} MB | \
             Rate: {:.1} scenes/s | Elapsed: {:.1}s | \
             Time: load {:.0}% transform {:.0}% reduce {:.0}% export {:.0}%",
            self.scenes_loaded,
            self.scenes_succeeded,
            self.scenes_failed,
            self.null_records,
            self.bytes_exported as f64 / (1024.0 * 1024.0),
            self.scenes_per_second,
            self.elapsed.as_secs_f64(),
            load,
            transform,
            reduce,
            export,
        )
    }
}

/// Periodic progress reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_scenes: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_scenes: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_scenes,
        }
    }

    /// Log progress every interval until `shutdown` fires.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let progress = if self.total_scenes > 0 {
                        (snapshot.scenes_succeeded + snapshot.scenes_failed) as f64
                            / self.total_scenes as f64
                            * 100.0
                    } else {
                        0.0
                    };

                    tracing::info!("[{:.1}%] {}", progress, snapshot);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Final: {}", self.metrics.snapshot());
                    break;
                }
            }
        }
    }
}
