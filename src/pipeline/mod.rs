//! Scene aggregation: statistic tables and per-scene exports.

mod export;
mod metrics;
mod record;
mod reduce;
mod reorder;
mod report;
mod runner;


pub use export::{export_name, ExportHandle, Exporter, SceneSink, ZarrSceneSink};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use record::AggregateRecord;
pub use reduce::{reduce, Reducer, Reduction, StatisticKind};
pub use reorder::ReorderBuffer;
pub use report::{Failure, RunReport};
pub use runner::{run, stop_signal, RunOutcome, Runner, StopToken};
