//! Configuration for the raster time-series pipeline.

use crate::error::SceneError;
use crate::pipeline::StatisticKind;
use crate::scene::{Region, TimeRange};
use crate::transform::{NormalizedDifference, QaMask, ResampleTarget, Select, TransformSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Aggregation mode
    #[serde(default)]
    pub mode: Mode,

    /// Where scenes come from
    pub archive: ArchiveConfig,

    /// Region and dates to select
    pub filter: FilterConfig,

    /// QA cloud mask
    #[serde(default)]
    pub mask: MaskConfig,

    /// Normalized-difference index
    #[serde(default)]
    pub index: IndexConfig,

    /// Statistic-mode settings
    #[serde(default)]
    pub statistic: StatisticConfig,

    /// Export-mode settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Where tables and exported rasters are written
    pub output: StoreLocation,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Aggregation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// One table row per scene
    #[default]
    Statistic,
    /// One clipped raster per scene
    Export,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Statistic => f.write_str("statistic"),
            Mode::Export => f.write_str("export"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "statistic" | "stats" | "table" => Ok(Mode::Statistic),
            "export" | "raster" => Ok(Mode::Export),
            other => anyhow::bail!("Unknown mode '{}': expected 'statistic' or 'export'", other),
        }
    }
}

/// A local directory or an S3 bucket + prefix.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreLocation {
    /// Local filesystem directory. Mutually exclusive with bucket/prefix.
    #[serde(default)]
    pub local_path: Option<String>,

    /// S3 bucket (required if local_path is not set)
    #[serde(default)]
    pub bucket: Option<String>,

    /// S3 key prefix
    #[serde(default)]
    pub prefix: Option<String>,
}

impl StoreLocation {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            local_path: Some(path.into()),
            bucket: None,
            prefix: None,
        }
    }

    pub fn is_local(&self) -> bool {
        self.local_path.is_some()
    }

    /// Local path or s3:// URI for display.
    pub fn path_display(&self) -> String {
        if let Some(path) = &self.local_path {
            path.clone()
        } else {
            format!(
                "s3://{}/{}",
                self.bucket.as_deref().unwrap_or(""),
                self.prefix.as_deref().unwrap_or("")
            )
        }
    }

    pub fn validate(&self, section: &str) -> anyhow::Result<()> {
        match (&self.local_path, &self.bucket) {
            (Some(_), Some(_)) => anyhow::bail!("{}: cannot specify both local_path and bucket", section),
            (None, None) => anyhow::bail!("{}: must specify either local_path or bucket", section),
            _ => Ok(()),
        }
    }
}

/// Kind of scene archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    /// Parquet catalog listing per-scene Zarr groups
    #[default]
    Catalog,
    /// A directory of previously exported scenes, dated by name
    Exports,
}

/// Scene archive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub kind: ArchiveKind,

    /// Store holding the catalog and scene groups
    #[serde(flatten)]
    pub location: StoreLocation,

    /// Catalog path relative to the store root
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,

    /// Product (collection) to query
    #[serde(default = "default_product")]
    pub product: String,

    /// Name prefix of exported scenes (kind = exports)
    #[serde(default = "default_export_prefix")]
    pub export_prefix: String,
}

/// Region and time range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Polygon vertices as [lon, lat]; a closing vertex is optional
    #[serde(default = "default_region")]
    pub region: Vec<[f64; 2]>,

    /// Inclusive start date (YYYY-MM-DD)
    #[serde(default = "default_start_date")]
    pub start_date: String,

    /// Exclusive end date (YYYY-MM-DD)
    #[serde(default = "default_end_date")]
    pub end_date: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            start_date: default_start_date(),
            end_date: default_end_date(),
        }
    }
}

impl FilterConfig {
    pub fn region(&self) -> Result<Region, SceneError> {
        Region::new(&self.region)
    }

    pub fn time_range(&self) -> Result<TimeRange, SceneError> {
        TimeRange::parse(&self.start_date, &self.end_date)
    }
}

/// QA mask settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_qa_band")]
    pub qa_band: String,

    /// Bits of the QA value that are inspected
    #[serde(default = "default_bit_mask")]
    pub bit_mask: u32,

    /// Value of the inspected bits that means "clear"
    #[serde(default)]
    pub clear_value: u32,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            qa_band: default_qa_band(),
            bit_mask: default_bit_mask(),
            clear_value: 0,
        }
    }
}

/// Normalized-difference settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_band_a")]
    pub band_a: String,

    #[serde(default = "default_band_b")]
    pub band_b: String,

    #[serde(default = "default_index_name")]
    pub output: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            band_a: default_band_a(),
            band_b: default_band_b(),
            output: default_index_name(),
        }
    }
}

/// Table output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableFormat {
    Csv,
    Json,
}

/// Statistic-mode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticConfig {
    /// Band to reduce
    #[serde(default = "default_index_name")]
    pub band: String,

    #[serde(default)]
    pub kind: StatisticKind,

    /// Values outside [min, max] are ignored
    #[serde(default)]
    pub valid_range: Option<[f64; 2]>,

    /// Label written to every row
    #[serde(default = "default_source_label")]
    pub source_label: String,

    /// Table file stem
    #[serde(default = "default_description")]
    pub description: String,

    /// Folder under the output store
    #[serde(default = "default_table_folder")]
    pub folder: String,

    #[serde(default = "default_value_column")]
    pub value_column: String,

    #[serde(default = "default_label_column")]
    pub label_column: String,

    #[serde(default = "default_formats")]
    pub formats: Vec<TableFormat>,
}

impl Default for StatisticConfig {
    fn default() -> Self {
        Self {
            band: default_index_name(),
            kind: StatisticKind::default(),
            valid_range: None,
            source_label: default_source_label(),
            description: default_description(),
            folder: default_table_folder(),
            value_column: default_value_column(),
            label_column: default_label_column(),
            formats: default_formats(),
        }
    }
}

/// Export-mode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Artifact name prefix; names are `{prefix}_{yyyy_MM_dd}`
    #[serde(default = "default_export_prefix")]
    pub prefix: String,

    /// Folder under the output store
    #[serde(default = "default_raster_folder")]
    pub folder: String,

    /// Output CRS
    #[serde(default = "default_export_crs")]
    pub crs: String,

    /// Ground sample distance in metres
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Bands kept in each artifact; empty keeps all
    #[serde(default = "default_export_bands")]
    pub bands: Vec<String>,

    /// Compression level (0-22 for zstd)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            prefix: default_export_prefix(),
            folder: default_raster_folder(),
            crs: default_export_crs(),
            scale: default_scale(),
            bands: default_export_bands(),
            compression_level: default_compression_level(),
        }
    }
}

impl ExportConfig {
    /// Resample target in CRS units.
    ///
    /// `scale` is metres; geographic CRSs get it converted to degrees at the
    /// equator.
    pub fn resample_target(&self) -> Result<ResampleTarget, SceneError> {
        let resolution = if crate::crs::is_wgs84(&self.crs) {
            self.scale / METRES_PER_DEGREE
        } else {
            self.scale
        };
        ResampleTarget::new(self.crs.clone(), resolution)
    }
}

/// Metres per degree of longitude at the equator (WGS84).
pub const METRES_PER_DEGREE: f64 = 111_319.490_793_273_57;

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Scenes processed concurrently (batch size)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Rayon thread pool size for CPU-bound work
    #[serde(default)]
    pub rayon_threads: Option<usize>,

    /// Per archive-call timeout; none by default
    #[serde(default)]
    pub archive_timeout_secs: Option<u64>,

    /// Retry configuration for archive calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Enable metrics reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            worker_threads: None,
            rayon_threads: None,
            archive_timeout_secs: None,
            retry: RetryConfig::default(),
            enable_metrics: true,
            metrics_interval_secs: default_metrics_interval(),
            metrics_output_path: None,
        }
    }
}

/// Retry configuration for transient archive failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts after the first call
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sample configuration for the Kanha MODIS NDVI series.
    pub fn sample() -> Self {
        Self {
            mode: Mode::Statistic,
            archive: ArchiveConfig {
                kind: ArchiveKind::Catalog,
                location: StoreLocation::local("./archive"),
                catalog_path: default_catalog_path(),
                product: default_product(),
                export_prefix: default_export_prefix(),
            },
            filter: FilterConfig::default(),
            mask: MaskConfig::default(),
            index: IndexConfig::default(),
            statistic: StatisticConfig::default(),
            export: ExportConfig::default(),
            output: StoreLocation::local("./output"),
            processing: ProcessingConfig::default(),
        }
    }

    /// Ordered per-scene transforms implied by this configuration.
    pub fn transform_spec(&self) -> TransformSpec {
        let mut spec = TransformSpec::new();
        if self.mask.enabled {
            spec = spec.then(QaMask::new(&self.mask.qa_band, self.mask.bit_mask, self.mask.clear_value));
        }
        if self.index.enabled {
            spec = spec.then(NormalizedDifference::new(&self.index.band_a, &self.index.band_b, &self.index.output));
        }
        if self.mode == Mode::Export && !self.export.bands.is_empty() {
            spec = spec.then(Select::new(self.export.bands.iter().cloned()));
        }
        spec
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.archive.location.validate("archive")?;
        self.output.validate("output")?;

        self.filter.region()?;
        self.filter.time_range()?;

        if self.mask.enabled && self.mask.clear_value & !self.mask.bit_mask != 0 {
            anyhow::bail!(
                "mask.clear_value {:#b} has bits outside mask.bit_mask {:#b}",
                self.mask.clear_value,
                self.mask.bit_mask
            );
        }
        if self.index.enabled && self.index.band_a == self.index.band_b {
            anyhow::bail!("index.band_a and index.band_b must differ");
        }
        if let Some([min, max]) = self.statistic.valid_range {
            if !(min <= max) {
                anyhow::bail!("statistic.valid_range must be [min, max] with min <= max");
            }
        }
        if self.statistic.formats.is_empty() {
            anyhow::bail!("statistic.formats must name at least one format");
        }
        if self.statistic.description.is_empty() || self.export.prefix.is_empty() {
            anyhow::bail!("statistic.description and export.prefix must not be empty");
        }
        self.export.resample_target()?;
        if self.export.compression_level < 0 || self.export.compression_level > 22 {
            anyhow::bail!("Compression level must be 0-22 for zstd");
        }
        if self.processing.concurrency == 0 {
            anyhow::bail!("Concurrency must be > 0");
        }
        if self.processing.archive_timeout_secs == Some(0) {
            anyhow::bail!("archive_timeout_secs must be > 0 when set");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_catalog_path() -> String { "catalog.parquet".to_string() }
fn default_product() -> String { "MODIS/061/MOD09A1".to_string() }
fn default_export_prefix() -> String { "MODIS_NDVI".to_string() }
fn default_region() -> Vec<[f64; 2]> { vec![[80.53, 22.05], [81.2, 22.05], [81.2, 22.45], [80.53, 22.45], [80.53, 22.05]] }
fn default_start_date() -> String { "2010-02-01".to_string() }
fn default_end_date() -> String { "2011-06-30".to_string() }
fn default_true() -> bool { true }
fn default_qa_band() -> String { "StateQA".to_string() }
fn default_bit_mask() -> u32 { 0b11 }
fn default_band_a() -> String { "sur_refl_b02".to_string() }
fn default_band_b() -> String { "sur_refl_b01".to_string() }
fn default_index_name() -> String { "NDVI".to_string() }
fn default_source_label() -> String { "MODIS".to_string() }
fn default_description() -> String { "MODIS_NDVI_2010_2011".to_string() }
fn default_table_folder() -> String { "GEE_Exports".to_string() }
fn default_value_column() -> String { "statistic_value".to_string() }
fn default_label_column() -> String { "source_label".to_string() }
fn default_formats() -> Vec<TableFormat> { vec![TableFormat::Csv] }
fn default_raster_folder() -> String { "MODIS_NDVI_TIFS".to_string() }
fn default_export_crs() -> String { "EPSG:4326".to_string() }
fn default_scale() -> f64 { 500.0 }
fn default_export_bands() -> Vec<String> { vec!["NDVI".to_string()] }
fn default_compression_level() -> i32 { 3 }
fn default_concurrency() -> usize { 16 }
fn default_metrics_interval() -> u64 { 10 }
fn default_max_retries() -> usize { 3 }
fn default_initial_backoff_ms() -> u64 { 100 }
fn default_max_backoff_ms() -> u64 { 10000 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_is_valid() {
        let config = Config::sample();
        assert!(config.validate().is_ok());
        assert_eq!(config.processing.archive_timeout_secs, None);
        assert_eq!(config.mask.bit_mask, 0b11);
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
archive:
  local_path: /data/modis
filter: {}
output:
  local_path: /tmp/out
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.mode, Mode::Statistic);
        assert_eq!(config.archive.kind, ArchiveKind::Catalog);
        assert_eq!(config.archive.location.local_path.as_deref(), Some("/data/modis"));
        assert_eq!(config.filter.start_date, "2010-02-01");
        assert_eq!(config.statistic.description, "MODIS_NDVI_2010_2011");
        assert_eq!(config.export.prefix, "MODIS_NDVI");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let json = serde_json::to_string(&Config::sample()).unwrap();
        let config = Config::from_json(&json).unwrap();
        assert_eq!(config.statistic.kind, StatisticKind::Mean);
        assert_eq!(config.filter.region.len(), 5);
    }

    #[test]
    fn test_validation_rejects_bad_output() {
        let mut config = Config::sample();
        config.output.bucket = Some("bucket".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::sample();
        config.output.local_path = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_filter() {
        let mut config = Config::sample();
        config.filter.end_date = "2010-01-01".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::sample();
        config.filter.region = vec![[0.0, 0.0], [1.0, 1.0]];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_clear_value_outside_mask() {
        let mut config = Config::sample();
        config.mask.clear_value = 0b100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_timeout_and_concurrency() {
        let mut config = Config::sample();
        config.processing.archive_timeout_secs = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::sample();
        config.processing.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_transform_spec_by_mode() {
        let mut config = Config::sample();
        assert_eq!(config.transform_spec().names(), vec!["qa_mask", "normalized_difference"]);

        config.mode = Mode::Export;
        assert_eq!(
            config.transform_spec().names(),
            vec!["qa_mask", "normalized_difference", "select"]
        );

        config.mask.enabled = false;
        config.export.bands.clear();
        assert_eq!(config.transform_spec().names(), vec!["normalized_difference"]);
    }

    #[test]
    fn test_export_scale_in_degrees_for_wgs84() {
        let target = ExportConfig::default().resample_target().unwrap();
        assert!((target.resolution - 500.0 / METRES_PER_DEGREE).abs() < 1e-12);

        let utm = ExportConfig {
            crs: "EPSG:32644".to_string(),
            ..ExportConfig::default()
        };
        assert_eq!(utm.resample_target().unwrap().resolution, 500.0);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("export".parse::<Mode>().unwrap(), Mode::Export);
        assert_eq!("Statistic".parse::<Mode>().unwrap(), Mode::Statistic);
        assert!("plot".parse::<Mode>().is_err());
    }
}
