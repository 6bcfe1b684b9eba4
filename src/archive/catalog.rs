//! Parquet scene catalog with an R-tree over scene footprints.

use crate::error::ArchiveError;
use crate::scene::{Region, TimeRange};
use super::SceneRef;
use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, Date32Array, Float32Array, Float64Array, StringArray};
use arrow::array::{TimestampMicrosecondArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use rstar::{RTree, RTreeObject, AABB};
use std::sync::Arc;

/// One catalog row.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub scene_id: String,
    pub product: String,
    pub acquired: DateTime<Utc>,
    /// [min_lon, min_lat, max_lon, max_lat]
    pub bounds_wgs84: [f64; 4],
    /// Scene group name relative to the archive root
    pub location: String,
}

impl CatalogEntry {
    pub fn to_ref(&self) -> SceneRef {
        SceneRef {
            id: self.scene_id.clone(),
            product: self.product.clone(),
            acquired: self.acquired,
            bounds_wgs84: self.bounds_wgs84,
            location: self.location.clone(),
        }
    }
}

impl RTreeObject for CatalogEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds_wgs84[0], self.bounds_wgs84[1]],
            [self.bounds_wgs84[2], self.bounds_wgs84[3]],
        )
    }
}

/// All scenes of an archive, spatially indexed.
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    rtree: RTree<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        let rtree = RTree::bulk_load(entries.clone());
        Self { entries, rtree }
    }

    /// Load a catalog object from a store.
    ///
    /// Store failures are [`ArchiveError::Unavailable`]; unreadable contents
    /// are [`ArchiveError::Catalog`].
    pub async fn load(store: Arc<dyn ObjectStore>, path: &Path) -> Result<Self, ArchiveError> {
        let unavailable = |e: object_store::Error| ArchiveError::Unavailable(format!("catalog {}: {}", path, e));
        let bytes = store
            .get(path)
            .await
            .map_err(unavailable)?
            .bytes()
            .await
            .map_err(unavailable)?;

        Self::from_parquet_bytes(bytes).map_err(|e| ArchiveError::Catalog(format!("{}: {:#}", path, e)))
    }

    /// Load a catalog from parquet bytes.
    pub fn from_parquet_bytes(bytes: Bytes) -> Result<Self> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
        let reader = builder.build()?;

        let mut entries = Vec::new();
        for batch_result in reader {
            let batch = batch_result?;
            Self::extract_entries(&batch, &mut entries)?;
        }

        tracing::info!("Loaded {} scenes from catalog", entries.len());

        Ok(Self::new(entries))
    }

    fn extract_entries(batch: &RecordBatch, entries: &mut Vec<CatalogEntry>) -> Result<()> {
        let schema = batch.schema();

        let id_col = Self::find_column(&schema, &["scene_id", "id", "name"])?;
        let product_col = Self::find_column(&schema, &["product", "collection"]);
        let acquired_col = Self::find_column(&schema, &["acquired", "datetime", "date", "time"])?;
        let location_col = Self::find_column(&schema, &["location", "path", "group"]);

        let min_lon_col = Self::find_column(&schema, &["min_lon", "lon_min", "west"])?;
        let min_lat_col = Self::find_column(&schema, &["min_lat", "lat_min", "south"])?;
        let max_lon_col = Self::find_column(&schema, &["max_lon", "lon_max", "east"])?;
        let max_lat_col = Self::find_column(&schema, &["max_lat", "lat_max", "north"])?;

        let ids = Self::get_strings(batch.column(id_col)).context("scene_id column must be string")?;
        let products = match product_col {
            Ok(col) => Self::get_strings(batch.column(col)).context("product column must be string")?,
            Err(_) => vec![String::new(); batch.num_rows()],
        };
        // Location defaults to the scene id
        let locations = match location_col {
            Ok(col) => Self::get_strings(batch.column(col)).context("location column must be string")?,
            Err(_) => ids.clone(),
        };
        let acquired = Self::get_datetimes(batch.column(acquired_col))?;

        let min_lon = Self::get_f64_array(batch.column(min_lon_col))?;
        let min_lat = Self::get_f64_array(batch.column(min_lat_col))?;
        let max_lon = Self::get_f64_array(batch.column(max_lon_col))?;
        let max_lat = Self::get_f64_array(batch.column(max_lat_col))?;

        for i in 0..batch.num_rows() {
            entries.push(CatalogEntry {
                scene_id: ids[i].clone(),
                product: products[i].clone(),
                acquired: acquired[i],
                bounds_wgs84: [min_lon[i], min_lat[i], max_lon[i], max_lat[i]],
                location: locations[i].clone(),
            });
        }

        Ok(())
    }

    /// Find a column by checking multiple possible names.
    fn find_column(schema: &SchemaRef, names: &[&str]) -> Result<usize> {
        for name in names {
            if let Some((idx, _)) = schema.column_with_name(name) {
                return Ok(idx);
            }
        }
        anyhow::bail!("Could not find column with any of these names: {:?}", names)
    }

    fn get_strings(array: &ArrayRef) -> Result<Vec<String>> {
        let arr = array
            .as_any()
            .downcast_ref::<StringArray>()
            .context("Expected string array")?;
        Ok((0..arr.len()).map(|i| arr.value(i).to_string()).collect())
    }

    /// Get f64 values from an array (handles f32 and f64).
    fn get_f64_array(array: &ArrayRef) -> Result<Vec<f64>> {
        if let Some(arr) = array.as_any().downcast_ref::<Float64Array>() {
            Ok((0..arr.len()).map(|i| arr.value(i)).collect())
        } else if let Some(arr) = array.as_any().downcast_ref::<Float32Array>() {
            Ok((0..arr.len()).map(|i| arr.value(i) as f64).collect())
        } else {
            anyhow::bail!("Expected float array")
        }
    }

    /// Acquisition times from RFC 3339 / `YYYY-MM-DD` strings, dates or timestamps.
    fn get_datetimes(array: &ArrayRef) -> Result<Vec<DateTime<Utc>>> {
        let any = array.as_any();
        let midnight = |d: NaiveDate| d.and_hms_opt(0, 0, 0).map(|t| t.and_utc());

        let values: Option<Vec<DateTime<Utc>>> = if let Some(arr) = any.downcast_ref::<StringArray>() {
            (0..arr.len())
                .map(|i| {
                    let s = arr.value(i);
                    DateTime::parse_from_rfc3339(s)
                        .map(|t| t.with_timezone(&Utc))
                        .ok()
                        .or_else(|| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().and_then(midnight))
                })
                .collect()
        } else if let Some(arr) = any.downcast_ref::<Date32Array>() {
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).context("epoch")?;
            (0..arr.len())
                .map(|i| {
                    epoch
                        .checked_add_signed(chrono::Duration::days(arr.value(i) as i64))
                        .and_then(midnight)
                })
                .collect()
        } else if let Some(arr) = any.downcast_ref::<TimestampMillisecondArray>() {
            (0..arr.len()).map(|i| DateTime::from_timestamp_millis(arr.value(i))).collect()
        } else if let Some(arr) = any.downcast_ref::<TimestampMicrosecondArray>() {
            (0..arr.len()).map(|i| DateTime::from_timestamp_micros(arr.value(i))).collect()
        } else {
            anyhow::bail!("acquired column must be a string, date32 or timestamp");
        };

        values.context("acquired column contains an unparseable value")
    }

    /// Serialize to parquet (string ids and times, f64 bounds).
    pub fn to_parquet_bytes(&self) -> Result<Bytes> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("scene_id", DataType::Utf8, false),
            Field::new("product", DataType::Utf8, false),
            Field::new("acquired", DataType::Timestamp(TimeUnit::Millisecond, None), false),
            Field::new("min_lon", DataType::Float64, false),
            Field::new("min_lat", DataType::Float64, false),
            Field::new("max_lon", DataType::Float64, false),
            Field::new("max_lat", DataType::Float64, false),
            Field::new("location", DataType::Utf8, false),
        ]));

        let e = &self.entries;
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(e.iter().map(|x| x.scene_id.as_str()))),
            Arc::new(StringArray::from_iter_values(e.iter().map(|x| x.product.as_str()))),
            Arc::new(TimestampMillisecondArray::from_iter_values(
                e.iter().map(|x| x.acquired.timestamp_millis()),
            )),
            Arc::new(Float64Array::from_iter_values(e.iter().map(|x| x.bounds_wgs84[0]))),
            Arc::new(Float64Array::from_iter_values(e.iter().map(|x| x.bounds_wgs84[1]))),
            Arc::new(Float64Array::from_iter_values(e.iter().map(|x| x.bounds_wgs84[2]))),
            Arc::new(Float64Array::from_iter_values(e.iter().map(|x| x.bounds_wgs84[3]))),
            Arc::new(StringArray::from_iter_values(e.iter().map(|x| x.location.as_str()))),
        ];
        let batch = RecordBatch::try_new(schema.clone(), columns)?;

        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;

        Ok(Bytes::from(buf))
    }

    /// Write the catalog as parquet to `path`.
    pub async fn save(&self, store: Arc<dyn ObjectStore>, path: &Path) -> Result<()> {
        let bytes = self.to_parquet_bytes()?;
        store
            .put(path, PutPayload::from(bytes))
            .await
            .with_context(|| format!("Failed to write catalog {}", path))?;
        Ok(())
    }

    /// Entries of `product` in `range` whose footprint intersects `region`,
    /// sorted by acquisition time.
    pub fn query(&self, product: &str, range: &TimeRange, region: &Region) -> Result<Vec<SceneRef>, ArchiveError> {
        let b = region.bounds();
        let envelope = AABB::from_corners([b[0], b[1]], [b[2], b[3]]);

        let mut refs: Vec<SceneRef> = self
            .rtree
            .locate_in_envelope_intersecting(&envelope)
            .map(CatalogEntry::to_ref)
            .filter(|r| super::matches(r, product, range, region))
            .collect();

        refs.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));
        Ok(refs)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
