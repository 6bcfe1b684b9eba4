//! Write aggregate records as CSV and JSON tables.

use crate::config::TableFormat;
use crate::io::store::join_path;
use crate::pipeline::AggregateRecord;
use anyhow::{Context, Result};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Column names of the value and label columns.
#[derive(Debug, Clone)]
pub struct TableColumns {
    pub value: String,
    pub label: String,
}

impl Default for TableColumns {
    fn default() -> Self {
        Self {
            value: "statistic_value".to_string(),
            label: "source_label".to_string(),
        }
    }
}

impl TableColumns {
    fn header(&self) -> [&str; 6] {
        ["date", "year", "month", "day", self.value.as_str(), self.label.as_str()]
    }
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Render records as CSV. A null value is an empty cell.
pub fn to_csv(records: &[AggregateRecord], columns: &TableColumns) -> String {
    let mut out = String::new();
    let header: Vec<String> = columns.header().iter().map(|h| csv_field(h)).collect();
    out.push_str(&header.join(","));
    out.push('\n');

    for r in records {
        let value = r.statistic_value.map(|v| v.to_string()).unwrap_or_default();
        let row = [
            csv_field(&r.date),
            csv_field(&r.year),
            csv_field(&r.month),
            csv_field(&r.day),
            value,
            csv_field(&r.source_label),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

/// Render records as a JSON array of row objects.
pub fn to_json(records: &[AggregateRecord], columns: &TableColumns) -> Result<String> {
    let rows: Vec<Value> = records
        .iter()
        .map(|r| {
            let mut row = Map::new();
            row.insert("date".to_string(), Value::from(r.date.clone()));
            row.insert("year".to_string(), Value::from(r.year.clone()));
            row.insert("month".to_string(), Value::from(r.month.clone()));
            row.insert("day".to_string(), Value::from(r.day.clone()));
            row.insert(columns.value.clone(), r.statistic_value.map(Value::from).unwrap_or(Value::Null));
            row.insert(columns.label.clone(), Value::from(r.source_label.clone()));
            Value::Object(row)
        })
        .collect();

    Ok(serde_json::to_string_pretty(&rows)?)
}

/// Writes `{folder}/{description}.{csv,json}` into a store.
pub struct TableWriter {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    folder: String,
    description: String,
    columns: TableColumns,
}

impl TableWriter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
        folder: impl Into<String>,
        description: impl Into<String>,
        columns: TableColumns,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            folder: folder.into(),
            description: description.into(),
            columns,
        }
    }

    pub fn path(&self, format: TableFormat) -> Path {
        let ext = match format {
            TableFormat::Csv => "csv",
            TableFormat::Json => "json",
        };
        let file = format!("{}.{}", self.description, ext);
        join_path(&[&self.prefix, &self.folder, &file])
    }

    /// Write the table in each format. Returns the written paths.
    pub async fn write(&self, records: &[AggregateRecord], formats: &[TableFormat]) -> Result<Vec<Path>> {
        let mut written = Vec::with_capacity(formats.len());
        for &format in formats {
            let body = match format {
                TableFormat::Csv => to_csv(records, &self.columns),
                TableFormat::Json => to_json(records, &self.columns)?,
            };
            let path = self.path(format);
            self.store
                .put(&path, PutPayload::from(body.into_bytes()))
                .await
                .with_context(|| format!("Failed to write table {}", path))?;

            tracing::info!("Wrote {} rows to {}", records.len(), path);
            written.push(path);
        }
        Ok(written)
    }
}
