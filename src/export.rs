//! Exportable artifacts built from an [`AnomalyReport`].
//!
//! The merged table keeps every original column and appends a marker column
//! (`"<value> <column>"`) and the name of the triggering column, which is all
//! a renderer needs to highlight the offending cell.

use crate::processor::AnomalyReport;
use crate::table::{Column, ColumnKind, Dataset, Row, Schema, TableError, Value};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::io::{self, Write};
use thiserror::Error;

pub const MARKER_COLUMN: &str = "anomaly";
pub const SOURCE_COLUMN: &str = "anomaly_column";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// One row per merged record: original cells, then marker, then source column.
pub fn merged_table(report: &AnomalyReport<'_>) -> Result<Dataset, TableError> {
    let schema = report.dataset().schema();
    let mut columns = schema.columns().to_vec();
    columns.push(Column::new(unique_name(schema, MARKER_COLUMN), ColumnKind::Categorical));
    columns.push(Column::new(unique_name(schema, SOURCE_COLUMN), ColumnKind::Categorical));

    let rows = report
        .merged
        .iter()
        .map(|r| {
            let mut row = r.row.clone();
            row.push(Value::Text(r.marker.clone()));
            row.push(Value::Text(r.column.clone()));
            row
        })
        .collect();
    Dataset::new(Schema::new(columns)?, rows)
}

fn unique_name(schema: &Schema, base: &str) -> String {
    let mut name = base.to_string();
    while schema.index_of(&name).is_some() {
        name.push('_');
    }
    name
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub column: String,
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
    pub lower: f64,
    pub upper: f64,
    pub anomaly_count: usize,
    /// Indices into the source dataset.
    pub rows: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total_rows: usize,
    pub columns: Vec<ColumnSummary>,
    pub total_anomalies: usize,
}

impl ReportSummary {
    pub fn from_report(report: &AnomalyReport<'_>) -> Self {
        let columns = report
            .columns
            .iter()
            .map(|c| ColumnSummary {
                column: c.column.clone(),
                q1: c.stats.q1,
                q3: c.stats.q3,
                iqr: c.stats.iqr,
                lower: c.thresholds.lower,
                upper: c.thresholds.upper,
                anomaly_count: c.anomalies.len(),
                rows: c.anomalies.indices().to_vec(),
            })
            .collect();
        Self {
            total_rows: report.dataset().len(),
            columns,
            total_anomalies: report.total_anomalies(),
        }
    }
}

/// Serializes a row as an object keyed by column name, in schema order.
struct RecordRef<'a> {
    schema: &'a Schema,
    row: &'a Row,
}

impl Serialize for RecordRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.schema.len()))?;
        for (name, v) in self.schema.names().zip(self.row) {
            map.serialize_entry(name, v)?;
        }
        map.end()
    }
}

fn records(ds: &Dataset) -> impl Iterator<Item = RecordRef<'_>> {
    ds.rows().iter().map(move |row| RecordRef { schema: ds.schema(), row })
}

/// Pretty JSON array of objects.
pub fn write_json<W: Write>(mut w: W, ds: &Dataset) -> Result<(), ExportError> {
    let all: Vec<RecordRef<'_>> = records(ds).collect();
    serde_json::to_writer_pretty(&mut w, &all)?;
    writeln!(w)?;
    Ok(())
}

/// One JSON object per line.
pub fn write_json_lines<W: Write>(mut w: W, ds: &Dataset) -> Result<(), ExportError> {
    for rec in records(ds) {
        serde_json::to_writer(&mut w, &rec)?;
        writeln!(w)?;
    }
    Ok(())
}

/// Header row plus one line per row; missing cells are empty.
pub fn write_csv<W: Write>(w: W, ds: &Dataset) -> Result<(), ExportError> {
    let mut out = csv::Writer::from_writer(w);
    if !ds.schema().is_empty() {
        out.write_record(ds.schema().names())?;
    }
    for row in ds.rows() {
        out.write_record(row.iter().map(|v| v.label().unwrap_or_default()))?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_name_avoids_existing_columns() {
        let schema = Schema::new(vec![
            Column::new("anomaly", ColumnKind::Categorical),
            Column::new("anomaly_", ColumnKind::Numeric),
        ])
        .unwrap();
        assert_eq!(unique_name(&schema, MARKER_COLUMN), "anomaly__");
        assert_eq!(unique_name(&schema, SOURCE_COLUMN), "anomaly_column");
    }
}
