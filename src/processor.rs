use crate::detector::{detect_anomalies, filter_categories, validate_opts, DetectOpts};
use crate::error::{AnomalyError, Result};
use crate::stats::{calculate_stats, ColumnStats, ThresholdPair, DEFAULT_IQR_MULTIPLIER};
use crate::table::{format_number, Dataset, DatasetView, Row};
use log::{debug, info, warn};
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct BatchOpts {
    pub multiplier: f64,
    /// Run per-column work on the rayon pool.
    pub parallel: bool,
}

impl Default for BatchOpts {
    fn default() -> Self {
        Self { multiplier: DEFAULT_IQR_MULTIPLIER, parallel: true }
    }
}

/// Outcome of detection on one column.
#[derive(Debug, Clone)]
pub struct ColumnResult<'a> {
    pub column: String,
    pub stats: ColumnStats,
    pub thresholds: ThresholdPair,
    pub anomalies: DatasetView<'a>,
}

/// One anomalous row tagged with the column that flagged it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyRecord<'a> {
    pub row_index: usize,
    pub row: &'a Row,
    pub column: String,
    pub value: f64,
    /// `"<value> <column>"`
    pub marker: String,
}

#[derive(Debug, Clone)]
pub struct AnomalyReport<'a> {
    dataset: &'a Dataset,
    pub columns: Vec<ColumnResult<'a>>,
    pub merged: Vec<AnomalyRecord<'a>>,
}

impl<'a> AnomalyReport<'a> {
    /// Builds the merged record list from per-column results, keeping their order.
    pub fn new(dataset: &'a Dataset, columns: Vec<ColumnResult<'a>>) -> Self {
        let merged = merge_results(&columns);
        Self { dataset, columns, merged }
    }

    pub fn dataset(&self) -> &'a Dataset { self.dataset }

    pub fn is_empty(&self) -> bool { self.columns.is_empty() }

    pub fn column(&self, name: &str) -> Option<&ColumnResult<'a>> {
        self.columns.iter().find(|c| c.column == name)
    }

    pub fn total_anomalies(&self) -> usize { self.merged.len() }
}

/// Runs IQR detection over every numeric column of `dataset`.
///
/// Columns without usable values are left out of the report. Results follow
/// schema order whether or not the work runs in parallel.
pub fn process_all<'a>(dataset: &'a Dataset, opts: &BatchOpts) -> AnomalyReport<'a> {
    let columns: Vec<&str> = dataset.numeric_columns().map(|c| c.name.as_str()).collect();
    let results: Vec<ColumnResult<'a>> = if opts.parallel {
        columns.par_iter().filter_map(|c| process_column(dataset, c, opts.multiplier)).collect()
    } else {
        columns.iter().filter_map(|c| process_column(dataset, c, opts.multiplier)).collect()
    };
    let report = AnomalyReport::new(dataset, results);
    info!(
        "processed {} of {} numeric columns, {} anomalies",
        report.columns.len(),
        columns.len(),
        report.total_anomalies()
    );
    report
}

fn process_column<'a>(dataset: &'a Dataset, column: &str, multiplier: f64) -> Option<ColumnResult<'a>> {
    let view = dataset.view();
    let stats = match calculate_stats(&view, column) {
        Ok(stats) => stats,
        Err(e @ AnomalyError::InsufficientData(_)) => {
            debug!("skipping {}: {}", column, e);
            return None;
        }
        Err(e) => {
            warn!("skipping {}: {}", column, e);
            return None;
        }
    };
    let thresholds = stats.thresholds(multiplier);
    match detect_anomalies(&view, column, thresholds, &DetectOpts::default()) {
        Ok(anomalies) => Some(ColumnResult { column: column.to_string(), stats, thresholds, anomalies }),
        Err(e) => {
            warn!("skipping {}: {}", column, e);
            None
        }
    }
}

/// Concatenates per-column anomalies, one record per (row, column) pair.
pub fn merge_results<'a>(results: &[ColumnResult<'a>]) -> Vec<AnomalyRecord<'a>> {
    results
        .iter()
        .flat_map(|r| {
            let idx = r.anomalies.schema().index_of(&r.column);
            r.anomalies.iter().filter_map(move |(row_index, row)| {
                let value = row.get(idx?)?.as_f64()?;
                Some(AnomalyRecord {
                    row_index,
                    row,
                    column: r.column.clone(),
                    value,
                    marker: marker(value, &r.column),
                })
            })
        })
        .collect()
}

pub fn marker(value: f64, column: &str) -> String {
    format!("{} {}", format_number(value), column)
}

/// Parameters for analysing a single column.
#[derive(Debug, Clone)]
pub struct ColumnQuery {
    pub column: String,
    pub multiplier: f64,
    /// Manual bounds; each one replaces the derived bound on its side.
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub opts: DetectOpts,
}

impl Default for ColumnQuery {
    fn default() -> Self {
        Self {
            column: String::new(),
            multiplier: DEFAULT_IQR_MULTIPLIER,
            lower: None,
            upper: None,
            opts: DetectOpts::default(),
        }
    }
}

impl ColumnQuery {
    pub fn new(column: impl Into<String>) -> Self {
        Self { column: column.into(), ..Default::default() }
    }
}

/// Filter, then derive thresholds from the filtered rows, then detect.
///
/// Unlike [`process_all`], a column without usable values is an error here.
pub fn analyze_column<'a>(dataset: &'a Dataset, query: &ColumnQuery) -> Result<ColumnResult<'a>> {
    validate_opts(dataset.schema(), &query.opts)?;
    let filtered = filter_categories(&dataset.view(), &query.opts.categories)?;
    let stats = calculate_stats(&filtered, &query.column)?;
    let thresholds = stats.thresholds(query.multiplier).with_overrides(query.lower, query.upper);
    let anomalies = detect_anomalies(&filtered, &query.column, thresholds, &query.opts)?;
    Ok(ColumnResult { column: query.column.clone(), stats, thresholds, anomalies })
}
