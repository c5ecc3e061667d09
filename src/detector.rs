use crate::error::{AnomalyError, Result};
use crate::stats::{numeric_column_index, ThresholdPair};
use crate::table::{DatasetView, Schema, Value};
use itertools::Itertools;
use log::debug;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Allowed values per categorical column. A row passes only if it passes every column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryFilter {
    allowed: BTreeMap<String, BTreeSet<String>>,
}

impl CategoryFilter {
    pub fn new() -> Self { Self::default() }

    /// Builder form of [`CategoryFilter::insert`].
    pub fn allow<I, S>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(column, values);
        self
    }

    /// Adds permitted values for `column`, extending any set already present.
    pub fn insert<I, S>(&mut self, column: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed.entry(column.into()).or_default().extend(values.into_iter().map(Into::into));
    }

    pub fn is_empty(&self) -> bool { self.allowed.is_empty() }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.allowed.keys().map(String::as_str)
    }

    pub fn allowed(&self, column: &str) -> Option<&BTreeSet<String>> {
        self.allowed.get(column)
    }
}

/// Optional restrictions for single-column detection.
#[derive(Debug, Clone, Default)]
pub struct DetectOpts {
    /// Columns whose value combination partitions the rows.
    pub group_columns: Vec<String>,
    pub categories: CategoryFilter,
}

/// Rows sharing one combination of group-column values.
#[derive(Debug, Clone)]
pub struct Group<'a> {
    pub key: Vec<Value>,
    pub rows: DatasetView<'a>,
}

/// Returns the rows of `view` whose `column` value lies strictly outside `thresholds`.
///
/// The category filter is applied first. With group columns, rows are
/// partitioned and each group is checked against the same thresholds; the
/// result lists groups in ascending key order and rows in their original
/// order within each group. An empty view yields an empty result without
/// looking at the column names.
pub fn detect_anomalies<'a>(
    view: &DatasetView<'a>,
    column: &str,
    thresholds: ThresholdPair,
    opts: &DetectOpts,
) -> Result<DatasetView<'a>> {
    if view.is_empty() {
        return Ok(view.clone());
    }
    let schema = view.schema();
    validate_opts(schema, opts)?;
    let idx = numeric_column_index(schema, column)?;

    let filtered = filter_categories(view, &opts.categories)?;
    let anomalies = if opts.group_columns.is_empty() {
        outside(&filtered, idx, thresholds)
    } else {
        let rows = group_rows(&filtered, opts.group_columns.as_slice())?
            .iter()
            .flat_map(|g| outside(&g.rows, idx, thresholds).indices().to_vec())
            .collect();
        DatasetView::new(view.dataset(), rows)
    };
    debug!(
        "detect {}: {} of {} rows outside [{}, {}]",
        column,
        anomalies.len(),
        filtered.len(),
        thresholds.lower,
        thresholds.upper
    );
    Ok(anomalies)
}

/// Checks that every filter and group column exists in `schema`.
pub fn validate_opts(schema: &Schema, opts: &DetectOpts) -> Result<()> {
    check_columns(schema, opts.categories.columns().chain(opts.group_columns.iter().map(String::as_str)))
}

/// Keeps rows whose value in every filtered column is one of the allowed labels.
pub fn filter_categories<'a>(view: &DatasetView<'a>, filter: &CategoryFilter) -> Result<DatasetView<'a>> {
    if filter.is_empty() {
        return Ok(view.clone());
    }
    let schema = view.schema();
    check_columns(schema, filter.columns())?;
    let checks: Vec<(usize, &BTreeSet<String>)> = filter
        .allowed
        .iter()
        .filter_map(|(c, set)| schema.index_of(c).map(|i| (i, set)))
        .collect();
    Ok(view.filter(|row| {
        checks.iter().all(|(i, set)| row[*i].label().is_some_and(|l| set.contains(&l)))
    }))
}

/// Partitions `view` by the values of `columns`.
///
/// Groups come back in ascending key order. Rows with a missing cell in any
/// group column belong to no group.
pub fn group_rows<'a, S: AsRef<str>>(view: &DatasetView<'a>, columns: &[S]) -> Result<Vec<Group<'a>>> {
    let schema = view.schema();
    check_columns(schema, columns.iter().map(AsRef::as_ref))?;
    let key_idx: Vec<usize> = columns.iter().filter_map(|c| schema.index_of(c.as_ref())).collect();

    let mut keyed: Vec<(Vec<Value>, usize)> = view
        .iter()
        .map(|(i, row)| (key_idx.iter().map(|&k| row[k].clone()).collect::<Vec<_>>(), i))
        .filter(|(key, _)| key.iter().all(|v| !v.is_missing()))
        .collect();
    // stable: rows keep their view order inside a group
    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b));

    let chunks = keyed.into_iter().chunk_by(|(key, _)| key.clone());
    let groups = chunks
        .into_iter()
        .map(|(key, members)| Group {
            key,
            rows: DatasetView::new(view.dataset(), members.map(|(_, i)| i).collect()),
        })
        .collect();
    Ok(groups)
}

fn outside<'a>(view: &DatasetView<'a>, idx: usize, thresholds: ThresholdPair) -> DatasetView<'a> {
    view.filter(|row| row[idx].as_f64().is_some_and(|x| thresholds.is_outside(x)))
}

fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.sort_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn check_columns<'c, I>(schema: &Schema, columns: I) -> Result<()>
where
    I: IntoIterator<Item = &'c str>,
{
    let missing: Vec<String> = columns
        .into_iter()
        .filter(|c| schema.index_of(c).is_none())
        .unique()
        .map(str::to_string)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AnomalyError::InvalidGroupColumns(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Dataset;

    #[test]
    fn check_columns_reports_each_missing_name_once() {
        let ds = Dataset::from_columns(vec![("a", vec![Value::from(1)])]).unwrap();
        let err = check_columns(ds.schema(), ["a", "x", "y", "x"]).unwrap_err();
        assert_eq!(err, AnomalyError::InvalidGroupColumns(vec!["x".into(), "y".into()]));
    }

    #[test]
    fn compare_keys_is_lexicographic() {
        let k1 = vec![Value::from("A"), Value::from(2)];
        let k2 = vec![Value::from("A"), Value::from(10)];
        let k3 = vec![Value::from("B"), Value::from(1)];
        assert_eq!(compare_keys(&k1, &k2), Ordering::Less);
        assert_eq!(compare_keys(&k3, &k2), Ordering::Greater);
        assert_eq!(compare_keys(&k1, &k1), Ordering::Equal);
    }

    #[test]
    fn filter_builder_merges_values() {
        let f = CategoryFilter::new().allow("c", ["A"]).allow("c", ["B"]);
        let allowed: Vec<&str> = f.allowed("c").unwrap().iter().map(String::as_str).collect();
        assert_eq!(allowed, vec!["A", "B"]);
    }
}
