use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),
    #[error("row {row} has {found} cells, expected {expected}")]
    RaggedRow { row: usize, expected: usize, found: usize },
    #[error("column {column} has {found} values, expected {expected}")]
    ColumnLength { column: String, expected: usize, found: usize },
    #[error("row {row}: cell in column {column} is not {kind}")]
    KindMismatch { row: usize, column: String, kind: ColumnKind },
}

/// Semantic type of a column, fixed for the lifetime of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    DateTime,
}

impl ColumnKind {
    /// Whether a cell may live in a column of this kind. Missing cells fit anywhere.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Missing) => true,
            (ColumnKind::Numeric, Value::Number(_)) => true,
            (ColumnKind::Categorical, Value::Text(_) | Value::Bool(_)) => true,
            (ColumnKind::DateTime, Value::DateTime(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Categorical => "categorical",
            ColumnKind::DateTime => "datetime",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// Ordered list of columns. Names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Result<Self, TableError> {
        let mut seen = HashSet::new();
        for c in &columns {
            if !seen.insert(c.name.as_str()) {
                return Err(TableError::DuplicateColumn(c.name.clone()));
            }
        }
        Ok(Self { columns })
    }

    pub fn len(&self) -> usize { self.columns.len() }

    pub fn is_empty(&self) -> bool { self.columns.is_empty() }

    pub fn columns(&self) -> &[Column] { &self.columns }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// A single cell.
///
/// `Missing` is distinct from every valid value. A `Number` holding NaN is
/// treated as missing as well, so numeric columns coming from float sources
/// behave the same way.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Missing,
    Number(f64),
    Text(String),
    Bool(bool),
    DateTime(DateTime<Utc>),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Missing => true,
            Value::Number(x) => x.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(x) if !x.is_nan() => Some(*x),
            _ => None,
        }
    }

    /// Canonical text form used for category matching and markers.
    /// `None` for missing cells.
    pub fn label(&self) -> Option<String> {
        match self {
            Value::Missing => None,
            Value::Number(x) if x.is_nan() => None,
            Value::Number(x) => Some(format_number(*x)),
            Value::Text(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::DateTime(t) => Some(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }

    /// Converts a cell into the representation used by a column of `kind`.
    /// Only categorical columns rewrite anything: numbers and datetimes become text labels.
    pub fn coerce(self, kind: ColumnKind) -> Value {
        match (kind, self) {
            (ColumnKind::Categorical, v @ (Value::Number(_) | Value::DateTime(_))) => {
                v.label().map(Value::Text).unwrap_or(Value::Missing)
            }
            (_, v) => v,
        }
    }

    /// Total order across cells, used to sort group keys.
    /// Missing < Bool < Number < DateTime < Text.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                v if v.is_missing() => 0,
                Value::Bool(_) => 1,
                Value::Number(_) => 2,
                Value::DateTime(_) => 3,
                _ => 4,
            }
        }
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if !a.is_nan() && !b.is_nan() => a.total_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

/// Shortest decimal form: `50` rather than `50.0`, `12.5` stays `12.5`.
pub fn format_number(x: f64) -> String {
    format!("{x}")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(s) => f.write_str(&s),
            None => Ok(()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Missing => serializer.serialize_none(),
            Value::Number(x) if x.is_nan() => serializer.serialize_none(),
            Value::Number(x) => serializer.serialize_f64(*x),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Text(s) => serializer.serialize_str(s),
            Value::DateTime(t) => serializer.serialize_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self { Value::Number(x) }
}

impl From<i64> for Value {
    fn from(x: i64) -> Self { Value::Number(x as f64) }
}

impl From<i32> for Value {
    fn from(x: i32) -> Self { Value::Number(f64::from(x)) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Text(s.to_string()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::Text(s) }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self { Value::DateTime(t) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Missing)
    }
}

pub type Row = Vec<Value>;

/// Infers the kind of a column from its cells.
///
/// Only non-missing cells vote. A column with no usable cells is numeric,
/// the same as an all-NaN float column.
pub fn infer_kind<'a, I>(values: I) -> ColumnKind
where
    I: IntoIterator<Item = &'a Value>,
{
    let (mut numbers, mut datetimes, mut other) = (0usize, 0usize, 0usize);
    for v in values.into_iter().filter(|v| !v.is_missing()) {
        match v {
            Value::Number(_) => numbers += 1,
            Value::DateTime(_) => datetimes += 1,
            _ => other += 1,
        }
    }
    match (numbers, datetimes, other) {
        (_, 0, 0) => ColumnKind::Numeric,
        (0, _, 0) => ColumnKind::DateTime,
        _ => ColumnKind::Categorical,
    }
}

/// Row-oriented table with a fixed schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    schema: Schema,
    rows: Vec<Row>,
}

impl Dataset {
    pub fn new(schema: Schema, rows: Vec<Row>) -> Result<Self, TableError> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != schema.len() {
                return Err(TableError::RaggedRow { row: i, expected: schema.len(), found: row.len() });
            }
            for (col, v) in schema.columns().iter().zip(row) {
                if !col.kind.accepts(v) {
                    return Err(TableError::KindMismatch { row: i, column: col.name.clone(), kind: col.kind });
                }
            }
        }
        Ok(Self { schema, rows })
    }

    /// Builds a dataset from named columns, inferring each column's kind.
    ///
    /// ```
    /// use iqrscope::table::{ColumnKind, Dataset, Value};
    ///
    /// let ds = Dataset::from_columns(vec![
    ///     ("value", vec![Value::from(10), Value::from(12), Value::Missing]),
    ///     ("category", vec![Value::from("A"), Value::from("B"), Value::from("A")]),
    /// ])
    /// .unwrap();
    /// assert_eq!(ds.len(), 3);
    /// assert_eq!(ds.column("value").unwrap().kind, ColumnKind::Numeric);
    /// assert_eq!(ds.column("category").unwrap().kind, ColumnKind::Categorical);
    /// ```
    pub fn from_columns<I, S>(columns: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = (S, Vec<Value>)>,
        S: Into<String>,
    {
        let mut defs = Vec::new();
        let mut cells: Vec<Vec<Value>> = Vec::new();
        for (name, values) in columns {
            let kind = infer_kind(&values);
            defs.push(Column::new(name, kind));
            cells.push(values.into_iter().map(|v| v.coerce(kind)).collect());
        }
        let schema = Schema::new(defs)?;
        let height = cells.first().map(Vec::len).unwrap_or(0);
        if let Some(pos) = cells.iter().position(|c| c.len() != height) {
            return Err(TableError::ColumnLength {
                column: schema.columns()[pos].name.clone(),
                expected: height,
                found: cells[pos].len(),
            });
        }

        let mut rows: Vec<Row> = (0..height).map(|_| Vec::with_capacity(cells.len())).collect();
        for column in cells {
            for (row, v) in rows.iter_mut().zip(column) {
                row.push(v);
            }
        }
        Self::new(schema, rows)
    }

    pub fn schema(&self) -> &Schema { &self.schema }

    pub fn rows(&self) -> &[Row] { &self.rows }

    pub fn row(&self, index: usize) -> Option<&Row> { self.rows.get(index) }

    pub fn len(&self) -> usize { self.rows.len() }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    pub fn column(&self, name: &str) -> Option<&Column> { self.schema.get(name) }

    pub fn numeric_columns(&self) -> impl Iterator<Item = &Column> {
        self.schema.columns().iter().filter(|c| c.kind == ColumnKind::Numeric)
    }

    /// A view over every row, in order.
    pub fn view(&self) -> DatasetView<'_> {
        DatasetView { data: self, rows: (0..self.rows.len()).collect() }
    }
}

/// Borrowed subset of a dataset's rows.
///
/// Filtering and detection return views; rows are referenced by their index
/// in the underlying dataset, so every column of the original row stays
/// reachable.
#[derive(Debug, Clone)]
pub struct DatasetView<'a> {
    data: &'a Dataset,
    rows: Vec<usize>,
}

impl<'a> DatasetView<'a> {
    /// Indices past the end of `data` are dropped.
    pub fn new(data: &'a Dataset, rows: Vec<usize>) -> Self {
        let rows = rows.into_iter().filter(|&i| i < data.len()).collect();
        Self { data, rows }
    }

    pub fn dataset(&self) -> &'a Dataset { self.data }

    pub fn schema(&self) -> &'a Schema { &self.data.schema }

    pub fn len(&self) -> usize { self.rows.len() }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    pub fn indices(&self) -> &[usize] { &self.rows }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &'a Row)> + '_ {
        let data = self.data;
        self.rows.iter().map(move |&i| (i, &data.rows[i]))
    }

    pub fn filter<F>(&self, mut keep: F) -> DatasetView<'a>
    where
        F: FnMut(&Row) -> bool,
    {
        let data = self.data;
        let rows = self.rows.iter().copied().filter(|&i| keep(&data.rows[i])).collect();
        DatasetView { data, rows }
    }

    /// Non-missing numbers of one column, in row order.
    pub fn numbers(&self, column: usize) -> impl Iterator<Item = f64> + '_ {
        self.iter().filter_map(move |(_, row)| row.get(column).and_then(Value::as_f64))
    }

    /// Copies the selected rows into a standalone dataset with the same schema.
    pub fn to_dataset(&self) -> Dataset {
        Dataset {
            schema: self.data.schema.clone(),
            rows: self.iter().map(|(_, row)| row.clone()).collect(),
        }
    }
}

impl PartialEq for DatasetView<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.data, other.data) && self.rows == other.rows
    }
}
