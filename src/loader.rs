use crate::table::{format_number, infer_kind, Column, ColumnKind, Dataset, Schema, TableError, Value};
use calamine::{open_workbook_auto, open_workbook_auto_from_rs, Data, DataType, Range, Reader};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("excel error: {0}")]
    Excel(#[from] calamine::Error),
    #[error("workbook has no worksheets")]
    NoWorksheet,
    #[error("record {0} is not a JSON object")]
    NotAnObject(usize),
    #[error(transparent)]
    Table(#[from] TableError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Array of objects, or one object per line.
    Json,
    Csv,
    Tsv,
    /// First worksheet of an xlsx, xlsm, xlsb or xls workbook.
    Excel,
}

impl InputFormat {
    /// Picks a format from the file extension; anything unrecognised is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("csv") => InputFormat::Csv,
            Some("tsv") | Some("tab") => InputFormat::Tsv,
            Some("xlsx") | Some("xlsm") | Some("xlsb") | Some("xls") => InputFormat::Excel,
            _ => InputFormat::Json,
        }
    }
}

static RE_DECIMAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?$").unwrap()
});
static RE_DATE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}[-/]\d{2}[-/]\d{2}").unwrap()
});

/// A parsed cell plus the text it came from, so categorical columns keep
/// labels such as `007` intact.
#[derive(Debug, Clone)]
struct Cell {
    value: Value,
    raw: Option<String>,
}

impl Cell {
    fn missing() -> Self {
        Cell { value: Value::Missing, raw: None }
    }

    fn materialize(self, kind: ColumnKind) -> Value {
        match (kind, self.raw) {
            (ColumnKind::Categorical, Some(raw)) if !self.value.is_missing() => Value::Text(raw),
            _ => self.value.coerce(kind),
        }
    }
}

/// Columns collected in first-seen order; absent cells are missing.
#[derive(Default)]
struct ColumnBuilder {
    names: Vec<String>,
    index: HashMap<String, usize>,
    cells: Vec<Vec<Cell>>,
    rows: usize,
}

impl ColumnBuilder {
    /// Registers columns so header-only input still yields a schema.
    fn push_header(&mut self, headers: &[String]) {
        for h in headers {
            if !self.index.contains_key(h) {
                self.index.insert(h.clone(), self.names.len());
                self.names.push(h.clone());
                self.cells.push(vec![Cell::missing(); self.rows]);
            }
        }
    }

    fn push_row(&mut self, fields: Vec<(String, Cell)>) {
        for (name, cell) in fields {
            let idx = match self.index.get(&name) {
                Some(&i) => i,
                None => {
                    let i = self.names.len();
                    self.index.insert(name.clone(), i);
                    self.names.push(name);
                    self.cells.push(vec![Cell::missing(); self.rows]);
                    i
                }
            };
            let column = &mut self.cells[idx];
            if column.len() == self.rows {
                column.push(cell);
            } else {
                column[self.rows] = cell;
            }
        }
        self.rows += 1;
        for column in &mut self.cells {
            column.resize(self.rows, Cell::missing());
        }
    }

    fn finish(self) -> Result<Dataset, TableError> {
        let mut defs = Vec::with_capacity(self.names.len());
        let mut columns = Vec::with_capacity(self.names.len());
        for (name, cells) in self.names.into_iter().zip(self.cells) {
            let kind = infer_kind(cells.iter().map(|c| &c.value));
            defs.push(Column::new(name, kind));
            columns.push(cells.into_iter().map(|c| c.materialize(kind)).collect::<Vec<_>>());
        }
        let schema = Schema::new(defs)?;
        let mut rows: Vec<Vec<Value>> = (0..self.rows).map(|_| Vec::with_capacity(columns.len())).collect();
        for column in columns {
            for (row, v) in rows.iter_mut().zip(column) {
                row.push(v);
            }
        }
        let ds = Dataset::new(schema, rows)?;
        debug!("loaded {} rows x {} columns", ds.len(), ds.schema().len());
        Ok(ds)
    }
}

pub fn load_path(path: &Path) -> Result<Dataset, LoadError> {
    let format = InputFormat::from_path(path);
    if format == InputFormat::Excel {
        return load_excel(open_workbook_auto(path)?);
    }
    let file = File::open(path)?;
    load_reader(BufReader::new(file), format)
}

pub fn load_reader<R: Read>(mut reader: R, format: InputFormat) -> Result<Dataset, LoadError> {
    match format {
        InputFormat::Json => {
            let mut text = String::new();
            reader.read_to_string(&mut text)?;
            load_json_str(&text)
        }
        InputFormat::Csv => load_csv_reader(reader, b','),
        InputFormat::Tsv => load_csv_reader(reader, b'\t'),
        InputFormat::Excel => {
            // workbooks need random access
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            load_excel(open_workbook_auto_from_rs(Cursor::new(bytes))?)
        }
    }
}

fn load_excel<R, W>(mut workbook: W) -> Result<Dataset, LoadError>
where
    R: Read + Seek,
    W: Reader<R, Error = calamine::Error>,
{
    let range = workbook.worksheet_range_at(0).ok_or(LoadError::NoWorksheet)??;
    load_excel_range(&range)
}

/// Loads a worksheet whose first row holds the column names. Blank names
/// become `column_<n>`; empty and error cells are missing.
pub fn load_excel_range(range: &Range<Data>) -> Result<Dataset, LoadError> {
    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(Dataset::default());
    };
    let headers: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let cell = excel_cell(c);
            let name = cell.raw.or_else(|| cell.value.label()).unwrap_or_default();
            if name.is_empty() { format!("column_{}", i + 1) } else { name }
        })
        .collect();
    Schema::new(headers.iter().map(|h| Column::new(h.as_str(), ColumnKind::Categorical)).collect())?;

    let mut builder = ColumnBuilder::default();
    builder.push_header(&headers);
    for row in rows {
        let fields = headers.iter().cloned().zip(row.iter().map(excel_cell)).collect();
        builder.push_row(fields);
    }
    Ok(builder.finish()?)
}

/// Loads a JSON array of objects, or JSON lines. Nested values are flattened
/// into dotted keys (`user.id`, `tags.0`).
pub fn load_json_str(text: &str) -> Result<Dataset, LoadError> {
    let records: Vec<Json> = if text.trim_start().starts_with('[') {
        match serde_json::from_str::<Json>(text)? {
            Json::Array(items) => items,
            other => vec![other],
        }
    } else {
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str::<Json>)
            .collect::<Result<_, _>>()?
    };

    let mut builder = ColumnBuilder::default();
    for (i, rec) in records.iter().enumerate() {
        if !rec.is_object() {
            return Err(LoadError::NotAnObject(i));
        }
        let mut fields = Vec::new();
        flatten_json("", rec, &mut fields);
        builder.push_row(fields);
    }
    Ok(builder.finish()?)
}

pub fn load_csv_str(text: &str) -> Result<Dataset, LoadError> {
    load_csv_reader(text.as_bytes(), b',')
}

/// Delimited text with a header row. Empty cells are missing.
pub fn load_csv_reader<R: Read>(reader: R, delimiter: u8) -> Result<Dataset, LoadError> {
    let mut rdr = csv::ReaderBuilder::new().delimiter(delimiter).has_headers(true).from_reader(reader);
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    // checked up front: the builder would otherwise fold duplicates into one column
    Schema::new(headers.iter().map(|h| Column::new(h.as_str(), ColumnKind::Categorical)).collect())?;

    let mut builder = ColumnBuilder::default();
    builder.push_header(&headers);
    for record in rdr.records() {
        let record = record?;
        let fields = headers.iter().cloned().zip(record.iter().map(parse_cell)).collect();
        builder.push_row(fields);
    }
    Ok(builder.finish()?)
}

fn flatten_json(prefix: &str, v: &Json, out: &mut Vec<(String, Cell)>) {
    match v {
        Json::Object(map) => {
            for (k, v) in map.iter() {
                let key = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                flatten_json(&key, v, out);
            }
        }
        Json::Array(arr) => {
            for (idx, item) in arr.iter().enumerate() {
                let key = if prefix.is_empty() { idx.to_string() } else { format!("{prefix}.{idx}") };
                flatten_json(&key, item, out);
            }
        }
        Json::Null => out.push((prefix.to_string(), Cell::missing())),
        Json::Bool(b) => out.push((prefix.to_string(), Cell { value: Value::Bool(*b), raw: None })),
        Json::Number(n) => {
            let value = n.as_f64().map(Value::Number).unwrap_or(Value::Missing);
            out.push((prefix.to_string(), Cell { value, raw: Some(n.to_string()) }));
        }
        Json::String(s) => out.push((prefix.to_string(), parse_cell(s))),
    }
}

fn excel_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty | Data::Error(_) => Cell::missing(),
        Data::Int(i) => Cell { value: Value::Number(*i as f64), raw: Some(i.to_string()) },
        Data::Float(x) => Cell { value: Value::Number(*x), raw: Some(format_number(*x)) },
        Data::Bool(b) => Cell { value: Value::Bool(*b), raw: None },
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => parse_cell(s),
        Data::DateTime(dt) if dt.is_duration() => {
            Cell { value: Value::Number(dt.as_f64()), raw: Some(format_number(dt.as_f64())) }
        }
        Data::DateTime(_) => match cell.as_datetime() {
            Some(ndt) => Cell { value: Value::DateTime(Utc.from_utc_datetime(&ndt)), raw: None },
            None => Cell::missing(),
        },
    }
}

fn parse_cell(s: &str) -> Cell {
    let t = s.trim();
    if t.is_empty() {
        return Cell::missing();
    }
    let value = if RE_DECIMAL.is_match(t) {
        t.parse::<f64>().map(Value::Number).unwrap_or_else(|_| Value::Text(t.to_string()))
    } else if let Some(ts) = parse_datetime(t) {
        Value::DateTime(ts)
    } else {
        Value::Text(t.to_string())
    };
    Cell { value, raw: Some(t.to_string()) }
}

/// Date or date-time text, interpreted as UTC when no offset is given.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if !RE_DATE_PREFIX.is_match(s) {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let zoned = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%dT%H:%M:%S%.f%z"];
    for f in zoned.iter() {
        if let Ok(dt) = DateTime::parse_from_str(s, f) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    let naive = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
    ];
    for f in naive.iter() {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, f) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    for f in ["%Y-%m-%d", "%Y/%m/%d"].iter() {
        if let Some(ndt) = NaiveDate::parse_from_str(s, f).ok().and_then(|d| d.and_hms_opt(0, 0, 0)) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    None
}
