use itertools::Itertools;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnomalyError {
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    #[error("column {0} is not numeric")]
    NotNumeric(String),
    #[error("column {0} has no non-missing values; quantiles are undefined")]
    InsufficientData(String),
    #[error("unknown group/filter columns: {}", .0.iter().join(", "))]
    InvalidGroupColumns(Vec<String>),
}

pub type Result<T> = std::result::Result<T, AnomalyError>;
