use thiserror::Error;

use crate::schema::Value;

/// Top-level error type for template generation and workbook import.
#[derive(Debug, Error)]
pub enum Error {
    /// Broken or unknown schema configuration. Fatal for the whole operation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A schema arrangement the bridge deliberately does not handle.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A bad cell value or workbook precondition, raised during import.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Failure surfaced from the workbook container itself.
    #[error("workbook error: {0}")]
    Workbook(String),

    /// Failure surfaced from the storage collaborator.
    #[error("store error: {0}")]
    Store(String),
}

/// Per-row / per-field import validation failures.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid choice '{label}' for {entity}.{field}")]
    InvalidChoice {
        entity: String,
        field: String,
        label: String,
    },

    #[error("{entity} with natural key {key:?} not found")]
    NotFound { entity: String, key: Vec<Value> },

    #[error("partial values for compound foreign key '{field}': {values:?}")]
    PartialCompoundKey { field: String, values: Vec<Value> },

    #[error("field '{field}' does not allow null values and no data was provided")]
    NullViolation { field: String },

    #[error("workbook module tag '{found}' doesn't match provided module '{expected}'")]
    ModuleMismatch { found: String, expected: String },

    #[error("invalid value '{value}' for field '{field}': expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<rust_xlsxwriter::XlsxError> for Error {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        Error::Workbook(err.to_string())
    }
}

impl From<calamine::XlsxError> for Error {
    fn from(err: calamine::XlsxError) -> Self {
        Error::Workbook(err.to_string())
    }
}
