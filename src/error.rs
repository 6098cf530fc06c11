use thiserror::Error;

/// Application error type
///
/// Only structural problems end up here. Missing data, unknown codes and
/// sanitizer misses are carried inside cells as `TableValue::Error`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Empty header in {source_name}")]
    EmptyHeader { source_name: String },

    #[error("Duplicate header '{name}' in {source_name}")]
    DuplicateHeader { source_name: String, name: String },

    #[error("Sanitizer '{sanitizer}' has an empty key on line {line}")]
    EmptySanitizerKey { sanitizer: String, line: usize },

    #[error("Invalid study spec file '{stem}': {message}")]
    StudySpec { stem: String, message: String },

    #[error("Instrument '{instrument}' references unknown column '{id}'")]
    UnresolvedColumn { instrument: String, id: String },

    #[error("Invalid codemap '{name}': {message}")]
    InvalidCodeMap { name: String, message: String },

    #[error("Invalid sanitizer: {0}")]
    InvalidSanitizer(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
