//! Error types for the composable-prevalence library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum PrevalenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid date '{value}' in column '{column}' at row {row}")]
    InvalidDate {
        value: String,
        column: String,
        row: usize,
    },

    #[error("Invalid value '{value}' in column '{column}' at row {row}")]
    InvalidValue {
        value: String,
        column: String,
        row: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Role specification error: {0}")]
    RoleSpec(String),

    #[error("Sex must have at most 2 levels, found {0}: {1:?}")]
    TooManySexLevels(usize, Vec<String>),

    #[error("Sex level '{0}' is present in the registry but absent from the life table")]
    MissingSexLevel(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Model '{model}' failed to converge after {iterations} iterations")]
    Convergence { model: String, iterations: usize },

    #[error("Only {successful} of {requested} bootstrap fits succeeded (at least {required} required)")]
    InsufficientDraws {
        successful: usize,
        requested: usize,
        required: usize,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid model output: {0}")]
    InvalidModelOutput(String),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, PrevalenceError>;
