use orderlake_bucket::BucketError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("missing required job argument(s): {}", .0.join(", "))]
    MissingArgument(Vec<String>),

    #[error("source {location} not found or inaccessible: {reason}")]
    SourceNotFound { location: String, reason: String },

    #[error("failed to parse {location}: {message}")]
    Parse { location: String, message: String },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("destination {location} is not writable: {reason}")]
    DestinationUnwritable { location: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] BucketError),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EtlError {
    pub(crate) fn missing_columns(stage: &str, missing: &[&str], available: &[String]) -> Self {
        EtlError::Schema(format!(
            "{stage} requires column(s) [{}] but the dataset has [{}]",
            missing.join(", "),
            available.join(", ")
        ))
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
