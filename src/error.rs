//! Error type shared by the pipeline.
//!
//! Only failures that should stop an operation become a [`PipelineError`].
//! Exhausted fetches, unusable model output and unreadable history are
//! modelled as ordinary values by the stages that produce them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The sources file or CLI configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    /// The completion capability gave up after its own retry budget.
    #[error("completion failed: {0}")]
    Completion(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("invalid run date {0:?}, expected YYYYMMDD")]
    InvalidDate(String),
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Http(err.to_string())
    }
}
