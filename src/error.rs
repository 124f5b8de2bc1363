use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a whole run before any partition is fitted.
#[derive(Error, Debug)]
pub enum CvError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

impl CvError {
    pub fn validation<S: Into<String>>(msg: S) -> CvError {
        CvError::Validation(msg.into())
    }

    pub fn invalid_parameter<S: Into<String>>(msg: S) -> CvError {
        CvError::InvalidParameter(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CvError>;

/// Failure of a single partition. Recorded in the result, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartitionError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Partition exceeded its time budget of {budget_secs:.1}s")]
    Timeout { budget_secs: f64 },

    #[error("Partition cancelled before fitting")]
    Cancelled,
}
