use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::BufferError;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Step '{step_name}' ({step_id}) failed: {message}")]
    StepExecution {
        step_id: String,
        step_name: String,
        message: String,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Post-processing hook '{hook}' failed: {message}")]
    PostProcessing { hook: String, message: String },

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Coarse classification surfaced on failed execution results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    StepExecution,
    Connection,
    PostProcessing,
}

impl EtlError {
    pub fn config(message: impl Into<String>) -> Self {
        EtlError::Configuration(message.into())
    }

    pub fn connection(message: impl Into<String>) -> Self {
        EtlError::Connection(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::Configuration(_) | EtlError::Toml(_) => ErrorKind::Configuration,
            EtlError::StepExecution { .. } | EtlError::Buffer(_) | EtlError::Expression(_) => {
                ErrorKind::StepExecution
            }
            EtlError::PostProcessing { .. } => ErrorKind::PostProcessing,
            EtlError::Connection(_)
            | EtlError::Io(_)
            | EtlError::Json(_)
            | EtlError::Sqlite(_)
            | EtlError::Csv(_) => ErrorKind::Connection,
        }
    }

    /// Reclassify a failure raised while reading or writing a connector.
    ///
    /// Data a connector hands back that cannot form a buffer is still the
    /// connector's failure; configuration errors keep their kind.
    pub fn at_connector(self) -> Self {
        match self.kind() {
            ErrorKind::Connection | ErrorKind::Configuration => self,
            _ => EtlError::Connection(self.to_string()),
        }
    }

    /// Attach step identity to an error raised inside a step's processing.
    ///
    /// Configuration errors keep their kind so the caller still sees a misconfigured
    /// step as such; everything else becomes a step execution failure.
    pub fn in_step(self, step_id: &str, step_name: &str) -> Self {
        match self {
            EtlError::Configuration(message) => EtlError::Configuration(format!(
                "step '{step_name}' ({step_id}): {message}"
            )),
            err @ EtlError::StepExecution { .. } => err,
            other => EtlError::StepExecution {
                step_id: step_id.to_string(),
                step_name: step_name.to_string(),
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
