//! Error types for the CLI

use std::path::PathBuf;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Keel(#[from] keel_common::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("validation error: {message}")]
    Validation { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }
}
