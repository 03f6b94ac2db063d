//! Error types for the tagging core.

use providers::ProviderError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaggerError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("classifier error: {0}")]
    Classifier(#[from] ProviderError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("store migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("no taxonomy could be resolved: {0}")]
    Taxonomy(String),

    #[error("sidecar error at {path}: {message}")]
    Sidecar { path: PathBuf, message: String },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl TaggerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, TaggerError>;
