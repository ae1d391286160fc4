use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum BootError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("TOML Parsing Error: {0}")]
    Toml(#[from] Arc<toml::de::Error>),

    #[error("Git Error: {0}")]
    Git(#[from] Arc<git2::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("DownloadError: Failed to download '{0}' from '{1}': {2}")]
    DownloadError(String, String, String),

    #[error("Corrupt artifact '{0}': {1}")]
    CorruptArtifact(String, String),

    #[error("Extraction Error: {0}")]
    ExtractError(String),

    #[error("Seeding Error: {0}")]
    SeedError(String),

    #[error("Health check failed: {0}")]
    HealthCheckError(String),

    #[error("Failed to execute command: {0}")]
    CommandExecError(String),

    #[error("Link Error: {0}")]
    LinkError(String),

    #[error("Volume lock error: {0}")]
    LockError(String),

    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("Inference API Error: {0}")]
    Api(String),

    #[error("IoError: {0}")]
    IoError(String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl BootError {
    /// Only a missing default tree and a backend that never became healthy
    /// may terminate startup. Everything else is a per-item failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BootError::SeedError(_) | BootError::HealthCheckError(_))
    }
}

impl From<std::io::Error> for BootError {
    fn from(err: std::io::Error) -> Self {
        BootError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for BootError {
    fn from(err: reqwest::Error) -> Self {
        BootError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for BootError {
    fn from(err: serde_json::Error) -> Self {
        BootError::Json(Arc::new(err))
    }
}

impl From<toml::de::Error> for BootError {
    fn from(err: toml::de::Error) -> Self {
        BootError::Toml(Arc::new(err))
    }
}

impl From<git2::Error> for BootError {
    fn from(err: git2::Error) -> Self {
        BootError::Git(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, BootError>;
