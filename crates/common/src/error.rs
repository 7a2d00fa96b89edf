//! Error types for smartcheck

use thiserror::Error;

/// Result type alias using the smartcheck Error
pub type Result<T> = std::result::Result<T, Error>;

/// smartcheck error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unknown record field: {0}")]
    UnknownField(String),

    #[error("Unsupported table format: {0}")]
    UnsupportedFormat(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
