//! Error types for the regression runner

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Browser session error: {0}")]
    Session(String),

    #[error("Login script parse error: {0}")]
    ScriptParse(String),

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Duplicate source key: {0}")]
    DuplicateSource(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Attempt panicked: {0}")]
    Panicked(String),

    #[error("Missing secret: environment variable {0} is not set")]
    MissingSecret(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Common(#[from] smartcheck_common::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
