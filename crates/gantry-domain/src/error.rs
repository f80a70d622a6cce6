//! Error taxonomy for pipeline operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("command '{command}' exited with code {exit_code}")]
    CommandFailure { command: String, exit_code: i32 },

    #[error("service '{service}' failed to start: {reason}")]
    ServiceStart { service: String, reason: String },

    #[error("credential error: {0}")]
    Credential(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("declaration error: {0}")]
    Declaration(#[from] serde_yaml::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
