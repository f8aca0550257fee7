use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Content stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Continuation error: {0}")]
    Continuation(#[from] ContinuationError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Read failed: {0}")]
    Read(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Replacement body exceeds limit of {limit} bytes")]
    TooLarge { limit: usize },
}

#[derive(Error, Debug)]
pub enum ScanError {
    /// The external worker could not be reached or instantiated. Reported
    /// synchronously from dispatch, never through the completion callback.
    #[error("Scanner unavailable: {0}")]
    Unavailable(String),

    #[error("Scanner protocol violation: {0}")]
    Protocol(String),

    #[error("Scanner session closed")]
    SessionClosed,
}

#[derive(Error, Debug)]
pub enum ContinuationError {
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Message {0} already has a scan in flight")]
    AlreadySuspended(uuid::Uuid),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
