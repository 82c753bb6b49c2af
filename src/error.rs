// src/error.rs

//! Defines the primary error type for the client.

use thiserror::Error;

/// The main error enum, representing every failure the client can surface to a caller.
///
/// Transient transport failures (timeouts, 5xx, connection errors) never reach this type:
/// the request executor retries them across the server pool and only raises
/// [`AcmError::AllServersUnavailable`] once every server has been tried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcmError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("all servers unavailable")]
    AllServersUnavailable,

    #[error("http client error: {0}")]
    HttpClientError(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<reqwest::Error> for AcmError {
    fn from(e: reqwest::Error) -> Self {
        AcmError::HttpClientError(e.to_string())
    }
}

impl From<std::io::Error> for AcmError {
    fn from(e: std::io::Error) -> Self {
        AcmError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AcmError>;
