use crate::vendor::HealthTrackerType;
use thiserror::Error;

/// Health tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Body sensor permission denied")]
    PermissionDenied,

    #[error("SDK policy violation")]
    PolicyViolation,

    #[error("Health platform version is too old")]
    PlatformUnsupported,

    #[error("Health platform package is not installed")]
    PackageMissing,

    #[error("Data parse error: {0}")]
    DataParse(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to the health tracking service")]
    NotConnected,

    #[error("Connection already established or in progress")]
    AlreadyConnected,

    #[error("Tracker not supported on this device: {0:?}")]
    Unsupported(HealthTrackerType),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for tracker operations
pub type TResult<T> = Result<T, TrackerError>;

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Config(err.to_string())
    }
}
