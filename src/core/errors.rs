//! Error taxonomy shared by the whole autoscaler.

use thiserror::Error;

/// Kind of an [`AutoscalerError`] without its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Internal,
    CloudProvider,
    ApiCall,
    Transient,
    Configuration,
    NotImplemented,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AutoscalerError {
    /// Invariant violated in our own code. Aborts the iteration.
    #[error("internal error: {0}")]
    Internal(String),

    /// Failure returned by a cloud provider call.
    #[error("cloud provider error: {0}")]
    CloudProvider(String),

    /// Orchestrator client failure.
    #[error("api call error: {0}")]
    ApiCall(String),

    /// Rate limit or throttling, the next iteration retries.
    #[error("transient error: {0}")]
    Transient(String),

    /// Invalid user input detected at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Optional provider functionality which is absent.
    #[error("not implemented")]
    NotImplemented,
}

pub type AutoscalerResult<T> = Result<T, AutoscalerError>;

impl AutoscalerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AutoscalerError::Internal(_) => ErrorKind::Internal,
            AutoscalerError::CloudProvider(_) => ErrorKind::CloudProvider,
            AutoscalerError::ApiCall(_) => ErrorKind::ApiCall,
            AutoscalerError::Transient(_) => ErrorKind::Transient,
            AutoscalerError::Configuration(_) => ErrorKind::Configuration,
            AutoscalerError::NotImplemented => ErrorKind::NotImplemented,
        }
    }

    /// Same kind with `prefix` prepended to the message.
    pub fn prefixed(self, prefix: &str) -> Self {
        match self {
            AutoscalerError::Internal(msg) => AutoscalerError::Internal(format!("{prefix}{msg}")),
            AutoscalerError::CloudProvider(msg) => {
                AutoscalerError::CloudProvider(format!("{prefix}{msg}"))
            }
            AutoscalerError::ApiCall(msg) => AutoscalerError::ApiCall(format!("{prefix}{msg}")),
            AutoscalerError::Transient(msg) => {
                AutoscalerError::Transient(format!("{prefix}{msg}"))
            }
            AutoscalerError::Configuration(msg) => {
                AutoscalerError::Configuration(format!("{prefix}{msg}"))
            }
            AutoscalerError::NotImplemented => AutoscalerError::NotImplemented,
        }
    }
}

impl From<serde_yaml::Error> for AutoscalerError {
    fn from(err: serde_yaml::Error) -> Self {
        AutoscalerError::Configuration(err.to_string())
    }
}

impl From<std::io::Error> for AutoscalerError {
    fn from(err: std::io::Error) -> Self {
        AutoscalerError::Configuration(err.to_string())
    }
}
