use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Result alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors that can occur while launching the engine or running a scenario against it.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to spawn engine: {0}")]
    EngineStart(String),
    #[error("engine terminated early with status {0}")]
    EngineExited(ExitStatus),
    #[error("engine did not report a listen address within {0:?}")]
    StartupTimeout(Duration),
    #[error("could not load state {}: {message}", .path.display())]
    StateLoad { path: PathBuf, message: String },
    #[error("invalid scenario parameters: {0}")]
    InvalidParameters(String),
    #[error("engine rejected {request}: {message}")]
    Rejected {
        request: &'static str,
        message: String,
    },
    #[error("failed to dispatch {event} at {at_min:.3} min: {source}")]
    Dispatch {
        event: &'static str,
        at_min: f64,
        #[source]
        source: Box<DriverError>,
    },
    #[error("failed to advance time by {step_min:.3} min at {at_min:.3} min: {source}")]
    Advance {
        step_min: f64,
        at_min: f64,
        #[source]
        source: Box<DriverError>,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected engine response: {0}")]
    UnexpectedResponse(String),
    #[error("engine connection closed")]
    ConnectionClosed,
}

impl DriverError {
    pub(crate) fn engine_start(err: impl Into<String>) -> Self {
        DriverError::EngineStart(err.into())
    }

    pub(crate) fn unexpected(message: impl Into<String>) -> Self {
        DriverError::UnexpectedResponse(message.into())
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        DriverError::InvalidParameters(message.into())
    }

    pub(crate) fn rejected(request: &'static str, message: impl Into<String>) -> Self {
        DriverError::Rejected {
            request,
            message: message.into(),
        }
    }
}
