use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::ApiError;

/// Errors a fetcher can return to tell the cache exactly why it failed.
///
/// Fetchers are free to return any `anyhow::Error`; this type only makes the
/// classification explicit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Remote error: {message}")]
    Remote { status: Option<u16>, message: String },

    #[error("Fetcher error: {0}")]
    Fetcher(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Connectivity(_) => ErrorKind::Connectivity,
            FetchError::Remote { .. } => ErrorKind::Remote,
            FetchError::Fetcher(_) => ErrorKind::Fetcher,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The remote could not be reached
    Connectivity,
    /// The remote answered with a failure
    Remote,
    /// The fetch logic itself failed
    Fetcher,
}

impl ErrorKind {
    /// Classify a fetch failure by walking its cause chain.
    pub fn classify(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(fetch) = cause.downcast_ref::<FetchError>() {
                return fetch.kind();
            }
            if let Some(api) = cause.downcast_ref::<ApiError>() {
                return match api {
                    ApiError::NetworkError(e) if is_transport_error(e) => ErrorKind::Connectivity,
                    ApiError::NetworkError(_) | ApiError::InvalidResponse(_) => ErrorKind::Fetcher,
                    _ => ErrorKind::Remote,
                };
            }
            if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
                if is_transport_error(e) {
                    return ErrorKind::Connectivity;
                }
                if e.is_status() {
                    return ErrorKind::Remote;
                }
            }
        }
        ErrorKind::Fetcher
    }
}

/// The request never got an answer: no connection or no response in time.
fn is_transport_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout()
}

/// The last failure recorded for a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::classify(err),
            message: format!("{:#}", err),
            at: Utc::now(),
        }
    }
}
