use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error as ThisError;

use crate::asset::AssetState;
use crate::retry::default_should_retry;

/// Failure reported by (or while talking to) the provider API, before any
/// pipeline context has been attached.
#[derive(ThisError, Debug)]
pub enum ApiError {
    /// The provider answered with a non-success status code
    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
        /// Machine readable reason from `error.details[].reason`, when present
        reason: Option<String>,
    },

    /// The request did not produce a response (connect failure, timeout, TLS)
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A response arrived but could not be interpreted
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            ApiError::Decode(_) => None,
        }
    }

    /// Whether the provider rejected our credentials.
    ///
    /// Gemini answers an invalid key with a 400 carrying the `API_KEY_INVALID` reason rather than a 401.
    pub fn is_auth(&self) -> bool {
        match self {
            ApiError::Status { status: 401 | 403, .. } => true,
            ApiError::Status {
                status: 400,
                reason: Some(reason),
                ..
            } => reason == "API_KEY_INVALID",
            _ => false,
        }
    }

    /// Whether retrying the same request could reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => default_should_retry(*status),
            ApiError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ApiError::Decode(_) => false,
        }
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// The provider rejected the API key. Never retried.
    #[error("Authentication rejected by provider (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    /// Sending the document to the file store failed
    #[error("Failed to upload {}: {message}", path.display())]
    Upload {
        path: PathBuf,
        status: Option<u16>,
        message: String,
    },

    /// A status query failed in a way that may succeed on retry
    #[error("Transient error polling asset {asset_id}: {message}")]
    TransientPoll {
        asset_id: String,
        status: Option<u16>,
        message: String,
    },

    /// A status query failed permanently (e.g. the asset no longer exists)
    #[error("Failed to poll asset {asset_id}: {message}")]
    Poll {
        asset_id: String,
        status: Option<u16>,
        message: String,
    },

    /// The provider reports the asset in its terminal FAILED state
    #[error("Asset {asset_id} failed processing: {reason}")]
    AssetFailed { asset_id: String, reason: String },

    /// A handle that is not ACTIVE was offered for generation
    #[error("Asset {asset_id} is not ready for use (state {state})")]
    AssetNotReady { asset_id: String, state: AssetState },

    /// The poll bound was exhausted while the asset was still processing
    #[error("Gave up waiting for asset {asset_id} after {attempts} polls ({})", humantime::format_duration(*elapsed))]
    PollTimeout {
        asset_id: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("Generation with {model} failed: {message}")]
    Generation {
        model: String,
        status: Option<u16>,
        message: String,
        transient: bool,
    },

    #[error("Context cache operation failed: {message}")]
    Cache { status: Option<u16>, message: String },

    #[error("Context cache {name} expired at {expired_at}")]
    CacheExpired { name: String, expired_at: DateTime<Utc> },

    #[error("Failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Failed to write query output")]
    Output(#[source] std::io::Error),

    #[error("Interrupted before the run completed")]
    Interrupted,

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn upload(path: impl Into<PathBuf>, err: ApiError) -> Self {
        if err.is_auth() {
            return Self::auth(err);
        }
        Error::Upload {
            path: path.into(),
            status: err.status(),
            message: err.to_string(),
        }
    }

    pub fn poll(asset_id: impl Into<String>, err: ApiError) -> Self {
        if err.is_auth() {
            return Self::auth(err);
        }
        let asset_id = asset_id.into();
        if err.is_transient() {
            Error::TransientPoll {
                asset_id,
                status: err.status(),
                message: err.to_string(),
            }
        } else {
            Error::Poll {
                asset_id,
                status: err.status(),
                message: err.to_string(),
            }
        }
    }

    pub fn generation(model: impl Into<String>, err: ApiError) -> Self {
        if err.is_auth() {
            return Self::auth(err);
        }
        Error::Generation {
            model: model.into(),
            status: err.status(),
            transient: err.is_transient(),
            message: err.to_string(),
        }
    }

    pub fn cache(err: ApiError) -> Self {
        if err.is_auth() {
            return Self::auth(err);
        }
        Error::Cache {
            status: err.status(),
            message: err.to_string(),
        }
    }

    fn auth(err: ApiError) -> Self {
        Error::Auth {
            status: err.status().unwrap_or_default(),
            message: err.to_string(),
        }
    }

    /// Whether the operation that produced this error may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientPoll { .. } => true,
            Error::Generation { transient, .. } => *transient,
            _ => false,
        }
    }
}

/// Type alias for pipeline operation results
pub type Result<T> = std::result::Result<T, Error>;
