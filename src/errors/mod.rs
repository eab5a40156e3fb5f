//! Error type definitions for the HLS relay.
//!
//! Covers the error kinds that surface from the proxy's data path: `BadRequest`,
//! `UpstreamFailure`, `TransportFailure`, and `Disabled` all surface to the
//! HTTP boundary with a specific status code. `PrefetchFailure` has no
//! variant here: it never reaches the boundary, it is logged and swallowed
//! inside the prefetch orchestrator.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Top-level relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Missing `url`, unparseable `headers` JSON, or an unresolvable URI.
    #[error("{0}")]
    BadRequest(String),

    /// The origin responded with a non-2xx status during a manifest fetch.
    #[error("upstream returned {status} {status_text}")]
    UpstreamFailure {
        status: u16,
        status_text: String,
    },

    /// Connection reset, DNS failure, or pool exhaustion that also failed
    /// the non-pooled fallback fetch.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] reqwest::Error),

    /// The feature is disabled via an environment switch.
    #[error("{0}")]
    Disabled(&'static str),

    /// Catch-all for unexpected internal failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            RelayError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            RelayError::UpstreamFailure { .. } => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            RelayError::TransportFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            RelayError::Disabled(msg) => (StatusCode::NOT_FOUND, msg.to_string()),
            RelayError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        (status, message).into_response()
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
