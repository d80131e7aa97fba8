use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response, StatusCode};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to backend fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when request times out
    #[error("Timeout error after {0:?}")]
    Timeout(Duration),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The backend answered but the payload could not be used
    #[error("Invalid response from {url}: {reason}")]
    InvalidResponse {
        /// The URL that was requested
        url: String,
        /// Why the payload was rejected
        reason: String,
    },

    /// Error when backend returns an error status code
    #[error("Backend returned error status: {status}, url: {url}")]
    BackendError {
        /// The URL that was requested
        url: String,
        /// The status code returned by the backend
        status: StatusCode,
    },
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for making HTTP requests to backends
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to a backend server
    ///
    /// The request URI must be absolute. The body is streamed, never buffered, and the
    /// response body is handed back as a stream too.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;

    /// GET `url` and report whether the backend answered with a 2xx status.
    ///
    /// Connection failures are reported as `Ok(false)`; only the timeout is an error.
    async fn probe(&self, url: &str, timeout: Duration) -> HttpClientResult<bool>;

    /// GET `url` and decode the body as JSON.
    async fn fetch_json(&self, url: &str, timeout: Duration)
    -> HttpClientResult<serde_json::Value>;
}
