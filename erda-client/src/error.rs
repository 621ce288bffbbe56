//! Error types for the erda pipeline client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the pipeline client
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API answered with an error envelope or an error status code
    #[error("API error (status {status}, code {code}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Stable error code, e.g. `ErrRunPipeline.InvalidState`
        code: String,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl ClientError {
    /// Create an API error from status code, code and message
    pub fn api_error(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let err = ClientError::api_error(404, "ErrGetPipeline.NotFound", "pipeline 1 not found");
        assert!(err.is_not_found());
        assert!(err.is_client_error());
        assert!(!err.is_server_error());

        let err = ClientError::api_error(500, "ErrRunPipeline.InternalError", "boom");
        assert!(err.is_server_error());
        assert!(!err.is_not_found());
    }
}
