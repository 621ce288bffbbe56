//! API Error Handling
//!
//! Service errors are returned inside the response envelope with a stable
//! code `{operation}.{kind}`, e.g. `ErrCreatePipeline.MissingParameter`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use erda_core::dto::Envelope;

use crate::service::error::{ErrorKind, ServiceError};

/// API error type
#[derive(Debug)]
pub struct ApiError {
    op: &'static str,
    err: ServiceError,
}

impl ApiError {
    pub fn new(op: &'static str, err: ServiceError) -> Self {
        Self { op, err }
    }

    /// Error mapper tagging service errors with the operation that failed
    pub fn op(op: &'static str) -> impl Fn(ServiceError) -> ApiError {
        move |err| ApiError::new(op, err)
    }

    pub fn code(&self) -> String {
        format!("{}.{}", self.op, self.err.kind().as_str())
    }
}

pub fn status_of(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::MissingParameter | ErrorKind::InvalidParameter | ErrorKind::InvalidState => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AccessDenied => StatusCode::FORBIDDEN,
        ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.err.kind();
        let code = self.code();
        let message = match &self.err {
            ServiceError::Database(err) => {
                tracing::error!("{}: database error: {:?}", code, err);
                "Internal server error".to_string()
            }
            err if kind == ErrorKind::InternalError => {
                tracing::error!("{}: {}", code, err);
                err.to_string()
            }
            err => {
                tracing::debug!("{}: {}", code, err);
                err.to_string()
            }
        };

        (status_of(kind), Json(Envelope::<()>::error(code, message))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_and_status() {
        let err = ApiError::new(
            "ErrCreatePipeline",
            ServiceError::MissingParameter("pipelineYml".into()),
        );
        assert_eq!(err.code(), "ErrCreatePipeline.MissingParameter");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err = ApiError::op("ErrGetPipelineDetail")(ServiceError::not_found("pipeline 1"));
        assert_eq!(err.code(), "ErrGetPipelineDetail.NotFound");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(ErrorKind::AccessDenied), StatusCode::FORBIDDEN);
        assert_eq!(status_of(ErrorKind::InvalidState), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(ErrorKind::InternalError),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
