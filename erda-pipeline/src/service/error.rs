//! Service Error
//!
//! One error type shared by every pipeline service. The API layer maps each
//! variant to a stable error kind.

use erda_core::merge::OperateError;
use erda_core::yml::YmlError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("failed to parse pipeline yml: {0}")]
    ParsePipelineYml(#[from] YmlError),

    #[error("failed to create pipeline graph: {0}")]
    CreatePipelineGraph(String),

    #[error("pipeline cron {0} not found")]
    NotFoundPipelineCron(i64),

    #[error("{0}")]
    Operate(#[from] OperateError),

    #[error("edge request failed: {0}")]
    Edge(#[from] erda_client::ClientError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse error classes exposed to API callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingParameter,
    InvalidParameter,
    NotFound,
    AccessDenied,
    InvalidState,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingParameter => "MissingParameter",
            ErrorKind::InvalidParameter => "InvalidParameter",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AccessDenied => "AccessDenied",
            ErrorKind::InvalidState => "InvalidState",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::MissingParameter(_) => ErrorKind::MissingParameter,
            ServiceError::InvalidParameter(_)
            | ServiceError::ParsePipelineYml(_)
            | ServiceError::Operate(_) => ErrorKind::InvalidParameter,
            ServiceError::NotFound(_) | ServiceError::NotFoundPipelineCron(_) => {
                ErrorKind::NotFound
            }
            ServiceError::AccessDenied(_) => ErrorKind::AccessDenied,
            ServiceError::InvalidState(_) => ErrorKind::InvalidState,
            ServiceError::Edge(e) if e.is_not_found() => ErrorKind::NotFound,
            ServiceError::CreatePipelineGraph(_)
            | ServiceError::Edge(_)
            | ServiceError::Database(_)
            | ServiceError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(what.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            ServiceError::MissingParameter("pipelineYml".into()).kind(),
            ErrorKind::MissingParameter
        );
        assert_eq!(
            ServiceError::NotFoundPipelineCron(3).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ServiceError::CreatePipelineGraph("boom".into()).kind(),
            ErrorKind::InternalError
        );
        assert_eq!(
            ServiceError::Database(sqlx::Error::RowNotFound).kind(),
            ErrorKind::InternalError
        );
    }

    #[test]
    fn test_yml_error_is_invalid_parameter() {
        let err: ServiceError = YmlError::MissingVersion.into();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }
}
