use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::dao::storage::StorageError;

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// The entity is not in a state that allows the operation.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Concurrent writers kept invalidating the transaction until retries ran out.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Stored data violates an invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { key } => {
                ServiceError::Conflict(format!("concurrent update of {key}"))
            }
            StorageError::MissingDocument { key } => ServiceError::NotFound(key.to_string()),
            StorageError::InvalidDocument(schema) => ServiceError::Internal(schema.to_string()),
            err @ StorageError::Unavailable { .. } => ServiceError::Unavailable(err),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::IllegalTransition(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Conflict(message) => AppError::Conflict(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::Internal(message) => AppError::Internal(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::entity_store::DocumentKey;

    #[test]
    fn storage_errors_map_onto_service_taxonomy() {
        let conflict = ServiceError::from(StorageError::Conflict {
            key: DocumentKey::QueueGuard("sisa".into()),
        });
        assert!(matches!(conflict, ServiceError::Conflict(_)));

        let missing = ServiceError::from(StorageError::MissingDocument {
            key: DocumentKey::Session(uuid::Uuid::new_v4()),
        });
        assert!(matches!(missing, ServiceError::NotFound(_)));
    }

    #[test]
    fn illegal_transitions_are_http_conflicts() {
        let response =
            AppError::from(ServiceError::IllegalTransition("busy".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = AppError::from(ServiceError::Degraded).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
