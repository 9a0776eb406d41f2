use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use skybook_core::CoreError;

#[derive(Debug)]
pub enum AppError {
    Core(CoreError),
    /// The request could not be read at all (bad JSON, bad path, missing header).
    BadRequest(String),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Core(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::ValidationError(_) => StatusCode::BAD_REQUEST,
        CoreError::FlightNotFound(_) | CoreError::BookingNotFound(_) => StatusCode::NOT_FOUND,
        CoreError::CapacityExceeded { .. } => StatusCode::CONFLICT,
        CoreError::StoreUnavailable(_) | CoreError::BusUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::ConsistencyViolation(_) | CoreError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = match self {
            AppError::BadRequest(msg) => {
                let body = Json(json!({ "error": msg, "code": "VALIDATION_ERROR" }));
                return (StatusCode::BAD_REQUEST, body).into_response();
            }
            AppError::Core(err) => err,
        };

        let status = status_for(&err);
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(code = err.code(), "Internal Server Error: {}", err);
            "Internal Server Error".to_string()
        } else {
            err.to_string()
        };

        let body = if err.is_retryable() {
            tracing::warn!(code = err.code(), "Dependency unavailable: {}", err);
            json!({ "error": message, "code": err.code(), "retryable": true })
        } else {
            json!({ "error": message, "code": err.code() })
        };

        (status, Json(body)).into_response()
    }
}
