use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Error envelope returned to clients. Success payloads never use this
/// wrapper; it only ever appears on the error path.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub success: bool,
    pub error: ApiError,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// The single error type crossing the HTTP boundary. Variants map 1:1
/// onto the taxonomy in spec §7, plus `Unauthorized` for the §6 auth
/// surface (missing/unparseable credentials, as distinct from
/// `Forbidden`'s role/ownership mismatches).
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("unknown ticker: {0}")]
    UnknownTicker(String),
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("unknown order: {0}")]
    UnknownOrder(String),
    #[error("insufficient balance: {0}")]
    Insufficient(String),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("transient failure: {0}")]
    Transient(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidAmount(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_AMOUNT"),
            AppError::UnknownTicker(_) => (StatusCode::NOT_FOUND, "UNKNOWN_TICKER"),
            AppError::UnknownUser(_) => (StatusCode::NOT_FOUND, "UNKNOWN_USER"),
            AppError::UnknownOrder(_) => (StatusCode::NOT_FOUND, "UNKNOWN_ORDER"),
            AppError::Insufficient(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE"),
            AppError::IllegalState(_) => (StatusCode::BAD_REQUEST, "ILLEGAL_STATE"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::Duplicate(_) => (StatusCode::CONFLICT, "DUPLICATE"),
            AppError::InvariantViolation(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INVARIANT_VIOLATION")
            }
            AppError::Transient(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TRANSIENT"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        let body = ApiErrorBody {
            success: false,
            error: ApiError {
                code: code.to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Transient(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, AppError>;
