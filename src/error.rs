use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("Missing payout details: {0}")]
    MissingPayoutDetails(String),
    #[error("Payment gateway error: {0}")]
    Gateway(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            AppError::InsufficientBalance(_) => "INSUFFICIENT_BALANCE",
            AppError::MissingPayoutDetails(_) => "MISSING_PAYOUT_DETAILS",
            AppError::Gateway(_) => "GATEWAY_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DeadlineExceeded(_)
            | AppError::InsufficientBalance(_)
            | AppError::MissingPayoutDetails(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "code": self.code(),
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
