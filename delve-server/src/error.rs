//! Error types for delve-server
//!
//! Every handler and service returns [`ApiResult`]. The response body is
//! `{"error": {"code": CODE, "message": MSG}}`; `InsufficientCredits`
//! additionally carries `required` and `balance` at the top level.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// No valid session token (401)
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Missing or malformed input (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller has no active organization (400)
    #[error("No active organization")]
    NoActiveOrganization,

    /// Research type has no cost entry (400)
    #[error("Invalid research type: {0}")]
    InvalidResearchType(String),

    /// Balance below the required amount (402)
    #[error("Insufficient credits: required {required}, balance {balance}")]
    InsufficientCredits { required: i64, balance: i64 },

    /// Plan does not allow the research type (403); carries the plan's reason
    #[error("{0}")]
    ResearchTypeNotAllowed(String),

    /// Role lacks the permission, or caller is not a member (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Internal inconsistency (500)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// delve-common error
    #[error("Common error: {0}")]
    Common(#[from] delve_common::Error),
}

impl ApiError {
    /// Machine-checkable error code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "UNAUTHENTICATED",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::NoActiveOrganization => "NO_ACTIVE_ORGANIZATION",
            ApiError::InvalidResearchType(_) => "INVALID_RESEARCH_TYPE",
            ApiError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            ApiError::ResearchTypeNotAllowed(_) => "RESEARCH_TYPE_NOT_ALLOWED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::Common(delve_common::Error::InvalidInput(_)) => "VALIDATION_ERROR",
            ApiError::Common(_) => "COMMON_ERROR",
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_)
            | ApiError::NoActiveOrganization
            | ApiError::InvalidResearchType(_) => StatusCode::BAD_REQUEST,
            ApiError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::ResearchTypeNotAllowed(_) | ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Common(delve_common::Error::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_)
            | ApiError::Internal(_)
            | ApiError::Database(_)
            | ApiError::Common(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if status.is_server_error() {
            tracing::error!(code, "Request failed: {}", self);
        }

        let body = match &self {
            ApiError::InsufficientCredits { required, balance } => json!({
                "error": {
                    "code": code,
                    "message": self.to_string(),
                },
                "required": required,
                "balance": balance,
            }),
            _ => json!({
                "error": {
                    "code": code,
                    "message": self.to_string(),
                }
            }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers and services
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_insufficient_credits_carries_amounts() {
        let (status, body) = body_json(ApiError::InsufficientCredits {
            required: 10,
            balance: 5,
        })
        .await;

        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"]["code"], "INSUFFICIENT_CREDITS");
        assert_eq!(body["required"], 10);
        assert_eq!(body["balance"], 5);
    }

    #[tokio::test]
    async fn test_plan_rejection_is_forbidden() {
        let (status, body) =
            body_json(ApiError::ResearchTypeNotAllowed("Upgrade to Pro".to_string())).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "RESEARCH_TYPE_NOT_ALLOWED");
        assert_eq!(body["error"]["message"], "Upgrade to Pro");
    }

    #[test]
    fn test_common_invalid_input_maps_to_400() {
        let err = ApiError::from("superuser".parse::<crate::models::Role>().unwrap_err());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
