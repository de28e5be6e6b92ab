//! HTTP API handlers for delve-server

pub mod auth;
pub mod credits;
pub mod events;
pub mod health;
pub mod history;
pub mod organization;
pub mod payment;
pub mod research;
pub mod subscription;

pub use auth::AuthUser;
pub use credits::credits_routes;
pub use events::event_routes;
pub use health::health_routes;
pub use history::history_routes;
pub use organization::organization_routes;
pub use payment::payment_routes;
pub use research::research_routes;
pub use subscription::subscription_routes;

use axum::async_trait;
use axum::extract::{rejection::JsonRejection, FromRequest, Request};
use axum::Json;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// JSON body whose rejections surface as `VALIDATION_ERROR`
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
        Ok(ValidJson(value))
    }
}

/// Required string field: present and non-blank
pub(crate) fn required(value: Option<String>, field: &str) -> ApiResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ApiError::Validation(format!("{} is required", field))),
    }
}

/// Required UUID field given as a string
pub(crate) fn required_id(value: Option<String>, field: &str) -> ApiResult<Uuid> {
    let raw = required(value, field)?;
    Uuid::parse_str(&raw).map_err(|_| ApiError::Validation(format!("{} is not a valid id", field)))
}
