//! Request authentication
//!
//! Credential issuance is out of scope; a request carries an opaque token
//! (`Authorization: Bearer <token>` or the `delve_session` cookie) that
//! resolves to a user through `auth_tokens`.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use tracing::debug;

use crate::db;
use crate::error::ApiError;
use crate::models::User;
use crate::AppState;

/// Cookie carrying the session token
pub const SESSION_COOKIE: &str = "delve_session";

/// Authenticated caller; rejects with 401
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .or_else(|| cookie_token(&parts.headers))
            .ok_or(ApiError::Unauthenticated)?;

        match db::users::user_for_token(&state.db, &token, delve_common::time::now()).await? {
            Some(user) => Ok(AuthUser(user)),
            None => {
                debug!("Rejected unknown or expired token");
                Err(ApiError::Unauthenticated)
            }
        }
    }
}
