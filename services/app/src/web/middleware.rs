//! services/app/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::web::error::ApiError;

/// The caller's bearer token, forwarded unchanged to the backend.
#[derive(Debug, Clone)]
pub struct AccessToken(pub String);

/// Middleware that extracts the `Authorization: Bearer` token.
///
/// If present, inserts an [`AccessToken`] into request extensions for handlers to use.
/// If missing or malformed, returns 401 with an `{error}` body.
pub async fn require_bearer(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Missing bearer token"))?
        .to_string();

    req.extensions_mut().insert(AccessToken(token));
    Ok(next.run(req).await)
}
