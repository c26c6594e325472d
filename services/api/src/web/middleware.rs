//! services/api/src/web/middleware.rs
//!
//! Caller identification for protected routes.

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use tracing::warn;
use uuid::Uuid;

/// The header carrying the authenticated caller's id, set by the upstream gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The caller identity inserted into request extensions by [`require_user`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub Uuid);

/// Middleware that reads the `x-user-id` header and extracts the user_id.
///
/// If valid, inserts a [`CurrentUser`] into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_user(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let header = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let user_id = Uuid::parse_str(header.trim()).map_err(|_| {
        warn!("Rejected malformed {} header", USER_ID_HEADER);
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(CurrentUser(user_id));
    Ok(next.run(req).await)
}
