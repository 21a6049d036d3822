//! Bearer-token authentication middleware.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use companion_auth::{resolve_active_user, verify_token, User};
use std::sync::Arc;

use crate::AppState;

/// The authenticated user, stored in request extensions for handlers.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

/// Authenticates requests via `Authorization: Bearer <jwt>`.
///
/// The token's signature and expiry are checked first, then its subject is
/// resolved against the database. A valid token whose user has been
/// deleted or deactivated is rejected the same way as a bad signature.
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_string();

    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let claims =
        verify_token(&state.jwt_secret, &token).map_err(|_| StatusCode::UNAUTHORIZED)?;

    let pool = state.pool.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        resolve_active_user(&conn, &claims.sub).map_err(|_| StatusCode::UNAUTHORIZED)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    req.extensions_mut().insert(CurrentUser(user));

    Ok(next.run(req).await)
}
