//! Companion server library logic.
//!
//! Composition root for the HTTP surface: router construction, shared
//! application state, and the JSON error shape used by every handler.

pub mod api_auth;
pub mod api_chat;
pub mod api_interact;
pub mod config;
pub mod middleware;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use companion_auth::AuthError;
use companion_db::DbPool;
use companion_providers::{InteractionPipeline, Mailer, Responder};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Maximum request body size (10 MiB). Interaction requests carry
/// base64-encoded audio in the JSON body.
const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// The full voice interaction pipeline.
    pub pipeline: Arc<InteractionPipeline>,
    /// The responder alone, for the text-only chat flow.
    pub responder: Arc<dyn Responder>,
    /// Outbound mail delivery.
    pub mailer: Arc<dyn Mailer>,
    /// Name of the generation model presented in the character profile.
    pub primary_model: String,
    /// HMAC secret for session tokens.
    pub jwt_secret: Vec<u8>,
    /// Session token lifetime in minutes.
    pub token_ttl_minutes: i64,
}

/// An error response: a status code plus a user-facing message rendered as
/// `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError(pub StatusCode, pub String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

impl From<StatusCode> for ApiError {
    fn from(status: StatusCode) -> Self {
        let message = status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
        ApiError(status, message)
    }
}

/// Maps an [`AuthError`] to its HTTP status, keeping the error's own
/// message as the response body. Database errors are logged and hidden.
pub(crate) fn auth_err_to_api(e: AuthError) -> ApiError {
    let status = match &e {
        AuthError::EmailTaken | AuthError::WeakPassword | AuthError::InvalidCode => {
            StatusCode::BAD_REQUEST
        }
        AuthError::InvalidCredentials | AuthError::Inactive | AuthError::Token => {
            StatusCode::UNAUTHORIZED
        }
        AuthError::UserNotFound => StatusCode::NOT_FOUND,
        AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        AuthError::Delivery => StatusCode::INTERNAL_SERVER_ERROR,
        AuthError::Database(err) => {
            tracing::error!(error = %err, "auth database operation failed");
            return ApiError(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            );
        }
    };
    ApiError(status, e.to_string())
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/api/interact", post(api_interact::interact_handler))
        .route("/api/auth/validate", get(api_auth::validate_handler))
        .route("/api/auth/logout", post(api_auth::logout_handler))
        .route("/api/chat/send", post(api_chat::send_handler))
        .route(
            "/api/chat/history",
            get(api_chat::history_handler).delete(api_chat::clear_history_handler),
        )
        .route("/api/chat/stats", get(api_chat::stats_handler))
        .route("/api/chat/character", get(api_chat::character_handler))
        .route("/api/user/profile", get(api_auth::profile_handler))
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(api_auth::register_handler))
        .route("/api/auth/login", post(api_auth::login_handler))
        .route("/api/auth/verify-otp", post(api_auth::verify_otp_handler))
        .route("/api/auth/resend-otp", post(api_auth::resend_otp_handler))
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
