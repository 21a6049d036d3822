//! Registration, login, and OTP verification endpoints.

use crate::middleware::CurrentUser;
use crate::{auth_err_to_api, ApiError, AppState};
use axum::{extract::Extension, http::StatusCode, response::Json};
use chrono::Utc;
use companion_auth::{
    invalidate_code, issue_login_otp, issue_registration, issue_token, resend_otp, verify_otp,
    AuthError, IssuedOtp,
};
use companion_types::OtpAction;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp_code: String,
    pub action: String,
}

#[derive(Deserialize)]
pub struct ResendOtpRequest {
    pub email: String,
    pub action: String,
}

/// Barely-more-than-nothing email shape check. Real validation is the
/// delivery attempt itself.
fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.ends_with('.'),
        None => false,
    };
    if !valid {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            "invalid email address".to_string(),
        ));
    }
    Ok(email)
}

fn parse_action(raw: &str) -> Result<OtpAction, ApiError> {
    OtpAction::parse(raw).ok_or_else(|| {
        ApiError(
            StatusCode::BAD_REQUEST,
            "action must be \"login\" or \"register\"".to_string(),
        )
    })
}

/// Emails an issued code; on delivery failure the code is invalidated so it
/// can never be verified, and the caller reports a delivery error.
async fn deliver_code(state: &Arc<AppState>, issued: &IssuedOtp) -> Result<(), ApiError> {
    if let Err(e) = state
        .mailer
        .send_otp(&issued.email, &issued.code, issued.action)
        .await
    {
        tracing::error!(email = %issued.email, error = %e, "otp delivery failed");
        let pool = state.pool.clone();
        let otp_id = issued.otp_id;
        let invalidated = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|_| AuthError::Delivery)?;
            invalidate_code(&conn, otp_id)
        })
        .await;
        if !matches!(invalidated, Ok(Ok(()))) {
            tracing::error!(otp_id, "failed to invalidate undeliverable code");
        }
        return Err(auth_err_to_api(AuthError::Delivery));
    }
    Ok(())
}

/// POST /api/auth/register
pub async fn register_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<Value>, ApiError> {
    let email = normalize_email(&payload.email)?;
    let password = payload.password;

    let pool = state.pool.clone();
    let issued = tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|_| ApiError::from(StatusCode::INTERNAL_SERVER_ERROR))?;
        issue_registration(&conn, &email, &password, Utc::now()).map_err(auth_err_to_api)
    })
    .await
    .map_err(|_| ApiError::from(StatusCode::INTERNAL_SERVER_ERROR))??;

    deliver_code(&state, &issued).await?;

    tracing::info!(email = %issued.email, "registration code issued");
    Ok(Json(json!({
        "message": "A verification code has been sent to your email.",
        "email": issued.email,
    })))
}

/// POST /api/auth/login
pub async fn login_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let email = normalize_email(&payload.email)?;
    let password = payload.password;

    let pool = state.pool.clone();
    let issued = tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|_| ApiError::from(StatusCode::INTERNAL_SERVER_ERROR))?;
        issue_login_otp(&conn, &email, &password, Utc::now()).map_err(auth_err_to_api)
    })
    .await
    .map_err(|_| ApiError::from(StatusCode::INTERNAL_SERVER_ERROR))??;

    deliver_code(&state, &issued).await?;

    Ok(Json(json!({
        "message": "A sign-in code has been sent to your email.",
        "email": issued.email,
    })))
}

/// POST /api/auth/verify-otp
pub async fn verify_otp_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Json<Value>, ApiError> {
    let email = normalize_email(&payload.email)?;
    let action = parse_action(&payload.action)?;
    let code = payload.otp_code.trim().to_string();

    let pool = state.pool.clone();
    let verify_email = email.clone();
    let (user, activated) = tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|_| ApiError::from(StatusCode::INTERNAL_SERVER_ERROR))?;
        verify_otp(&conn, &verify_email, &code, action, Utc::now()).map_err(auth_err_to_api)
    })
    .await
    .map_err(|_| ApiError::from(StatusCode::INTERNAL_SERVER_ERROR))??;

    if activated {
        // Best-effort. The account is already active either way.
        if let Err(e) = state.mailer.send_welcome(&user.email).await {
            tracing::warn!(email = %user.email, error = %e, "welcome mail failed");
        }
    }

    let token = issue_token(
        &state.jwt_secret,
        &user.email,
        user.id,
        state.token_ttl_minutes,
        Utc::now(),
    )
    .map_err(auth_err_to_api)?;

    let message = if activated {
        "Account verified. Welcome!"
    } else {
        "Signed in successfully."
    };

    Ok(Json(json!({
        "token": token,
        "message": message,
        "user_email": user.email,
    })))
}

/// POST /api/auth/resend-otp
pub async fn resend_otp_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<ResendOtpRequest>,
) -> Result<Json<Value>, ApiError> {
    let email = normalize_email(&payload.email)?;
    let action = parse_action(&payload.action)?;

    let pool = state.pool.clone();
    let issued = tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|_| ApiError::from(StatusCode::INTERNAL_SERVER_ERROR))?;
        resend_otp(&conn, &email, action, Utc::now()).map_err(auth_err_to_api)
    })
    .await
    .map_err(|_| ApiError::from(StatusCode::INTERNAL_SERVER_ERROR))??;

    deliver_code(&state, &issued).await?;

    Ok(Json(json!({
        "message": "A new verification code has been sent.",
        "email": issued.email,
    })))
}

/// GET /api/auth/validate
pub async fn validate_handler(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<Value> {
    Json(json!({
        "valid": true,
        "email": user.email,
        "last_login": user.last_login,
    }))
}

/// GET /api/user/profile
pub async fn profile_handler(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<Value> {
    Json(json!({
        "email": user.email,
        "created_at": user.created_at,
        "last_login": user.last_login,
        "is_active": user.is_active,
    }))
}

/// POST /api/auth/logout
///
/// Tokens are stateless; logout exists so clients have a uniform endpoint
/// to call when discarding a session.
pub async fn logout_handler() -> Json<Value> {
    Json(json!({ "message": "Logged out successfully." }))
}
