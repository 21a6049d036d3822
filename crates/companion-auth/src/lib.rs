//! User accounts, email-based 2FA, and session tokens.
//!
//! Implements the authentication state machine: registration and login
//! issue a one-time code, verification consumes the code exactly once and
//! yields a signed session token. All multi-step store mutations (user +
//! code creation, invalidate-then-issue, verify-then-consume) run inside a
//! single SQLite transaction so no flow can be observed half-applied.
//!
//! States per (user, action): none → issued → {verified | expired |
//! superseded}. A code expires [`OTP_TTL_MINUTES`] after issuance; issuing
//! a new code for the same action supersedes every unused predecessor.

mod otp;
mod password;
mod token;

pub use otp::{
    invalidate_code, issue_login_otp, issue_registration, resend_otp, verify_otp, IssuedOtp,
    OTP_TTL_MINUTES, RESEND_WINDOW_SECS,
};
pub use password::{hash_password, verify_password};
pub use token::{issue_token, verify_token, Claims};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use thiserror::Error;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Errors produced by the auth subsystem.
///
/// Variants are stable kinds for programmatic handling; the HTTP layer maps
/// them to status codes.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("this email address is already registered")]
    EmailTaken,
    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    WeakPassword,
    #[error("email or password is incorrect")]
    InvalidCredentials,
    #[error("account has not been activated; register again or resend the code")]
    Inactive,
    #[error("user not found")]
    UserNotFound,
    #[error("verification code is incorrect or has expired")]
    InvalidCode,
    #[error("a code was already sent recently; wait before requesting another")]
    RateLimited,
    #[error("failed to deliver the verification email")]
    Delivery,
    #[error("invalid or expired session token")]
    Token,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// A user account row.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: String,
    pub last_login: Option<String>,
}

/// Formats a timestamp the way every table in this workspace stores them:
/// UTC RFC 3339 with millisecond precision. One format everywhere keeps
/// lexicographic comparison in SQL valid.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn map_row_to_user_cols(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        is_active: row.get(3)?,
        created_at: row.get(4)?,
        last_login: row.get(5)?,
    })
}

/// Looks up a user by email.
pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>, AuthError> {
    let user = conn
        .query_row(
            "SELECT id, email, password_hash, is_active, created_at, last_login
             FROM users WHERE email = ?1",
            [email],
            map_row_to_user_cols,
        )
        .optional()?;
    Ok(user)
}

/// Looks up a user by its internal id.
pub fn find_user_by_id(conn: &Connection, id: i64) -> Result<Option<User>, AuthError> {
    let user = conn
        .query_row(
            "SELECT id, email, password_hash, is_active, created_at, last_login
             FROM users WHERE id = ?1",
            [id],
            map_row_to_user_cols,
        )
        .optional()?;
    Ok(user)
}

/// Resolves a verified token subject to an active user.
///
/// A token whose subject no longer exists or whose account is inactive is
/// rejected even when the signature and expiry are valid.
pub fn resolve_active_user(conn: &Connection, email: &str) -> Result<User, AuthError> {
    let user = find_user_by_email(conn, email)?.ok_or(AuthError::Token)?;
    if !user.is_active {
        return Err(AuthError::Token);
    }
    Ok(user)
}
