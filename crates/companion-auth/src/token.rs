//! Signed session tokens (JWT, HS256).
//!
//! Tokens carry the subject email and internal user id. Expiry is the only
//! termination mechanism — there is no revocation list, which is an
//! accepted limitation at this scope.

use crate::AuthError;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's email address.
    pub sub: String,
    /// Internal user id.
    pub user_id: i64,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
}

/// Issues a session token for the given user.
pub fn issue_token(
    secret: &[u8],
    email: &str,
    user_id: i64,
    ttl_minutes: i64,
    now: DateTime<Utc>,
) -> Result<String, AuthError> {
    let claims = Claims {
        sub: email.to_string(),
        user_id,
        iat: now.timestamp(),
        exp: (now + Duration::minutes(ttl_minutes)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| {
        tracing::error!(error = %e, "failed to sign session token");
        AuthError::Token
    })
}

/// Verifies a session token's signature and expiry, returning its claims.
///
/// Whether the subject still resolves to an active user is checked
/// separately by [`crate::resolve_active_user`].
pub fn verify_token(secret: &[u8], token: &str) -> Result<Claims, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::default(),
    )
    .map_err(|_| AuthError::Token)?;
    Ok(data.claims)
}
