//! One-time code issuance, supersession, and single-use verification.
//!
//! Every operation that reads then writes OTP state runs in one SQLite
//! transaction. Two concurrent logins cannot both observe "no prior unused
//! code", and two concurrent verifications of the same code cannot both
//! consume it.

use crate::{
    find_user_by_email, format_ts, hash_password, map_row_to_user_cols, verify_password,
    AuthError, User, MIN_PASSWORD_LEN,
};
use chrono::{DateTime, Duration, Utc};
use companion_types::OtpAction;
use rusqlite::{params, Connection, OptionalExtension};

/// Minutes before an issued code expires.
pub const OTP_TTL_MINUTES: i64 = 10;

/// Seconds a user must wait between resend requests for the same action.
pub const RESEND_WINDOW_SECS: i64 = 60;

/// A freshly issued one-time code, returned to the caller so the delivery
/// step (email) can happen after the transaction commits.
#[derive(Debug, Clone)]
pub struct IssuedOtp {
    /// Row id of the code, for compensating invalidation on delivery failure.
    pub otp_id: i64,
    pub user_id: i64,
    pub email: String,
    pub code: String,
    pub action: OtpAction,
}

/// Generates a 6-digit numeric code.
fn generate_code() -> String {
    use rand::Rng;
    let n: u32 = rand::rngs::OsRng.gen_range(0..1_000_000);
    format!("{n:06}")
}

/// Inserts a code row for the given user and action. Caller provides the
/// enclosing transaction.
fn insert_code(
    conn: &Connection,
    user_id: i64,
    action: OtpAction,
    now: DateTime<Utc>,
) -> Result<(i64, String), AuthError> {
    let code = generate_code();
    let expires_at = format_ts(now + Duration::minutes(OTP_TTL_MINUTES));
    conn.execute(
        "INSERT INTO otp_codes (user_id, code, action, expires_at, is_used, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        params![user_id, code, action.as_str(), expires_at, format_ts(now)],
    )?;
    Ok((conn.last_insert_rowid(), code))
}

/// Marks every unused code for (user, action) as used.
fn supersede_unused(conn: &Connection, user_id: i64, action: OtpAction) -> Result<(), AuthError> {
    conn.execute(
        "UPDATE otp_codes SET is_used = 1
         WHERE user_id = ?1 AND action = ?2 AND is_used = 0",
        params![user_id, action.as_str()],
    )?;
    Ok(())
}

/// Registers a new user and issues a registration code.
///
/// The user row (inactive) and the code are created in one transaction; the
/// caller sends the email only after this returns. If delivery fails, the
/// caller invalidates the code with [`invalidate_code`] — the committed user
/// stays inactive and recovers via resend, it is never rolled back.
pub fn issue_registration(
    conn: &Connection,
    email: &str,
    password: &str,
    now: DateTime<Utc>,
) -> Result<IssuedOtp, AuthError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }

    let password_hash = hash_password(password);

    let tx = conn.unchecked_transaction()?;
    // The UNIQUE index on users.email is the authoritative duplicate check:
    // a racing registration still surfaces as EmailTaken, not as a database
    // error.
    tx.execute(
        "INSERT INTO users (email, password_hash, is_active, created_at)
         VALUES (?1, ?2, 0, ?3)",
        params![email, password_hash, format_ts(now)],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            AuthError::EmailTaken
        }
        other => AuthError::from(other),
    })?;
    let user_id = tx.last_insert_rowid();
    let (otp_id, code) = insert_code(&tx, user_id, OtpAction::Register, now)?;
    tx.commit()?;

    Ok(IssuedOtp {
        otp_id,
        user_id,
        email: email.to_string(),
        code,
        action: OtpAction::Register,
    })
}

/// Checks credentials and issues a login code.
///
/// Prior unused login codes are superseded in the same transaction that
/// issues the new one. Unknown email and wrong password produce the same
/// error kind.
pub fn issue_login_otp(
    conn: &Connection,
    email: &str,
    password: &str,
    now: DateTime<Utc>,
) -> Result<IssuedOtp, AuthError> {
    let user = find_user_by_email(conn, email)?.ok_or(AuthError::InvalidCredentials)?;
    if !verify_password(password, &user.password_hash) {
        return Err(AuthError::InvalidCredentials);
    }
    if !user.is_active {
        return Err(AuthError::Inactive);
    }

    let tx = conn.unchecked_transaction()?;
    supersede_unused(&tx, user.id, OtpAction::Login)?;
    let (otp_id, code) = insert_code(&tx, user.id, OtpAction::Login, now)?;
    tx.commit()?;

    Ok(IssuedOtp {
        otp_id,
        user_id: user.id,
        email: user.email,
        code,
        action: OtpAction::Login,
    })
}

/// Verifies a code and consumes it.
///
/// On success the code is marked used, `last_login` is updated, and for a
/// registration the user is activated — all in one transaction. Returns the
/// user as it stands after the transaction plus whether this verification
/// activated the account (the caller sends the welcome email for those).
pub fn verify_otp(
    conn: &Connection,
    email: &str,
    code: &str,
    action: OtpAction,
    now: DateTime<Utc>,
) -> Result<(User, bool), AuthError> {
    let user = find_user_by_email(conn, email)?.ok_or(AuthError::UserNotFound)?;
    let now_str = format_ts(now);

    let tx = conn.unchecked_transaction()?;
    let otp_id: Option<i64> = tx
        .query_row(
            "SELECT id FROM otp_codes
             WHERE user_id = ?1 AND code = ?2 AND action = ?3
               AND is_used = 0 AND expires_at > ?4",
            params![user.id, code, action.as_str(), now_str],
            |row| row.get(0),
        )
        .optional()?;
    let otp_id = otp_id.ok_or(AuthError::InvalidCode)?;

    tx.execute("UPDATE otp_codes SET is_used = 1 WHERE id = ?1", [otp_id])?;

    let activated = action == OtpAction::Register && !user.is_active;
    if activated {
        tx.execute("UPDATE users SET is_active = 1 WHERE id = ?1", [user.id])?;
    }
    tx.execute(
        "UPDATE users SET last_login = ?1 WHERE id = ?2",
        params![now_str, user.id],
    )?;

    let updated = tx.query_row(
        "SELECT id, email, password_hash, is_active, created_at, last_login
         FROM users WHERE id = ?1",
        [user.id],
        map_row_to_user_cols,
    )?;
    tx.commit()?;

    Ok((updated, activated))
}

/// Issues a replacement code for (user, action).
///
/// Rate-limited to one code per [`RESEND_WINDOW_SECS`]: any code created
/// inside the window — used or not — blocks the resend. Prior unused codes
/// are superseded before the new one is issued.
pub fn resend_otp(
    conn: &Connection,
    email: &str,
    action: OtpAction,
    now: DateTime<Utc>,
) -> Result<IssuedOtp, AuthError> {
    let user = find_user_by_email(conn, email)?.ok_or(AuthError::UserNotFound)?;
    let window_start = format_ts(now - Duration::seconds(RESEND_WINDOW_SECS));

    let tx = conn.unchecked_transaction()?;
    let recent: i64 = tx.query_row(
        "SELECT COUNT(*) FROM otp_codes
         WHERE user_id = ?1 AND action = ?2 AND created_at > ?3",
        params![user.id, action.as_str(), window_start],
        |row| row.get(0),
    )?;
    if recent > 0 {
        return Err(AuthError::RateLimited);
    }

    supersede_unused(&tx, user.id, action)?;
    let (otp_id, code) = insert_code(&tx, user.id, action, now)?;
    tx.commit()?;

    Ok(IssuedOtp {
        otp_id,
        user_id: user.id,
        email: user.email,
        code,
        action,
    })
}

/// Compensating action: marks a code used after its delivery email failed,
/// so an undeliverable code can never be verified later.
pub fn invalidate_code(conn: &Connection, otp_id: i64) -> Result<(), AuthError> {
    conn.execute("UPDATE otp_codes SET is_used = 1 WHERE id = ?1", [otp_id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_db::{open_pool, run_migrations, PoolSettings};

    fn setup() -> companion_db::DbPool {
        // Single connection: each pooled connection would otherwise get its
        // own private in-memory database.
        let settings = PoolSettings {
            max_connections: 1,
            ..PoolSettings::default()
        };
        let pool = open_pool(":memory:", settings).unwrap();
        run_migrations(&pool.get().unwrap()).unwrap();
        pool
    }

    #[test]
    fn registration_creates_inactive_user_with_code() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let now = Utc::now();

        let issued = issue_registration(&conn, "a@b.com", "secret1", now).unwrap();
        assert_eq!(issued.code.len(), 6);
        assert!(issued.code.chars().all(|c| c.is_ascii_digit()));

        let user = find_user_by_email(&conn, "a@b.com").unwrap().unwrap();
        assert!(!user.is_active);
    }

    #[test]
    fn duplicate_email_and_weak_password_are_rejected() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let now = Utc::now();

        issue_registration(&conn, "a@b.com", "secret1", now).unwrap();
        assert!(matches!(
            issue_registration(&conn, "a@b.com", "secret1", now),
            Err(AuthError::EmailTaken)
        ));
        assert!(matches!(
            issue_registration(&conn, "c@d.com", "short", now),
            Err(AuthError::WeakPassword)
        ));
    }

    #[test]
    fn registration_losing_an_insert_race_reports_email_taken() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let now = Utc::now();

        // A competing registration committed its row first.
        conn.execute(
            "INSERT INTO users (email, password_hash, is_active, created_at)
             VALUES ('a@b.com', 'x', 0, '2026-01-01 00:00:00')",
            [],
        )
        .unwrap();

        assert!(matches!(
            issue_registration(&conn, "a@b.com", "secret1", now),
            Err(AuthError::EmailTaken)
        ));
    }

    #[test]
    fn verify_activates_user_and_consumes_code_once() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let now = Utc::now();

        let issued = issue_registration(&conn, "a@b.com", "secret1", now).unwrap();
        let (user, activated) =
            verify_otp(&conn, "a@b.com", &issued.code, OtpAction::Register, now).unwrap();
        assert!(activated);
        assert!(user.is_active);
        assert!(user.last_login.is_some());

        // Second use of the same code fails.
        assert!(matches!(
            verify_otp(&conn, "a@b.com", &issued.code, OtpAction::Register, now),
            Err(AuthError::InvalidCode)
        ));
    }

    #[test]
    fn expired_code_is_rejected() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let now = Utc::now();

        let issued = issue_registration(&conn, "a@b.com", "secret1", now).unwrap();
        let later = now + Duration::minutes(OTP_TTL_MINUTES + 1);
        assert!(matches!(
            verify_otp(&conn, "a@b.com", &issued.code, OtpAction::Register, later),
            Err(AuthError::InvalidCode)
        ));
    }

    #[test]
    fn wrong_action_does_not_match() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let now = Utc::now();

        let issued = issue_registration(&conn, "a@b.com", "secret1", now).unwrap();
        assert!(matches!(
            verify_otp(&conn, "a@b.com", &issued.code, OtpAction::Login, now),
            Err(AuthError::InvalidCode)
        ));
    }

    #[test]
    fn login_requires_active_user_and_correct_password() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let now = Utc::now();

        let issued = issue_registration(&conn, "a@b.com", "secret1", now).unwrap();

        // Not yet activated.
        assert!(matches!(
            issue_login_otp(&conn, "a@b.com", "secret1", now),
            Err(AuthError::Inactive)
        ));

        verify_otp(&conn, "a@b.com", &issued.code, OtpAction::Register, now).unwrap();

        assert!(matches!(
            issue_login_otp(&conn, "a@b.com", "wrong-pass", now),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            issue_login_otp(&conn, "nobody@b.com", "secret1", now),
            Err(AuthError::InvalidCredentials)
        ));

        let login = issue_login_otp(&conn, "a@b.com", "secret1", now).unwrap();
        assert_eq!(login.action, OtpAction::Login);
    }

    #[test]
    fn new_login_code_supersedes_prior_unused() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let now = Utc::now();

        let reg = issue_registration(&conn, "a@b.com", "secret1", now).unwrap();
        verify_otp(&conn, "a@b.com", &reg.code, OtpAction::Register, now).unwrap();

        let first = issue_login_otp(&conn, "a@b.com", "secret1", now).unwrap();
        let second = issue_login_otp(&conn, "a@b.com", "secret1", now).unwrap();

        assert!(matches!(
            verify_otp(&conn, "a@b.com", &first.code, OtpAction::Login, now),
            Err(AuthError::InvalidCode)
        ));
        verify_otp(&conn, "a@b.com", &second.code, OtpAction::Login, now).unwrap();
    }

    #[test]
    fn resend_is_rate_limited_within_window() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let now = Utc::now();

        let reg = issue_registration(&conn, "a@b.com", "secret1", now).unwrap();

        // Immediately after registration the window is still open.
        assert!(matches!(
            resend_otp(&conn, "a@b.com", OtpAction::Register, now),
            Err(AuthError::RateLimited)
        ));

        // Past the window: succeeds and supersedes the original code.
        let later = now + Duration::seconds(RESEND_WINDOW_SECS + 1);
        let resent = resend_otp(&conn, "a@b.com", OtpAction::Register, later).unwrap();
        assert!(matches!(
            verify_otp(&conn, "a@b.com", &reg.code, OtpAction::Register, later),
            Err(AuthError::InvalidCode)
        ));
        verify_otp(&conn, "a@b.com", &resent.code, OtpAction::Register, later).unwrap();
    }

    #[test]
    fn resend_for_unknown_user_is_not_found() {
        let pool = setup();
        let conn = pool.get().unwrap();
        assert!(matches!(
            resend_otp(&conn, "ghost@b.com", OtpAction::Login, Utc::now()),
            Err(AuthError::UserNotFound)
        ));
    }

    #[test]
    fn invalidated_code_cannot_be_verified() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let now = Utc::now();

        let issued = issue_registration(&conn, "a@b.com", "secret1", now).unwrap();
        invalidate_code(&conn, issued.otp_id).unwrap();
        assert!(matches!(
            verify_otp(&conn, "a@b.com", &issued.code, OtpAction::Register, now),
            Err(AuthError::InvalidCode)
        ));

        // The user survives the compensation, inactive and resend-recoverable.
        let user = find_user_by_email(&conn, "a@b.com").unwrap().unwrap();
        assert!(!user.is_active);
    }
}
