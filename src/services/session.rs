//! Session management.
//!
//! ARCHITECTURE
//! ============
//! HTTP auth uses opaque 32-byte session tokens stored server-side. A
//! session created for an MFA-enrolled user starts `mfa_pending` and is only
//! upgraded once a backup code is redeemed (see `services::mfa`).
//!
//! Tokens are never returned by listing endpoints; sessions are addressed by
//! their row id.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// User row returned from session validation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub mfa_enabled: bool,
    /// Session id (not the token).
    pub session_id: Uuid,
    /// Session still waits for a second factor.
    pub mfa_pending: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub mfa_pending: bool,
    pub current: bool,
}

/// Create a session for the given user, returning the token.
pub async fn create_session(
    pool: &PgPool,
    user_id: Uuid,
    ttl_hours: i64,
    mfa_pending: bool,
    user_agent: Option<&str>,
) -> Result<String, sqlx::Error> {
    let token = generate_token();
    sqlx::query(
        r"INSERT INTO sessions (token, user_id, mfa_pending, user_agent, expires_at)
          VALUES ($1, $2, $3, $4, now() + make_interval(hours => $5))",
    )
    .bind(&token)
    .bind(user_id)
    .bind(mfa_pending)
    .bind(user_agent)
    .bind(i32::try_from(ttl_hours).unwrap_or(i32::MAX))
    .execute(pool)
    .await?;
    Ok(token)
}

/// Validate a session token, touch `last_seen_at`, and return the user.
pub async fn validate_session(pool: &PgPool, token: &str) -> Result<Option<SessionUser>, sqlx::Error> {
    let row = sqlx::query(
        r"UPDATE sessions s
          SET last_seen_at = now()
          FROM users u
          WHERE s.token = $1 AND s.expires_at > now() AND u.id = s.user_id
          RETURNING u.id, u.email, u.name, u.mfa_enabled, s.id AS session_id, s.mfa_pending",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| SessionUser {
        id: r.get("id"),
        email: r.get("email"),
        name: r.get("name"),
        mfa_enabled: r.get("mfa_enabled"),
        session_id: r.get("session_id"),
        mfa_pending: r.get("mfa_pending"),
    }))
}

/// Mark a pending session as fully authenticated.
pub async fn complete_mfa(pool: &PgPool, session_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET mfa_pending = false WHERE id = $1")
        .bind(session_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete a session by token.
pub async fn delete_session(pool: &PgPool, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token = $1")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

/// List live sessions of a user, flagging `current_session_id`.
pub async fn list_sessions(
    pool: &PgPool,
    user_id: Uuid,
    current_session_id: Uuid,
) -> Result<Vec<SessionInfo>, sqlx::Error> {
    let rows = sqlx::query(
        r"SELECT id, user_agent, created_at, last_seen_at, expires_at, mfa_pending
          FROM sessions
          WHERE user_id = $1 AND expires_at > now()
          ORDER BY last_seen_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| {
            let id: Uuid = r.get("id");
            SessionInfo {
                id,
                user_agent: r.get("user_agent"),
                created_at: r.get("created_at"),
                last_seen_at: r.get("last_seen_at"),
                expires_at: r.get("expires_at"),
                mfa_pending: r.get("mfa_pending"),
                current: id == current_session_id,
            }
        })
        .collect())
}

/// Revoke one of the user's sessions. Returns false if it does not exist.
pub async fn revoke_session(pool: &PgPool, user_id: Uuid, session_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE id = $1 AND user_id = $2")
        .bind(session_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Revoke every session of the user except `keep_session_id`.
pub async fn revoke_other_sessions(pool: &PgPool, user_id: Uuid, keep_session_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1 AND id <> $2")
        .bind(user_id)
        .bind(keep_session_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
