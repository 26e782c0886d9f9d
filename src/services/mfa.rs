//! Second factor via single-use backup codes.
//!
//! Enrollment issues ten `XXXX-XXXX` codes and stores only their hashes.
//! While a user is enrolled, sign-in yields an `mfa_pending` session that
//! must redeem one unused code before it can reach anything else.

use axum::http::StatusCode;
use sqlx::PgPool;
use uuid::Uuid;

use crate::services::email_auth::{CODE_ALPHABET, hash_code, random_code};
use crate::services::session;

pub const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_GROUP_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum MfaError {
    #[error("invalid or already used code")]
    InvalidCode,
    #[error("mfa is not enabled")]
    NotEnabled,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl crate::error::ErrorCode for MfaError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCode => "E_VERIFICATION_FAILED",
            Self::NotEnabled => "E_MFA_NOT_ENABLED",
            Self::Db(_) => crate::error::E_DATABASE,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCode => StatusCode::UNAUTHORIZED,
            Self::NotEnabled => StatusCode::CONFLICT,
            Self::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

crate::error::impl_api_error!(MfaError);

#[derive(Debug, Clone, serde::Serialize)]
pub struct MfaStatus {
    pub enabled: bool,
    pub remaining_codes: i64,
}

#[must_use]
pub fn generate_backup_code() -> String {
    format!("{}-{}", random_code(BACKUP_GROUP_LEN), random_code(BACKUP_GROUP_LEN))
}

/// Canonical form: uppercase, dash optional on input.
#[must_use]
pub fn normalize_backup_code(raw: &str) -> Option<String> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if compact.len() != BACKUP_GROUP_LEN * 2 || !compact.bytes().all(|c| CODE_ALPHABET.contains(&c)) {
        return None;
    }
    Some(format!("{}-{}", &compact[..BACKUP_GROUP_LEN], &compact[BACKUP_GROUP_LEN..]))
}

/// Enroll (or re-enroll) a user. Returns the plaintext codes, shown once.
pub async fn enroll(pool: &PgPool, user_id: Uuid) -> Result<Vec<String>, MfaError> {
    let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
    while codes.len() < BACKUP_CODE_COUNT {
        let code = generate_backup_code();
        if !codes.contains(&code) {
            codes.push(code);
        }
    }

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM mfa_backup_codes WHERE user_id = $1")
        .bind(user_id)
        .execute(tx.as_mut())
        .await?;
    for code in &codes {
        sqlx::query("INSERT INTO mfa_backup_codes (user_id, code_hash) VALUES ($1, $2)")
            .bind(user_id)
            .bind(hash_code(code))
            .execute(tx.as_mut())
            .await?;
    }
    sqlx::query("UPDATE users SET mfa_enabled = true WHERE id = $1")
        .bind(user_id)
        .execute(tx.as_mut())
        .await?;
    tx.commit().await?;

    tracing::info!(%user_id, "mfa enrolled");
    Ok(codes)
}

/// Redeem a backup code for a pending session.
pub async fn verify(pool: &PgPool, user_id: Uuid, session_id: Uuid, code: &str) -> Result<(), MfaError> {
    let normalized = normalize_backup_code(code).ok_or(MfaError::InvalidCode)?;
    let consumed = sqlx::query(
        r"UPDATE mfa_backup_codes
          SET used_at = now()
          WHERE user_id = $1 AND code_hash = $2 AND used_at IS NULL",
    )
    .bind(user_id)
    .bind(hash_code(&normalized))
    .execute(pool)
    .await?;

    if consumed.rows_affected() == 0 {
        tracing::warn!(%user_id, "mfa code rejected");
        return Err(MfaError::InvalidCode);
    }

    session::complete_mfa(pool, session_id).await?;
    Ok(())
}

pub async fn disable(pool: &PgPool, user_id: Uuid) -> Result<(), MfaError> {
    let mut tx = pool.begin().await?;
    let updated = sqlx::query("UPDATE users SET mfa_enabled = false WHERE id = $1 AND mfa_enabled")
        .bind(user_id)
        .execute(tx.as_mut())
        .await?;
    if updated.rows_affected() == 0 {
        return Err(MfaError::NotEnabled);
    }
    sqlx::query("DELETE FROM mfa_backup_codes WHERE user_id = $1")
        .bind(user_id)
        .execute(tx.as_mut())
        .await?;
    tx.commit().await?;
    tracing::info!(%user_id, "mfa disabled");
    Ok(())
}

pub async fn status(pool: &PgPool, user_id: Uuid) -> Result<MfaStatus, MfaError> {
    let (enabled, remaining_codes) = sqlx::query_as::<_, (bool, i64)>(
        r"SELECT u.mfa_enabled,
                 (SELECT COUNT(*) FROM mfa_backup_codes c WHERE c.user_id = u.id AND c.used_at IS NULL)
          FROM users u WHERE u.id = $1",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(MfaStatus { enabled, remaining_codes })
}

#[cfg(test)]
#[path = "mfa_test.rs"]
mod tests;
