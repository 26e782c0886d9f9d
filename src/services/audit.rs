//! Tamper-evident audit log.
//!
//! DESIGN
//! ======
//! Every audited write appends one row in the same transaction as the write
//! itself. Rows form a per-tenant hash chain:
//!
//! ```text
//! hash = sha256(prev_hash | seq | entity_type | entity_id | action | changes)
//! ```
//!
//! `changes` is hashed in a canonical compact form with object keys sorted
//! by [`canonical_json`], so the same value hashes the same way after a
//! JSONB round trip whatever key order the parsed map keeps.
//!
//! The sequence comes from `tenant_sequences`, whose row lock serialises
//! appends per tenant until commit. A rolled-back write rolls its sequence
//! back too, so a committed chain has no gaps.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::services::numbering::{self, AUDIT_SEQUENCE};
use crate::services::session::bytes_to_hex;

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";
const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Transition,
    Post,
    Reverse,
}

impl AuditAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Transition => "transition",
            Self::Post => "post",
            Self::Reverse => "reverse",
        }
    }
}

/// What a service wants recorded.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub entity_type: &'static str,
    pub entity_id: Uuid,
    pub action: AuditAction,
    pub changes: serde_json::Value,
}

impl AuditEvent {
    #[must_use]
    pub fn new(entity_type: &'static str, entity_id: Uuid, action: AuditAction, changes: serde_json::Value) -> Self {
        Self { entity_type, entity_id, action, changes }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditRow {
    pub id: Uuid,
    pub seq: i64,
    pub actor_id: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    pub changes: serde_json::Value,
    pub prev_hash: String,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// Result of walking a tenant's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub ok: bool,
    pub checked: usize,
    pub first_broken_seq: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::error::ErrorCode for AuditError {
    fn error_code(&self) -> &'static str {
        crate::error::E_DATABASE
    }

    fn status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

crate::error::impl_api_error!(AuditError);

// =============================================================================
// HASHING
// =============================================================================

#[must_use]
pub fn compute_hash(
    prev_hash: &str,
    seq: i64,
    entity_type: &str,
    entity_id: Uuid,
    action: &str,
    changes: &serde_json::Value,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(seq.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(entity_type.as_bytes());
    hasher.update(b"|");
    hasher.update(entity_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(action.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_json(changes).as_bytes());
    bytes_to_hex(&hasher.finalize())
}

/// Compact JSON with object keys in byte order at every depth.
#[must_use]
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Walk rows (ascending `seq`) and report the first break.
#[must_use]
pub fn verify_rows(rows: &[AuditRow]) -> ChainReport {
    let mut expected_prev = GENESIS_HASH.to_owned();
    let mut expected_seq = 1_i64;

    for (checked, row) in rows.iter().enumerate() {
        let broken = |reason: &str| ChainReport {
            ok: false,
            checked,
            first_broken_seq: Some(row.seq),
            reason: Some(reason.to_owned()),
        };

        if row.seq != expected_seq {
            return broken("sequence gap");
        }
        if row.prev_hash != expected_prev {
            return broken("prev hash mismatch");
        }
        let recomputed = compute_hash(&row.prev_hash, row.seq, &row.entity_type, row.entity_id, &row.action, &row.changes);
        if recomputed != row.hash {
            return broken("hash mismatch");
        }
        expected_prev.clone_from(&row.hash);
        expected_seq += 1;
    }

    ChainReport { ok: true, checked: rows.len(), first_broken_seq: None, reason: None }
}

// =============================================================================
// WRITE
// =============================================================================

/// Append one event to the tenant's chain. Call inside the write's transaction.
pub async fn append(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    actor_id: Option<Uuid>,
    event: AuditEvent,
) -> Result<i64, sqlx::Error> {
    let seq = numbering::next_value(&mut *conn, tenant_id, AUDIT_SEQUENCE).await?;
    let prev_hash = if seq == 1 {
        GENESIS_HASH.to_owned()
    } else {
        sqlx::query_scalar::<_, String>("SELECT hash FROM audit_log WHERE tenant_id = $1 AND seq = $2")
            .bind(tenant_id)
            .bind(seq - 1)
            .fetch_optional(&mut *conn)
            .await?
            .unwrap_or_else(|| GENESIS_HASH.to_owned())
    };
    let action = event.action.as_str();
    let hash = compute_hash(&prev_hash, seq, event.entity_type, event.entity_id, action, &event.changes);

    sqlx::query(
        r"INSERT INTO audit_log (tenant_id, seq, actor_id, entity_type, entity_id, action, changes, prev_hash, hash)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(tenant_id)
    .bind(seq)
    .bind(actor_id)
    .bind(event.entity_type)
    .bind(event.entity_id)
    .bind(action)
    .bind(&event.changes)
    .bind(&prev_hash)
    .bind(&hash)
    .execute(&mut *conn)
    .await?;

    Ok(seq)
}

// =============================================================================
// READ
// =============================================================================

#[derive(Debug, Default, Clone, Deserialize)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub limit: Option<i64>,
}

/// Newest-first slice of the log.
pub async fn list(pool: &PgPool, tenant_id: Uuid, filter: &AuditFilter) -> Result<Vec<AuditRow>, AuditError> {
    let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let rows = sqlx::query_as::<_, AuditRow>(
        r"SELECT id, seq, actor_id, entity_type, entity_id, action, changes, prev_hash, hash, created_at
          FROM audit_log
          WHERE tenant_id = $1
            AND ($2::text IS NULL OR entity_type = $2)
            AND ($3::uuid IS NULL OR entity_id = $3)
          ORDER BY seq DESC
          LIMIT $4",
    )
    .bind(tenant_id)
    .bind(filter.entity_type.as_deref())
    .bind(filter.entity_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn verify_chain(pool: &PgPool, tenant_id: Uuid) -> Result<ChainReport, AuditError> {
    let rows = sqlx::query_as::<_, AuditRow>(
        r"SELECT id, seq, actor_id, entity_type, entity_id, action, changes, prev_hash, hash, created_at
          FROM audit_log
          WHERE tenant_id = $1
          ORDER BY seq ASC",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;
    let report = verify_rows(&rows);
    if !report.ok {
        tracing::warn!(%tenant_id, seq = ?report.first_broken_seq, reason = ?report.reason, "audit chain broken");
    }
    Ok(report)
}

#[cfg(test)]
#[path = "audit_test.rs"]
mod tests;
