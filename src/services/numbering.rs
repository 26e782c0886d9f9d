//! Per-tenant gapless counters for document numbers and the audit sequence.
//!
//! The counter row is upserted inside the caller's transaction, so the row
//! lock serialises concurrent writers and a rollback returns the number.

use sqlx::PgConnection;
use uuid::Uuid;

pub const CONTRACT_SEQUENCE: &str = "contract";
pub const JOURNAL_SEQUENCE: &str = "journal";
pub const AUDIT_SEQUENCE: &str = "audit";

/// Allocate the next value of `name` for `tenant_id`.
pub async fn next_value(conn: &mut PgConnection, tenant_id: Uuid, name: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r"INSERT INTO tenant_sequences (tenant_id, name, last_value)
          VALUES ($1, $2, 1)
          ON CONFLICT (tenant_id, name) DO UPDATE SET last_value = tenant_sequences.last_value + 1
          RETURNING last_value",
    )
    .bind(tenant_id)
    .bind(name)
    .fetch_one(conn)
    .await
}

/// `RC` + 1 → `RC-000001`. Numbers beyond six digits simply widen.
#[must_use]
pub fn format_number(prefix: &str, value: i64) -> String {
    format!("{prefix}-{value:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_pads_to_six_digits() {
        assert_eq!(format_number("RC", 1), "RC-000001");
        assert_eq!(format_number("JE", 123_456), "JE-123456");
    }

    #[test]
    fn format_number_widens_past_six_digits() {
        assert_eq!(format_number("JE", 1_234_567), "JE-1234567");
    }
}
