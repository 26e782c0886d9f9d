//! Customer records (CRM).
//!
//! Writes carry an optimistic `version`: an update names the version it was
//! based on and fails with `E_VERSION_CONFLICT` when someone else got there
//! first.

use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::text_enum;
use crate::error::ErrorCode;
use crate::services::audit::{self, AuditAction, AuditEvent};
use crate::services::email_auth::normalize_email;
use crate::services::tenant::{TenantCtx, TenantError, TenantPermission};

text_enum! {
    pub enum CustomerStatus {
        Active => "active",
        Blocked => "blocked",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CustomerError {
    #[error(transparent)]
    Tenant(#[from] TenantError),
    #[error("customer not found")]
    NotFound,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("a customer with email {0} already exists")]
    Duplicate(String),
    #[error("customer was modified (current version {current})")]
    VersionConflict { current: i32 },
    #[error("customer has open contracts")]
    InUse,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for CustomerError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Tenant(e) => e.error_code(),
            Self::NotFound => "E_NOT_FOUND",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::Duplicate(_) => "E_DUPLICATE",
            Self::VersionConflict { .. } => "E_VERSION_CONFLICT",
            Self::InUse => "E_IN_USE",
            Self::Database(_) => crate::error::E_DATABASE,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Tenant(e) => e.status(),
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Duplicate(_) | Self::VersionConflict { .. } | Self::InUse => StatusCode::CONFLICT,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

crate::error::impl_api_error!(CustomerError);

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub driver_license: Option<String>,
    pub license_expiry: Option<NaiveDate>,
    pub address: Option<String>,
    pub notes: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: CustomerStatus,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerInput {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub driver_license: Option<String>,
    pub license_expiry: Option<NaiveDate>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub status: Option<CustomerStatus>,
}

/// Absent fields are left alone; `version` is mandatory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerPatch {
    pub version: i32,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub driver_license: Option<String>,
    pub license_expiry: Option<NaiveDate>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub status: Option<CustomerStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerFilter {
    pub q: Option<String>,
    pub status: Option<CustomerStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

const CUSTOMER_COLUMNS: &str = "id, full_name, email, phone, driver_license, license_expiry, address, notes, \
                                status, version, created_at, updated_at";

/// Blank strings become `None`.
fn clean(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned)
}

/// Trim and check a name; normalise an optional email.
pub fn normalize_fields(full_name: &str, email: Option<&str>) -> Result<(String, Option<String>), CustomerError> {
    let name = full_name.trim();
    if name.is_empty() {
        return Err(CustomerError::InvalidInput("full_name is required".into()));
    }
    let email = match clean(email) {
        Some(raw) => Some(normalize_email(&raw).ok_or_else(|| CustomerError::InvalidInput(format!("invalid email: {raw}")))?),
        None => None,
    };
    Ok((name.to_owned(), email))
}

/// `%` and `_` in user search text match literally.
#[must_use]
pub fn like_pattern(q: &str) -> String {
    let escaped = q.trim().replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

fn map_write_error(e: sqlx::Error, email: Option<&str>) -> CustomerError {
    if crate::db::is_unique_violation(&e) {
        CustomerError::Duplicate(email.unwrap_or_default().to_owned())
    } else {
        CustomerError::Database(e)
    }
}

pub async fn list_customers(pool: &PgPool, ctx: &TenantCtx, filter: &CustomerFilter) -> Result<Vec<Customer>, CustomerError> {
    ctx.require(TenantPermission::View)?;
    let pattern = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()).map(like_pattern);
    let rows = sqlx::query_as::<_, Customer>(&format!(
        r"SELECT {CUSTOMER_COLUMNS} FROM customers
          WHERE tenant_id = $1
            AND ($2::text IS NULL OR status = $2)
            AND ($3::text IS NULL
                 OR full_name ILIKE $3
                 OR email ILIKE $3
                 OR phone ILIKE $3
                 OR driver_license ILIKE $3)
          ORDER BY full_name
          LIMIT $4 OFFSET $5"
    ))
    .bind(ctx.tenant_id)
    .bind(filter.status.map(CustomerStatus::as_str))
    .bind(pattern)
    .bind(filter.limit.unwrap_or(50).clamp(1, 500))
    .bind(filter.offset.unwrap_or(0).max(0))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_customer(pool: &PgPool, ctx: &TenantCtx, customer_id: Uuid) -> Result<Customer, CustomerError> {
    ctx.require(TenantPermission::View)?;
    sqlx::query_as::<_, Customer>(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(ctx.tenant_id)
    .bind(customer_id)
    .fetch_optional(pool)
    .await?
    .ok_or(CustomerError::NotFound)
}

pub async fn create_customer(pool: &PgPool, ctx: &TenantCtx, input: CustomerInput) -> Result<Customer, CustomerError> {
    ctx.require(TenantPermission::ManageFleet)?;
    let (full_name, email) = normalize_fields(&input.full_name, input.email.as_deref())?;

    let mut tx = pool.begin().await?;
    let customer = sqlx::query_as::<_, Customer>(&format!(
        r"INSERT INTO customers
              (tenant_id, full_name, email, phone, driver_license, license_expiry, address, notes, status)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
          RETURNING {CUSTOMER_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(&full_name)
    .bind(email.as_deref())
    .bind(clean(input.phone.as_deref()))
    .bind(clean(input.driver_license.as_deref()))
    .bind(input.license_expiry)
    .bind(clean(input.address.as_deref()))
    .bind(clean(input.notes.as_deref()))
    .bind(input.status.unwrap_or(CustomerStatus::Active).as_str())
    .fetch_one(tx.as_mut())
    .await
    .map_err(|e| map_write_error(e, email.as_deref()))?;

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new(
            "customer",
            customer.id,
            AuditAction::Create,
            serde_json::json!({ "full_name": customer.full_name, "email": customer.email, "status": customer.status }),
        ),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, customer_id = %customer.id, "customer created");
    Ok(customer)
}

pub async fn update_customer(
    pool: &PgPool,
    ctx: &TenantCtx,
    customer_id: Uuid,
    patch: CustomerPatch,
) -> Result<Customer, CustomerError> {
    ctx.require(TenantPermission::ManageFleet)?;

    let mut tx = pool.begin().await?;
    let current = sqlx::query_as::<_, Customer>(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(ctx.tenant_id)
    .bind(customer_id)
    .fetch_optional(tx.as_mut())
    .await?
    .ok_or(CustomerError::NotFound)?;
    if current.version != patch.version {
        return Err(CustomerError::VersionConflict { current: current.version });
    }

    let (full_name, email) = normalize_fields(
        patch.full_name.as_deref().unwrap_or(&current.full_name),
        patch.email.as_deref().or(current.email.as_deref()),
    )?;
    let pick = |new: Option<&String>, old: &Option<String>| match new {
        Some(v) => clean(Some(v.as_str())),
        None => old.clone(),
    };
    let phone = pick(patch.phone.as_ref(), &current.phone);
    let driver_license = pick(patch.driver_license.as_ref(), &current.driver_license);
    let address = pick(patch.address.as_ref(), &current.address);
    let notes = pick(patch.notes.as_ref(), &current.notes);
    let license_expiry = patch.license_expiry.or(current.license_expiry);
    let status = patch.status.unwrap_or(current.status);

    let customer = sqlx::query_as::<_, Customer>(&format!(
        r"UPDATE customers
          SET full_name = $3, email = $4, phone = $5, driver_license = $6, license_expiry = $7,
              address = $8, notes = $9, status = $10, version = version + 1, updated_at = now()
          WHERE tenant_id = $1 AND id = $2
          RETURNING {CUSTOMER_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(customer_id)
    .bind(&full_name)
    .bind(email.as_deref())
    .bind(phone)
    .bind(driver_license)
    .bind(license_expiry)
    .bind(address)
    .bind(notes)
    .bind(status.as_str())
    .fetch_one(tx.as_mut())
    .await
    .map_err(|e| map_write_error(e, email.as_deref()))?;

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new(
            "customer",
            customer_id,
            AuditAction::Update,
            serde_json::json!({
                "version": customer.version,
                "full_name": customer.full_name,
                "email": customer.email,
                "status": customer.status,
            }),
        ),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %customer_id, version = customer.version, "customer updated");
    Ok(customer)
}

pub async fn delete_customer(pool: &PgPool, ctx: &TenantCtx, customer_id: Uuid) -> Result<(), CustomerError> {
    ctx.require(TenantPermission::ManageFleet)?;
    let mut tx = pool.begin().await?;
    let open: bool = sqlx::query_scalar(
        r"SELECT EXISTS (SELECT 1 FROM contracts
                         WHERE tenant_id = $1 AND customer_id = $2 AND status IN ('draft', 'active'))",
    )
    .bind(ctx.tenant_id)
    .bind(customer_id)
    .fetch_one(tx.as_mut())
    .await?;
    if open {
        return Err(CustomerError::InUse);
    }

    let deleted = sqlx::query("DELETE FROM customers WHERE tenant_id = $1 AND id = $2")
        .bind(ctx.tenant_id)
        .bind(customer_id)
        .execute(tx.as_mut())
        .await
        .map_err(|e| {
            // Closed contracts still reference the row.
            if crate::db::is_foreign_key_violation(&e) { CustomerError::InUse } else { CustomerError::Database(e) }
        })?
        .rows_affected();
    if deleted == 0 {
        return Err(CustomerError::NotFound);
    }

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new("customer", customer_id, AuditAction::Delete, serde_json::json!({})),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %customer_id, "customer deleted");
    Ok(())
}

#[cfg(test)]
#[path = "customer_test.rs"]
mod tests;
