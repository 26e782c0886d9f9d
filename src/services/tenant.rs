//! Tenant service: onboarding, membership, roles, and diagnostics.
//!
//! DESIGN
//! ======
//! A tenant is one rental company. Users join tenants through
//! `tenant_members` with a single role; every other service receives a
//! [`TenantCtx`] (tenant, acting user, role) and checks the permission it
//! needs with [`TenantCtx::require`] before touching data.
//!
//! Onboarding is one transaction: tenant row, owner membership, default
//! chart of accounts, default cost center, and default automation rules.
//! A failure anywhere leaves nothing behind.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::services::audit::{self, AuditAction, AuditEvent, ChainReport};
use crate::services::email_auth::{normalize_email, upsert_user_by_email};
use crate::services::{automation, budget, ledger};

// =============================================================================
// ROLES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantRole {
    Owner,
    Admin,
    Accountant,
    Agent,
    Viewer,
}

impl TenantRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Accountant => "accountant",
            Self::Agent => "agent",
            Self::Viewer => "viewer",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "accountant" => Some(Self::Accountant),
            "agent" => Some(Self::Agent),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }

    #[must_use]
    pub fn allows(self, permission: TenantPermission) -> bool {
        match self {
            Self::Owner | Self::Admin => true,
            Self::Accountant => matches!(permission, TenantPermission::View | TenantPermission::ManageAccounting),
            Self::Agent => matches!(permission, TenantPermission::View | TenantPermission::ManageFleet),
            Self::Viewer => permission == TenantPermission::View,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantPermission {
    View,
    /// Customers, vehicles, contracts.
    ManageFleet,
    /// Ledger, cost centers, budgets.
    ManageAccounting,
    /// Members, automation, tenant settings.
    Administer,
}

/// Acting user inside one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantCtx {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role: TenantRole,
}

impl TenantCtx {
    /// # Errors
    ///
    /// Returns [`TenantError::Forbidden`] when the role lacks `permission`.
    pub fn require(&self, permission: TenantPermission) -> Result<(), TenantError> {
        if self.role.allows(permission) {
            Ok(())
        } else {
            Err(TenantError::Forbidden(self.role.as_str()))
        }
    }
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("tenant not found")]
    NotFound,
    #[error("role {0} is not allowed to do this")]
    Forbidden(&'static str),
    #[error("slug already taken: {0}")]
    SlugTaken(String),
    #[error("the last owner cannot be removed or demoted")]
    LastOwner,
    #[error("member not found: {0}")]
    MemberNotFound(Uuid),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::error::ErrorCode for TenantError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound => "E_TENANT_NOT_FOUND",
            Self::Forbidden(_) => "E_FORBIDDEN",
            Self::SlugTaken(_) => "E_SLUG_TAKEN",
            Self::LastOwner => "E_LAST_OWNER",
            Self::MemberNotFound(_) => "E_NOT_FOUND",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::Database(_) => crate::error::E_DATABASE,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound | Self::MemberNotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::SlugTaken(_) | Self::LastOwner => StatusCode::CONFLICT,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

crate::error::impl_api_error!(TenantError);

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantMembership {
    #[serde(flatten)]
    pub tenant: Tenant,
    pub role: TenantRole,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantMember {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: TenantRole,
    pub joined_at: DateTime<Utc>,
}

// =============================================================================
// SLUGS
// =============================================================================

/// Lowercase ASCII alphanumerics; every other run collapses to one `-`.
#[must_use]
pub fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

// =============================================================================
// ONBOARDING / CRUD
// =============================================================================

pub struct NewTenant<'a> {
    pub name: &'a str,
    pub slug: Option<&'a str>,
    pub currency: &'a str,
}

/// Create a tenant with `owner_id` as owner and seed its books.
///
/// # Errors
///
/// `InvalidInput` for an empty name/slug, `SlugTaken` on conflict.
pub async fn onboard_tenant(pool: &PgPool, owner_id: Uuid, input: NewTenant<'_>) -> Result<Tenant, TenantError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(TenantError::InvalidInput("name is required".into()));
    }
    let slug = slugify(input.slug.unwrap_or(name));
    if slug.is_empty() {
        return Err(TenantError::InvalidInput("slug must contain letters or digits".into()));
    }
    let currency = crate::config::normalize_currency(input.currency)
        .ok_or_else(|| TenantError::InvalidInput("currency must be a three-letter code".into()))?;

    let mut tx = pool.begin().await?;
    let tenant = sqlx::query_as::<_, Tenant>(
        r"INSERT INTO tenants (name, slug, currency)
          VALUES ($1, $2, $3)
          RETURNING id, name, slug, currency, created_at",
    )
    .bind(name)
    .bind(&slug)
    .bind(&currency)
    .fetch_one(tx.as_mut())
    .await
    .map_err(|e| {
        if crate::db::is_unique_violation(&e) {
            TenantError::SlugTaken(slug.clone())
        } else {
            TenantError::Database(e)
        }
    })?;

    sqlx::query("INSERT INTO tenant_members (tenant_id, user_id, role) VALUES ($1, $2, 'owner')")
        .bind(tenant.id)
        .bind(owner_id)
        .execute(tx.as_mut())
        .await?;

    let accounts = ledger::seed_default_accounts(tx.as_mut(), tenant.id).await?;
    budget::seed_default_cost_center(tx.as_mut(), tenant.id).await?;
    automation::seed_default_rules(tx.as_mut(), tenant.id).await?;

    audit::append(
        tx.as_mut(),
        tenant.id,
        Some(owner_id),
        AuditEvent::new(
            "tenant",
            tenant.id,
            AuditAction::Create,
            serde_json::json!({ "name": tenant.name, "slug": tenant.slug, "currency": tenant.currency }),
        ),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %tenant.id, %owner_id, slug = %tenant.slug, accounts, "tenant onboarded");
    Ok(tenant)
}

pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<TenantMembership>, TenantError> {
    let rows = sqlx::query(
        r"SELECT t.id, t.name, t.slug, t.currency, t.created_at, m.role
          FROM tenant_members m
          JOIN tenants t ON t.id = m.tenant_id
          WHERE m.user_id = $1
          ORDER BY t.name",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|r| {
            let role = TenantRole::parse(r.get::<&str, _>("role"))?;
            Some(TenantMembership {
                tenant: Tenant {
                    id: r.get("id"),
                    name: r.get("name"),
                    slug: r.get("slug"),
                    currency: r.get("currency"),
                    created_at: r.get("created_at"),
                },
                role,
            })
        })
        .collect())
}

/// Role of `user_id` in `tenant_id`, if a member.
pub async fn member_role(pool: &PgPool, tenant_id: Uuid, user_id: Uuid) -> Result<Option<TenantRole>, sqlx::Error> {
    let role: Option<String> =
        sqlx::query_scalar("SELECT role FROM tenant_members WHERE tenant_id = $1 AND user_id = $2")
            .bind(tenant_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(role.as_deref().and_then(TenantRole::parse))
}

pub async fn get_tenant(pool: &PgPool, tenant_id: Uuid) -> Result<Tenant, TenantError> {
    sqlx::query_as::<_, Tenant>("SELECT id, name, slug, currency, created_at FROM tenants WHERE id = $1")
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?
        .ok_or(TenantError::NotFound)
}

pub async fn update_tenant(
    pool: &PgPool,
    ctx: &TenantCtx,
    name: Option<&str>,
    currency: Option<&str>,
) -> Result<Tenant, TenantError> {
    ctx.require(TenantPermission::Administer)?;
    let name = name.map(str::trim);
    if name.is_some_and(str::is_empty) {
        return Err(TenantError::InvalidInput("name cannot be empty".into()));
    }
    let currency = match currency {
        Some(raw) => Some(
            crate::config::normalize_currency(raw)
                .ok_or_else(|| TenantError::InvalidInput(format!("invalid currency: {raw}")))?,
        ),
        None => None,
    };

    let mut tx = pool.begin().await?;
    let tenant = sqlx::query_as::<_, Tenant>(
        r"UPDATE tenants
          SET name = COALESCE($2, name), currency = COALESCE($3, currency), updated_at = now()
          WHERE id = $1
          RETURNING id, name, slug, currency, created_at",
    )
    .bind(ctx.tenant_id)
    .bind(name)
    .bind(currency.as_deref())
    .fetch_optional(tx.as_mut())
    .await?
    .ok_or(TenantError::NotFound)?;

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new("tenant", ctx.tenant_id, AuditAction::Update, serde_json::json!({ "name": name, "currency": currency })),
    )
    .await?;
    tx.commit().await?;
    Ok(tenant)
}

// =============================================================================
// MEMBERS
// =============================================================================

pub async fn list_members(pool: &PgPool, ctx: &TenantCtx) -> Result<Vec<TenantMember>, TenantError> {
    ctx.require(TenantPermission::View)?;
    let rows = sqlx::query(
        r"SELECT u.id, u.email, u.name, m.role, m.joined_at
          FROM tenant_members m
          JOIN users u ON u.id = m.user_id
          WHERE m.tenant_id = $1
          ORDER BY m.joined_at",
    )
    .bind(ctx.tenant_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|r| {
            Some(TenantMember {
                user_id: r.get("id"),
                email: r.get("email"),
                name: r.get("name"),
                role: TenantRole::parse(r.get::<&str, _>("role"))?,
                joined_at: r.get("joined_at"),
            })
        })
        .collect())
}

/// Only owners may hand out the owner role.
fn check_grant(ctx: &TenantCtx, role: TenantRole) -> Result<(), TenantError> {
    ctx.require(TenantPermission::Administer)?;
    if role == TenantRole::Owner && ctx.role != TenantRole::Owner {
        return Err(TenantError::Forbidden(ctx.role.as_str()));
    }
    Ok(())
}

/// Add a member by email (the user is created if unknown) or change their role.
pub async fn add_member(pool: &PgPool, ctx: &TenantCtx, email: &str, role: TenantRole) -> Result<Uuid, TenantError> {
    check_grant(ctx, role)?;
    let email = normalize_email(email).ok_or_else(|| TenantError::InvalidInput("invalid email".into()))?;
    let user_id = upsert_user_by_email(pool, &email).await?;
    set_member_role(pool, ctx, user_id, role, true).await?;
    Ok(user_id)
}

pub async fn update_member_role(
    pool: &PgPool,
    ctx: &TenantCtx,
    user_id: Uuid,
    role: TenantRole,
) -> Result<(), TenantError> {
    check_grant(ctx, role)?;
    set_member_role(pool, ctx, user_id, role, false).await
}

async fn set_member_role(
    pool: &PgPool,
    ctx: &TenantCtx,
    user_id: Uuid,
    role: TenantRole,
    allow_insert: bool,
) -> Result<(), TenantError> {
    let mut tx = pool.begin().await?;
    let current = lock_members(tx.as_mut(), ctx.tenant_id).await?;
    let existing = current.iter().find(|(id, _)| *id == user_id).map(|(_, r)| *r);

    match existing {
        None if !allow_insert => return Err(TenantError::MemberNotFound(user_id)),
        Some(TenantRole::Owner) if role != TenantRole::Owner => {
            if ctx.role != TenantRole::Owner {
                return Err(TenantError::Forbidden(ctx.role.as_str()));
            }
            if owner_count(&current) <= 1 {
                return Err(TenantError::LastOwner);
            }
        }
        _ => {}
    }

    sqlx::query(
        r"INSERT INTO tenant_members (tenant_id, user_id, role)
          VALUES ($1, $2, $3)
          ON CONFLICT (tenant_id, user_id) DO UPDATE SET role = EXCLUDED.role",
    )
    .bind(ctx.tenant_id)
    .bind(user_id)
    .bind(role.as_str())
    .execute(tx.as_mut())
    .await?;

    let action = if existing.is_some() { AuditAction::Update } else { AuditAction::Create };
    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new("tenant_member", user_id, action, serde_json::json!({ "role": role.as_str() })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %user_id, role = role.as_str(), "member role set");
    Ok(())
}

pub async fn remove_member(pool: &PgPool, ctx: &TenantCtx, user_id: Uuid) -> Result<(), TenantError> {
    ctx.require(TenantPermission::Administer)?;
    let mut tx = pool.begin().await?;
    let current = lock_members(tx.as_mut(), ctx.tenant_id).await?;
    let Some((_, role)) = current.iter().find(|(id, _)| *id == user_id) else {
        return Err(TenantError::MemberNotFound(user_id));
    };
    if *role == TenantRole::Owner {
        if ctx.role != TenantRole::Owner {
            return Err(TenantError::Forbidden(ctx.role.as_str()));
        }
        if owner_count(&current) <= 1 {
            return Err(TenantError::LastOwner);
        }
    }

    sqlx::query("DELETE FROM tenant_members WHERE tenant_id = $1 AND user_id = $2")
        .bind(ctx.tenant_id)
        .bind(user_id)
        .execute(tx.as_mut())
        .await?;
    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new("tenant_member", user_id, AuditAction::Delete, serde_json::json!({})),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %user_id, "member removed");
    Ok(())
}

/// Lock all membership rows so owner-count checks cannot race.
async fn lock_members(
    conn: &mut sqlx::PgConnection,
    tenant_id: Uuid,
) -> Result<Vec<(Uuid, TenantRole)>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (Uuid, String)>(
        "SELECT user_id, role FROM tenant_members WHERE tenant_id = $1 FOR UPDATE",
    )
    .bind(tenant_id)
    .fetch_all(conn)
    .await?;
    Ok(rows
        .into_iter()
        .filter_map(|(id, role)| TenantRole::parse(&role).map(|r| (id, r)))
        .collect())
}

fn owner_count(members: &[(Uuid, TenantRole)]) -> usize {
    members.iter().filter(|(_, r)| *r == TenantRole::Owner).count()
}

// =============================================================================
// DIAGNOSTICS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticIssue {
    pub severity: IssueSeverity,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EntityCounts {
    pub members: i64,
    pub customers: i64,
    pub vehicles: i64,
    pub contracts: i64,
    pub accounts: i64,
    pub cost_centers: i64,
    pub journal_entries: i64,
    pub automation_rules: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub tenant_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub counts: EntityCounts,
    pub unbalanced_entries: i64,
    pub missing_system_accounts: Vec<String>,
    pub overdue_contracts: i64,
    pub orphaned_rented_vehicles: i64,
    pub audit_chain: ChainReport,
    pub issues: Vec<DiagnosticIssue>,
    pub status: HealthStatus,
}

/// Facts gathered from the database, before judgement.
#[derive(Debug, Clone)]
pub struct DiagnosticFacts {
    pub unbalanced_entries: i64,
    pub missing_system_accounts: Vec<String>,
    pub overdue_contracts: i64,
    pub orphaned_rented_vehicles: i64,
    pub audit_chain: ChainReport,
}

/// Turn facts into issues and an overall status. Overdue contracts are a
/// business warning; everything else is an integrity error.
#[must_use]
pub fn assess(facts: &DiagnosticFacts) -> (Vec<DiagnosticIssue>, HealthStatus) {
    let mut issues = Vec::new();
    if facts.unbalanced_entries > 0 {
        issues.push(DiagnosticIssue {
            severity: IssueSeverity::Error,
            code: "UNBALANCED_ENTRIES",
            message: format!("{} posted journal entries do not balance", facts.unbalanced_entries),
        });
    }
    if !facts.missing_system_accounts.is_empty() {
        issues.push(DiagnosticIssue {
            severity: IssueSeverity::Error,
            code: "MISSING_SYSTEM_ACCOUNTS",
            message: format!("missing system accounts: {}", facts.missing_system_accounts.join(", ")),
        });
    }
    if facts.orphaned_rented_vehicles > 0 {
        issues.push(DiagnosticIssue {
            severity: IssueSeverity::Error,
            code: "ORPHANED_RENTED_VEHICLES",
            message: format!("{} vehicles are rented without an active contract", facts.orphaned_rented_vehicles),
        });
    }
    if !facts.audit_chain.ok {
        issues.push(DiagnosticIssue {
            severity: IssueSeverity::Error,
            code: "AUDIT_CHAIN_BROKEN",
            message: format!(
                "audit chain broken at seq {} ({})",
                facts.audit_chain.first_broken_seq.unwrap_or_default(),
                facts.audit_chain.reason.as_deref().unwrap_or("unknown")
            ),
        });
    }
    if facts.overdue_contracts > 0 {
        issues.push(DiagnosticIssue {
            severity: IssueSeverity::Warning,
            code: "OVERDUE_CONTRACTS",
            message: format!("{} active contracts are past their end date", facts.overdue_contracts),
        });
    }

    let status = if issues.iter().any(|i| i.severity == IssueSeverity::Error) {
        HealthStatus::Unhealthy
    } else if issues.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };
    (issues, status)
}

/// Gather and assess tenant health. Needs no permission beyond membership,
/// so automation can run it on behalf of the tenant.
pub async fn diagnostics(pool: &PgPool, tenant_id: Uuid) -> Result<Diagnostics, TenantError> {
    let counts_row = sqlx::query(
        r"SELECT
              (SELECT COUNT(*) FROM tenant_members WHERE tenant_id = $1) AS members,
              (SELECT COUNT(*) FROM customers WHERE tenant_id = $1) AS customers,
              (SELECT COUNT(*) FROM vehicles WHERE tenant_id = $1) AS vehicles,
              (SELECT COUNT(*) FROM contracts WHERE tenant_id = $1) AS contracts,
              (SELECT COUNT(*) FROM accounts WHERE tenant_id = $1) AS accounts,
              (SELECT COUNT(*) FROM cost_centers WHERE tenant_id = $1) AS cost_centers,
              (SELECT COUNT(*) FROM journal_entries WHERE tenant_id = $1) AS journal_entries,
              (SELECT COUNT(*) FROM automation_rules WHERE tenant_id = $1) AS automation_rules,
              (SELECT COUNT(*) FROM contracts
                 WHERE tenant_id = $1 AND status = 'active' AND end_date < CURRENT_DATE) AS overdue,
              (SELECT COUNT(*) FROM vehicles v
                 WHERE v.tenant_id = $1 AND v.status = 'rented'
                   AND NOT EXISTS (SELECT 1 FROM contracts c
                                   WHERE c.vehicle_id = v.id AND c.status = 'active')) AS orphaned",
    )
    .bind(tenant_id)
    .fetch_one(pool)
    .await?;

    let counts = EntityCounts {
        members: counts_row.get("members"),
        customers: counts_row.get("customers"),
        vehicles: counts_row.get("vehicles"),
        contracts: counts_row.get("contracts"),
        accounts: counts_row.get("accounts"),
        cost_centers: counts_row.get("cost_centers"),
        journal_entries: counts_row.get("journal_entries"),
        automation_rules: counts_row.get("automation_rules"),
    };

    let facts = DiagnosticFacts {
        unbalanced_entries: ledger::count_unbalanced_posted(pool, tenant_id).await?,
        missing_system_accounts: ledger::missing_system_accounts(pool, tenant_id).await?,
        overdue_contracts: counts_row.get("overdue"),
        orphaned_rented_vehicles: counts_row.get("orphaned"),
        audit_chain: audit::verify_chain(pool, tenant_id)
            .await
            .map_err(|audit::AuditError::Database(e)| TenantError::Database(e))?,
    };
    let (issues, status) = assess(&facts);

    Ok(Diagnostics {
        tenant_id,
        generated_at: Utc::now(),
        counts,
        unbalanced_entries: facts.unbalanced_entries,
        missing_system_accounts: facts.missing_system_accounts,
        overdue_contracts: facts.overdue_contracts,
        orphaned_rented_vehicles: facts.orphaned_rented_vehicles,
        audit_chain: facts.audit_chain,
        issues,
        status,
    })
}

#[cfg(test)]
#[path = "tenant_test.rs"]
mod tests;
