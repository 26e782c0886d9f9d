//! Cost centers, budgets, and budget-versus-actual reporting.
//!
//! DESIGN
//! ======
//! Cost centers form a forest through `parent_id`. Budgets are monthly
//! amounts per cost center, optionally narrowed to one expense account.
//! "Actual" spend is always derived from posted journal lines tagged with
//! the cost center; nothing is cached.
//!
//! The report is computed in two stages: SQL aggregates budgets and actuals,
//! then pure functions ([`compose_lines`], [`rollup`], [`classify`]) join and
//! judge them. Automation and analytics call [`build_report`] directly.

use std::collections::HashMap;

use axum::http::StatusCode;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::db::text_enum;
use crate::error::ErrorCode;
use crate::services::audit::{self, AuditAction, AuditEvent};
use crate::services::tenant::{TenantCtx, TenantError, TenantPermission};

/// Utilization at which a line turns from on-track to warning.
const WARNING_BP: i64 = 8_000;
const FULL_BP: i64 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum BudgetError {
    #[error(transparent)]
    Tenant(#[from] TenantError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("cost center code already exists: {0}")]
    DuplicateCode(String),
    #[error("cost center is referenced by journal lines")]
    InUse,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for BudgetError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Tenant(e) => e.error_code(),
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::DuplicateCode(_) => "E_DUPLICATE",
            Self::InUse => "E_IN_USE",
            Self::Database(_) => crate::error::E_DATABASE,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Tenant(e) => e.status(),
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::DuplicateCode(_) | Self::InUse => StatusCode::CONFLICT,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

crate::error::impl_api_error!(BudgetError);

// =============================================================================
// COST CENTERS
// =============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CostCenter {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct NewCostCenter {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

/// `parent_id: Some(None)` detaches the center from its parent.
#[derive(Debug, Default, Deserialize)]
pub struct CostCenterPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<Uuid>>,
    pub is_active: Option<bool>,
}

fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

const CENTER_COLUMNS: &str = "id, code, name, parent_id, is_active, created_at";

pub async fn seed_default_cost_center(conn: &mut PgConnection, tenant_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"INSERT INTO cost_centers (tenant_id, code, name)
          VALUES ($1, 'GEN', 'General')
          ON CONFLICT (tenant_id, code) DO NOTHING",
    )
    .bind(tenant_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Would pointing `node` at `new_parent` close a loop?
#[must_use]
pub fn creates_cycle(parents: &HashMap<Uuid, Option<Uuid>>, node: Uuid, new_parent: Uuid) -> bool {
    let mut cursor = Some(new_parent);
    // A well-formed forest is never deeper than its node count.
    for _ in 0..=parents.len() {
        match cursor {
            None => return false,
            Some(id) if id == node => return true,
            Some(id) => cursor = parents.get(&id).copied().flatten(),
        }
    }
    true
}

async fn load_parents(conn: &mut PgConnection, tenant_id: Uuid) -> Result<HashMap<Uuid, Option<Uuid>>, sqlx::Error> {
    let rows: Vec<(Uuid, Option<Uuid>)> =
        sqlx::query_as("SELECT id, parent_id FROM cost_centers WHERE tenant_id = $1 FOR UPDATE")
            .bind(tenant_id)
            .fetch_all(conn)
            .await?;
    Ok(rows.into_iter().collect())
}

pub async fn list_cost_centers(pool: &PgPool, ctx: &TenantCtx) -> Result<Vec<CostCenter>, BudgetError> {
    ctx.require(TenantPermission::View)?;
    let rows = sqlx::query_as::<_, CostCenter>(&format!(
        "SELECT {CENTER_COLUMNS} FROM cost_centers WHERE tenant_id = $1 ORDER BY code"
    ))
    .bind(ctx.tenant_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn create_cost_center(pool: &PgPool, ctx: &TenantCtx, input: NewCostCenter) -> Result<CostCenter, BudgetError> {
    ctx.require(TenantPermission::ManageAccounting)?;
    let code = input.code.trim().to_ascii_uppercase();
    let name = input.name.trim();
    if code.is_empty() || name.is_empty() {
        return Err(BudgetError::InvalidInput("code and name are required".into()));
    }

    let mut tx = pool.begin().await?;
    if let Some(parent) = input.parent_id {
        let parents = load_parents(tx.as_mut(), ctx.tenant_id).await?;
        if !parents.contains_key(&parent) {
            return Err(BudgetError::InvalidInput("parent cost center not found".into()));
        }
    }
    let center = sqlx::query_as::<_, CostCenter>(&format!(
        "INSERT INTO cost_centers (tenant_id, code, name, parent_id) VALUES ($1, $2, $3, $4) RETURNING {CENTER_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(&code)
    .bind(name)
    .bind(input.parent_id)
    .fetch_one(tx.as_mut())
    .await
    .map_err(|e| {
        if crate::db::is_unique_violation(&e) {
            BudgetError::DuplicateCode(code.clone())
        } else {
            BudgetError::Database(e)
        }
    })?;

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new(
            "cost_center",
            center.id,
            AuditAction::Create,
            serde_json::json!({ "code": center.code, "name": center.name, "parent_id": center.parent_id }),
        ),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, cost_center_id = %center.id, code = %center.code, "cost center created");
    Ok(center)
}

pub async fn update_cost_center(
    pool: &PgPool,
    ctx: &TenantCtx,
    center_id: Uuid,
    patch: CostCenterPatch,
) -> Result<CostCenter, BudgetError> {
    ctx.require(TenantPermission::ManageAccounting)?;
    let name = patch.name.as_deref().map(str::trim);
    if name.is_some_and(str::is_empty) {
        return Err(BudgetError::InvalidInput("name cannot be empty".into()));
    }

    let mut tx = pool.begin().await?;
    let parents = load_parents(tx.as_mut(), ctx.tenant_id).await?;
    let Some(current_parent) = parents.get(&center_id).copied() else {
        return Err(BudgetError::NotFound("cost center"));
    };
    let parent_id = match patch.parent_id {
        None => current_parent,
        Some(None) => None,
        Some(Some(parent)) => {
            if !parents.contains_key(&parent) {
                return Err(BudgetError::InvalidInput("parent cost center not found".into()));
            }
            if creates_cycle(&parents, center_id, parent) {
                return Err(BudgetError::InvalidInput("parent would create a cycle".into()));
            }
            Some(parent)
        }
    };

    let center = sqlx::query_as::<_, CostCenter>(&format!(
        r"UPDATE cost_centers
          SET name = COALESCE($3, name), parent_id = $4, is_active = COALESCE($5, is_active)
          WHERE tenant_id = $1 AND id = $2
          RETURNING {CENTER_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(center_id)
    .bind(name)
    .bind(parent_id)
    .bind(patch.is_active)
    .fetch_one(tx.as_mut())
    .await?;

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new(
            "cost_center",
            center_id,
            AuditAction::Update,
            serde_json::json!({ "name": name, "parent_id": parent_id, "is_active": patch.is_active }),
        ),
    )
    .await?;
    tx.commit().await?;
    Ok(center)
}

pub async fn delete_cost_center(pool: &PgPool, ctx: &TenantCtx, center_id: Uuid) -> Result<(), BudgetError> {
    ctx.require(TenantPermission::ManageAccounting)?;
    let mut tx = pool.begin().await?;
    let referenced: bool = sqlx::query_scalar(
        r"SELECT EXISTS (
              SELECT 1 FROM journal_lines l
              JOIN journal_entries e ON e.id = l.entry_id
              WHERE l.cost_center_id = $1 AND e.tenant_id = $2
          )",
    )
    .bind(center_id)
    .bind(ctx.tenant_id)
    .fetch_one(tx.as_mut())
    .await?;
    if referenced {
        return Err(BudgetError::InUse);
    }

    let deleted = sqlx::query("DELETE FROM cost_centers WHERE tenant_id = $1 AND id = $2")
        .bind(ctx.tenant_id)
        .bind(center_id)
        .execute(tx.as_mut())
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(BudgetError::NotFound("cost center"));
    }

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new("cost_center", center_id, AuditAction::Delete, serde_json::json!({})),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, cost_center_id = %center_id, "cost center deleted");
    Ok(())
}

// =============================================================================
// BUDGETS
// =============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Budget {
    pub id: Uuid,
    pub cost_center_id: Uuid,
    pub account_id: Option<Uuid>,
    pub year: i32,
    pub month: i32,
    pub amount: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetInput {
    pub cost_center_id: Uuid,
    #[serde(default)]
    pub account_id: Option<Uuid>,
    pub year: i32,
    pub month: i32,
    pub amount: i64,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct BudgetFilter {
    pub year: Option<i32>,
    pub cost_center_id: Option<Uuid>,
}

const BUDGET_COLUMNS: &str = "id, cost_center_id, account_id, year, month, amount, updated_at";

/// Reject out-of-range periods and negative amounts.
pub fn validate_budget(input: &BudgetInput) -> Result<(), BudgetError> {
    if !(1..=12).contains(&input.month) {
        return Err(BudgetError::InvalidInput("month must be 1..=12".into()));
    }
    if !(2000..=2999).contains(&input.year) {
        return Err(BudgetError::InvalidInput("year out of range".into()));
    }
    if input.amount < 0 {
        return Err(BudgetError::InvalidInput("amount must be non-negative".into()));
    }
    Ok(())
}

pub async fn list_budgets(pool: &PgPool, ctx: &TenantCtx, filter: &BudgetFilter) -> Result<Vec<Budget>, BudgetError> {
    ctx.require(TenantPermission::View)?;
    let rows = sqlx::query_as::<_, Budget>(&format!(
        r"SELECT {BUDGET_COLUMNS} FROM budgets
          WHERE tenant_id = $1
            AND ($2::int IS NULL OR year = $2)
            AND ($3::uuid IS NULL OR cost_center_id = $3)
          ORDER BY year, month, cost_center_id"
    ))
    .bind(ctx.tenant_id)
    .bind(filter.year)
    .bind(filter.cost_center_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Insert or replace the amount for `(cost center, year, month, account)`.
pub async fn upsert_budget(pool: &PgPool, ctx: &TenantCtx, input: BudgetInput) -> Result<Budget, BudgetError> {
    ctx.require(TenantPermission::ManageAccounting)?;
    validate_budget(&input)?;

    let mut tx = pool.begin().await?;
    let center_ok: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM cost_centers WHERE tenant_id = $1 AND id = $2)")
        .bind(ctx.tenant_id)
        .bind(input.cost_center_id)
        .fetch_one(tx.as_mut())
        .await?;
    if !center_ok {
        return Err(BudgetError::InvalidInput("unknown cost center".into()));
    }
    if let Some(account_id) = input.account_id {
        let kind: Option<String> = sqlx::query_scalar("SELECT kind FROM accounts WHERE tenant_id = $1 AND id = $2")
            .bind(ctx.tenant_id)
            .bind(account_id)
            .fetch_optional(tx.as_mut())
            .await?;
        if kind.as_deref() != Some("expense") {
            return Err(BudgetError::InvalidInput("budget account must be an expense account".into()));
        }
    }

    let budget = sqlx::query_as::<_, Budget>(&format!(
        r"INSERT INTO budgets (tenant_id, cost_center_id, account_id, year, month, amount)
          VALUES ($1, $2, $3, $4, $5, $6)
          ON CONFLICT (cost_center_id, year, month, COALESCE(account_id, '00000000-0000-0000-0000-000000000000'::uuid))
          DO UPDATE SET amount = EXCLUDED.amount, updated_at = now()
          RETURNING {BUDGET_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(input.cost_center_id)
    .bind(input.account_id)
    .bind(input.year)
    .bind(input.month)
    .bind(input.amount)
    .fetch_one(tx.as_mut())
    .await?;

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new(
            "budget",
            budget.id,
            AuditAction::Update,
            serde_json::json!({
                "cost_center_id": budget.cost_center_id,
                "account_id": budget.account_id,
                "year": budget.year,
                "month": budget.month,
                "amount": budget.amount,
            }),
        ),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, budget_id = %budget.id, year = budget.year, month = budget.month, amount = budget.amount, "budget set");
    Ok(budget)
}

pub async fn delete_budget(pool: &PgPool, ctx: &TenantCtx, budget_id: Uuid) -> Result<(), BudgetError> {
    ctx.require(TenantPermission::ManageAccounting)?;
    let mut tx = pool.begin().await?;
    let deleted = sqlx::query("DELETE FROM budgets WHERE tenant_id = $1 AND id = $2")
        .bind(ctx.tenant_id)
        .bind(budget_id)
        .execute(tx.as_mut())
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(BudgetError::NotFound("budget"));
    }
    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new("budget", budget_id, AuditAction::Delete, serde_json::json!({})),
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

// =============================================================================
// REPORT
// =============================================================================

text_enum! {
    pub enum BudgetStatus {
        OnTrack => "on_track",
        Warning => "warning",
        OverBudget => "over_budget",
    }
}

/// Utilization in basis points (none for a zero budget) and its status.
#[must_use]
pub fn classify(budget: i64, actual: i64) -> (Option<i64>, BudgetStatus) {
    if budget <= 0 {
        let status = if actual > 0 { BudgetStatus::OverBudget } else { BudgetStatus::OnTrack };
        return (None, status);
    }
    let bp = i128::from(actual) * i128::from(FULL_BP) / i128::from(budget);
    let bp = i64::try_from(bp).unwrap_or(if bp > 0 { i64::MAX } else { i64::MIN });
    let status = if bp < WARNING_BP {
        BudgetStatus::OnTrack
    } else if bp <= FULL_BP {
        BudgetStatus::Warning
    } else {
        BudgetStatus::OverBudget
    };
    (Some(bp), status)
}

/// First and last day of a year or of one month in it.
#[must_use]
pub fn period_bounds(year: i32, month: Option<u32>) -> Option<(NaiveDate, NaiveDate)> {
    match month {
        None => Some((NaiveDate::from_ymd_opt(year, 1, 1)?, NaiveDate::from_ymd_opt(year, 12, 31)?)),
        Some(m) => {
            let first = NaiveDate::from_ymd_opt(year, m, 1)?;
            let next = if m == 12 { NaiveDate::from_ymd_opt(year + 1, 1, 1)? } else { NaiveDate::from_ymd_opt(year, m + 1, 1)? };
            Some((first, next.pred_opt()?))
        }
    }
}

/// Budget amount aggregated over the period.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BudgetAmount {
    pub cost_center_id: Uuid,
    pub account_id: Option<Uuid>,
    pub account_code: Option<String>,
    pub amount: i64,
}

/// Posted expense spend per cost center and account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActualAmount {
    pub cost_center_id: Uuid,
    pub account_id: Uuid,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetLine {
    pub cost_center_id: Uuid,
    pub cost_center_code: String,
    pub cost_center_name: String,
    pub account_id: Option<Uuid>,
    pub account_code: Option<String>,
    pub budget: i64,
    pub actual: i64,
    pub variance: i64,
    pub utilization_bp: Option<i64>,
    pub status: BudgetStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollupLine {
    pub cost_center_id: Uuid,
    pub code: String,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub own_budget: i64,
    pub own_actual: i64,
    pub total_budget: i64,
    pub total_actual: i64,
    pub utilization_bp: Option<i64>,
    pub status: BudgetStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetReport {
    pub year: i32,
    pub month: Option<u32>,
    pub lines: Vec<BudgetLine>,
    pub rollup: Vec<RollupLine>,
    pub total_budget: i64,
    pub total_actual: i64,
}

impl BudgetReport {
    /// Lines at warning or worse.
    pub fn alerts(&self) -> impl Iterator<Item = &BudgetLine> {
        self.lines.iter().filter(|l| l.status != BudgetStatus::OnTrack)
    }
}

/// Join budget lines with their actual spend. A budget without an account
/// compares against every expense account on the cost center.
#[must_use]
pub fn compose_lines(centers: &[CostCenter], budgets: &[BudgetAmount], actuals: &[ActualAmount]) -> Vec<BudgetLine> {
    let by_id: HashMap<Uuid, &CostCenter> = centers.iter().map(|c| (c.id, c)).collect();
    let mut lines: Vec<BudgetLine> = budgets
        .iter()
        .filter_map(|b| {
            let center = by_id.get(&b.cost_center_id)?;
            let actual = actuals
                .iter()
                .filter(|a| a.cost_center_id == b.cost_center_id && b.account_id.is_none_or(|id| id == a.account_id))
                .map(|a| a.amount)
                .fold(0, i64::saturating_add);
            let (utilization_bp, status) = classify(b.amount, actual);
            Some(BudgetLine {
                cost_center_id: center.id,
                cost_center_code: center.code.clone(),
                cost_center_name: center.name.clone(),
                account_id: b.account_id,
                account_code: b.account_code.clone(),
                budget: b.amount,
                actual,
                variance: b.amount.saturating_sub(actual),
                utilization_bp,
                status,
            })
        })
        .collect();
    lines.sort_by(|a, b| a.cost_center_code.cmp(&b.cost_center_code).then_with(|| a.account_code.cmp(&b.account_code)));
    lines
}

/// Per-center totals including every descendant.
#[must_use]
pub fn rollup(centers: &[CostCenter], budgets: &[BudgetAmount], actuals: &[ActualAmount]) -> Vec<RollupLine> {
    let parents: HashMap<Uuid, Option<Uuid>> = centers.iter().map(|c| (c.id, c.parent_id)).collect();
    let mut own: HashMap<Uuid, (i64, i64)> = HashMap::new();
    for b in budgets {
        let slot = own.entry(b.cost_center_id).or_default();
        slot.0 = slot.0.saturating_add(b.amount);
    }
    for a in actuals {
        let slot = own.entry(a.cost_center_id).or_default();
        slot.1 = slot.1.saturating_add(a.amount);
    }

    let mut totals: HashMap<Uuid, (i64, i64)> = HashMap::new();
    for (&center, &(budget, actual)) in &own {
        let mut cursor = Some(center);
        let mut hops = 0;
        while let Some(id) = cursor {
            if hops > parents.len() {
                break;
            }
            let t = totals.entry(id).or_default();
            t.0 = t.0.saturating_add(budget);
            t.1 = t.1.saturating_add(actual);
            cursor = parents.get(&id).copied().flatten();
            hops += 1;
        }
    }

    let mut lines: Vec<RollupLine> = centers
        .iter()
        .map(|c| {
            let (own_budget, own_actual) = own.get(&c.id).copied().unwrap_or_default();
            let (total_budget, total_actual) = totals.get(&c.id).copied().unwrap_or_default();
            let (utilization_bp, status) = classify(total_budget, total_actual);
            RollupLine {
                cost_center_id: c.id,
                code: c.code.clone(),
                name: c.name.clone(),
                parent_id: c.parent_id,
                own_budget,
                own_actual,
                total_budget,
                total_actual,
                utilization_bp,
                status,
            }
        })
        .collect();
    lines.sort_by(|a, b| a.code.cmp(&b.code));
    lines
}

/// Report without a permission check, for automation and analytics.
pub async fn build_report(pool: &PgPool, tenant_id: Uuid, year: i32, month: Option<u32>) -> Result<BudgetReport, BudgetError> {
    let (from, to) = period_bounds(year, month).ok_or_else(|| BudgetError::InvalidInput("invalid period".into()))?;

    let centers = sqlx::query_as::<_, CostCenter>(&format!(
        "SELECT {CENTER_COLUMNS} FROM cost_centers WHERE tenant_id = $1"
    ))
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    let budgets = sqlx::query_as::<_, BudgetAmount>(
        r"SELECT b.cost_center_id, b.account_id, a.code AS account_code, SUM(b.amount)::BIGINT AS amount
          FROM budgets b
          LEFT JOIN accounts a ON a.id = b.account_id
          WHERE b.tenant_id = $1 AND b.year = $2 AND ($3::int IS NULL OR b.month = $3)
          GROUP BY b.cost_center_id, b.account_id, a.code",
    )
    .bind(tenant_id)
    .bind(year)
    .bind(month.and_then(|m| i32::try_from(m).ok()))
    .fetch_all(pool)
    .await?;

    let actuals = sqlx::query_as::<_, ActualAmount>(
        r"SELECT l.cost_center_id, l.account_id, SUM(l.debit - l.credit)::BIGINT AS amount
          FROM journal_lines l
          JOIN journal_entries e ON e.id = l.entry_id
          JOIN accounts a ON a.id = l.account_id
          WHERE e.tenant_id = $1
            AND e.status IN ('posted', 'reversed')
            AND a.kind = 'expense'
            AND l.cost_center_id IS NOT NULL
            AND e.entry_date BETWEEN $2 AND $3
          GROUP BY l.cost_center_id, l.account_id",
    )
    .bind(tenant_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    let lines = compose_lines(&centers, &budgets, &actuals);
    let rollup = rollup(&centers, &budgets, &actuals);
    Ok(BudgetReport {
        year,
        month,
        total_budget: budgets.iter().map(|b| b.amount).fold(0, i64::saturating_add),
        total_actual: actuals.iter().map(|a| a.amount).fold(0, i64::saturating_add),
        lines,
        rollup,
    })
}

pub async fn budget_report(pool: &PgPool, ctx: &TenantCtx, year: i32, month: Option<u32>) -> Result<BudgetReport, BudgetError> {
    ctx.require(TenantPermission::View)?;
    build_report(pool, ctx.tenant_id, year, month).await
}

/// Report for the calendar month containing `today`.
pub async fn current_month_report(pool: &PgPool, tenant_id: Uuid, today: NaiveDate) -> Result<BudgetReport, BudgetError> {
    build_report(pool, tenant_id, today.year(), Some(today.month())).await
}

#[cfg(test)]
#[path = "budget_test.rs"]
mod tests;
