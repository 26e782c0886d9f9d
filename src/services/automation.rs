//! Automation rules and the background scheduler.
//!
//! DESIGN
//! ======
//! Rules live in `automation_rules`, one row per tenant job. A tokio task
//! ticks every `AUTOMATION_TICK_SECS` and claims due rules with a single
//! `UPDATE ... WHERE id IN (SELECT ... FOR UPDATE SKIP LOCKED)` that also
//! moves `next_run_at` forward, so concurrent instances never run the same
//! rule twice.
//!
//! ERROR HANDLING
//! ==============
//! A rule that fails is recorded as a `failed` log row and the loop moves on.
//! Claim or log failures are logged at `error` and retried on the next tick.

use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::{PgConnection, PgPool};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::text_enum;
use crate::error::ErrorCode;
use crate::services::audit::{self, AuditAction, AuditEvent};
use crate::services::budget::{self, BudgetReport, BudgetStatus};
use crate::services::contract::{self, Contract};
use crate::services::tenant::{self, Diagnostics, HealthStatus, TenantCtx, TenantError, TenantPermission};

pub const MIN_INTERVAL_MINUTES: i32 = 5;
pub const MAX_INTERVAL_MINUTES: i32 = 10_080;
const CLAIM_BATCH: i64 = 32;
const DEFAULT_LOG_LIMIT: i64 = 50;
const MAX_LOG_LIMIT: i64 = 500;

text_enum! {
    pub enum RuleAction {
        OverdueContracts => "overdue_contracts",
        BudgetAlerts => "budget_alerts",
        IntegrityCheck => "integrity_check",
    }
}

text_enum! {
    pub enum RunStatus {
        Success => "success",
        Failed => "failed",
    }
}

/// (name, action, interval, enabled) seeded for every new tenant.
const DEFAULT_RULES: &[(&str, RuleAction, i32, bool)] = &[
    ("Overdue contracts", RuleAction::OverdueContracts, 60, true),
    ("Budget alerts", RuleAction::BudgetAlerts, 1_440, false),
    ("Integrity check", RuleAction::IntegrityCheck, 1_440, false),
];

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error(transparent)]
    Tenant(#[from] TenantError),
    #[error("automation rule not found")]
    NotFound,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for AutomationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Tenant(e) => e.error_code(),
            Self::NotFound => "E_NOT_FOUND",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::Database(_) => crate::error::E_DATABASE,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Tenant(e) => e.status(),
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

crate::error::impl_api_error!(AutomationError);

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AutomationRule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub action: RuleAction,
    pub interval_minutes: i32,
    pub enabled: bool,
    pub params: Value,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleInput {
    pub name: String,
    pub action: RuleAction,
    pub interval_minutes: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub params: Option<Value>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulePatch {
    pub name: Option<String>,
    pub interval_minutes: Option<i32>,
    pub enabled: Option<bool>,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AutomationLog {
    pub id: Uuid,
    pub rule_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub action: RuleAction,
    #[sqlx(try_from = "String")]
    pub status: RunStatus,
    pub summary: String,
    pub details: Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFilter {
    pub rule_id: Option<Uuid>,
    pub limit: Option<i64>,
}

/// What one execution produced, before it is written to `automation_logs`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub summary: String,
    pub details: Value,
}

impl RunOutcome {
    fn failed(summary: impl Into<String>) -> Self {
        Self { status: RunStatus::Failed, summary: summary.into(), details: json!({}) }
    }
}

const RULE_COLUMNS: &str =
    "id, tenant_id, name, action, interval_minutes, enabled, params, last_run_at, next_run_at, created_at";
const LOG_COLUMNS: &str = "id, rule_id, action, status, summary, details, started_at, finished_at";

// =============================================================================
// VALIDATION
// =============================================================================

pub fn validate_interval(minutes: i32) -> Result<(), AutomationError> {
    if (MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes) {
        Ok(())
    } else {
        Err(AutomationError::InvalidInput(format!(
            "interval_minutes must be {MIN_INTERVAL_MINUTES}..={MAX_INTERVAL_MINUTES}"
        )))
    }
}

fn validate_params(params: &Value) -> Result<(), AutomationError> {
    if !params.is_object() {
        return Err(AutomationError::InvalidInput("params must be a JSON object".into()));
    }
    if let Some(grace) = params.get("grace_days") {
        if grace.as_i64().is_none_or(|g| g < 0) {
            return Err(AutomationError::InvalidInput("grace_days must be a non-negative integer".into()));
        }
    }
    Ok(())
}

fn clean_name(name: &str) -> Result<String, AutomationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AutomationError::InvalidInput("name is required".into()));
    }
    Ok(name.to_owned())
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Overdue contracts, optionally ignoring those within `grace_days` of their end.
#[must_use]
pub fn summarize_overdue(contracts: &[Contract], today: NaiveDate, grace_days: i64) -> RunOutcome {
    let overdue: Vec<Value> = contracts
        .iter()
        .filter_map(|c| {
            let days_overdue = (today - c.end_date).num_days();
            (days_overdue > grace_days).then(|| {
                json!({
                    "contract_id": c.id,
                    "number": c.number,
                    "customer_id": c.customer_id,
                    "vehicle_id": c.vehicle_id,
                    "end_date": c.end_date,
                    "days_overdue": days_overdue,
                })
            })
        })
        .collect();
    let summary = match overdue.len() {
        0 => "no overdue contracts".to_owned(),
        n => format!("{n} overdue contract(s)"),
    };
    RunOutcome { status: RunStatus::Success, summary, details: json!({ "contracts": overdue }) }
}

#[must_use]
pub fn summarize_budget(report: &BudgetReport) -> RunOutcome {
    let alerts: Vec<Value> = report
        .alerts()
        .map(|l| {
            json!({
                "cost_center": l.cost_center_code,
                "account": l.account_code,
                "budget": l.budget,
                "actual": l.actual,
                "utilization_bp": l.utilization_bp,
                "status": l.status,
            })
        })
        .collect();
    let over = report.alerts().filter(|l| l.status == BudgetStatus::OverBudget).count();
    let summary = match alerts.len() {
        0 => "all budgets on track".to_owned(),
        n => format!("{n} budget alert(s), {over} over budget"),
    };
    RunOutcome {
        status: RunStatus::Success,
        summary,
        details: json!({ "year": report.year, "month": report.month, "alerts": alerts }),
    }
}

#[must_use]
pub fn summarize_integrity(diag: &Diagnostics) -> RunOutcome {
    let status = if diag.status == HealthStatus::Unhealthy { RunStatus::Failed } else { RunStatus::Success };
    let summary = match diag.issues.len() {
        0 => "no integrity issues".to_owned(),
        n => format!("{n} integrity issue(s)"),
    };
    RunOutcome {
        status,
        summary,
        details: json!({ "status": diag.status, "issues": diag.issues }),
    }
}

/// Run one rule's action. Errors become a failed outcome.
pub async fn execute(pool: &PgPool, rule: &AutomationRule, today: NaiveDate) -> RunOutcome {
    let result = match rule.action {
        RuleAction::OverdueContracts => {
            let grace = rule.params.get("grace_days").and_then(Value::as_i64).unwrap_or(0);
            contract::find_overdue(pool, rule.tenant_id, today)
                .await
                .map(|rows| summarize_overdue(&rows, today, grace))
                .map_err(|e| e.to_string())
        }
        RuleAction::BudgetAlerts => budget::current_month_report(pool, rule.tenant_id, today)
            .await
            .map(|report| summarize_budget(&report))
            .map_err(|e| e.to_string()),
        RuleAction::IntegrityCheck => tenant::diagnostics(pool, rule.tenant_id)
            .await
            .map(|diag| summarize_integrity(&diag))
            .map_err(|e| e.to_string()),
    };
    result.unwrap_or_else(|e| {
        warn!(rule_id = %rule.id, action = %rule.action, error = %e, "automation: rule failed");
        RunOutcome::failed(format!("{} failed: {e}", rule.action))
    })
}

async fn record_log(
    pool: &PgPool,
    rule: &AutomationRule,
    outcome: &RunOutcome,
    started_at: DateTime<Utc>,
) -> Result<AutomationLog, sqlx::Error> {
    sqlx::query_as::<_, AutomationLog>(&format!(
        r"INSERT INTO automation_logs (tenant_id, rule_id, action, status, summary, details, started_at)
          VALUES ($1, $2, $3, $4, $5, $6, $7)
          RETURNING {LOG_COLUMNS}"
    ))
    .bind(rule.tenant_id)
    .bind(rule.id)
    .bind(rule.action.as_str())
    .bind(outcome.status.as_str())
    .bind(&outcome.summary)
    .bind(&outcome.details)
    .bind(started_at)
    .fetch_one(pool)
    .await
}

async fn run_and_log(pool: &PgPool, rule: &AutomationRule) -> Result<AutomationLog, sqlx::Error> {
    let started_at = Utc::now();
    let outcome = execute(pool, rule, started_at.date_naive()).await;
    record_log(pool, rule, &outcome, started_at).await
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// Claim due rules and push their next run forward in one statement.
async fn claim_due(pool: &PgPool, limit: i64) -> Result<Vec<AutomationRule>, sqlx::Error> {
    sqlx::query_as::<_, AutomationRule>(&format!(
        r"UPDATE automation_rules
          SET last_run_at = now(), next_run_at = now() + make_interval(mins => interval_minutes)
          WHERE id IN (
              SELECT id FROM automation_rules
              WHERE enabled AND next_run_at <= now()
              ORDER BY next_run_at
              LIMIT $1
              FOR UPDATE SKIP LOCKED
          )
          RETURNING {RULE_COLUMNS}"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// One scheduler pass. Returns how many rules ran.
pub async fn run_due_rules(pool: &PgPool) -> Result<usize, sqlx::Error> {
    let rules = claim_due(pool, CLAIM_BATCH).await?;
    for rule in &rules {
        match run_and_log(pool, rule).await {
            Ok(log) => info!(
                tenant_id = %rule.tenant_id,
                rule_id = %rule.id,
                action = %rule.action,
                status = %log.status,
                summary = %log.summary,
                "automation: rule ran"
            ),
            Err(e) => error!(tenant_id = %rule.tenant_id, rule_id = %rule.id, error = %e, "automation: log write failed"),
        }
    }
    Ok(rules.len())
}

/// Spawn the scheduler loop. Returns a handle for shutdown.
pub fn spawn_automation_worker(pool: PgPool, tick: Duration) -> JoinHandle<()> {
    info!(tick_secs = tick.as_secs(), "automation worker configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = run_due_rules(&pool).await {
                error!(error = %e, "automation: claim failed");
            }
        }
    })
}

// =============================================================================
// RULES
// =============================================================================

pub async fn seed_default_rules(conn: &mut PgConnection, tenant_id: Uuid) -> Result<(), sqlx::Error> {
    for &(name, action, interval, enabled) in DEFAULT_RULES {
        sqlx::query(
            "INSERT INTO automation_rules (tenant_id, name, action, interval_minutes, enabled) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(tenant_id)
        .bind(name)
        .bind(action.as_str())
        .bind(interval)
        .bind(enabled)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn list_rules(pool: &PgPool, ctx: &TenantCtx) -> Result<Vec<AutomationRule>, AutomationError> {
    ctx.require(TenantPermission::Administer)?;
    let rows = sqlx::query_as::<_, AutomationRule>(&format!(
        "SELECT {RULE_COLUMNS} FROM automation_rules WHERE tenant_id = $1 ORDER BY created_at, name"
    ))
    .bind(ctx.tenant_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn get_rule(pool: &PgPool, tenant_id: Uuid, rule_id: Uuid) -> Result<AutomationRule, AutomationError> {
    sqlx::query_as::<_, AutomationRule>(&format!(
        "SELECT {RULE_COLUMNS} FROM automation_rules WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(tenant_id)
    .bind(rule_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AutomationError::NotFound)
}

pub async fn create_rule(pool: &PgPool, ctx: &TenantCtx, input: RuleInput) -> Result<AutomationRule, AutomationError> {
    ctx.require(TenantPermission::Administer)?;
    let name = clean_name(&input.name)?;
    validate_interval(input.interval_minutes)?;
    let params = input.params.unwrap_or_else(|| json!({}));
    validate_params(&params)?;

    let mut tx = pool.begin().await?;
    let rule = sqlx::query_as::<_, AutomationRule>(&format!(
        r"INSERT INTO automation_rules (tenant_id, name, action, interval_minutes, enabled, params)
          VALUES ($1, $2, $3, $4, $5, $6)
          RETURNING {RULE_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(&name)
    .bind(input.action.as_str())
    .bind(input.interval_minutes)
    .bind(input.enabled)
    .bind(&params)
    .fetch_one(tx.as_mut())
    .await?;

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new(
            "automation_rule",
            rule.id,
            AuditAction::Create,
            json!({
                "name": rule.name,
                "action": rule.action,
                "interval_minutes": rule.interval_minutes,
                "enabled": rule.enabled,
                "params": rule.params,
            }),
        ),
    )
    .await?;
    tx.commit().await?;

    info!(tenant_id = %ctx.tenant_id, rule_id = %rule.id, action = %rule.action, "automation rule created");
    Ok(rule)
}

/// Changing the interval or re-enabling reschedules from now.
pub async fn update_rule(pool: &PgPool, ctx: &TenantCtx, rule_id: Uuid, patch: RulePatch) -> Result<AutomationRule, AutomationError> {
    ctx.require(TenantPermission::Administer)?;
    let name = patch.name.as_deref().map(clean_name).transpose()?;
    if let Some(minutes) = patch.interval_minutes {
        validate_interval(minutes)?;
    }
    if let Some(params) = &patch.params {
        validate_params(params)?;
    }

    let changes = json!({
        "name": name,
        "interval_minutes": patch.interval_minutes,
        "enabled": patch.enabled,
        "params": patch.params,
    });

    let mut tx = pool.begin().await?;
    let rule = sqlx::query_as::<_, AutomationRule>(&format!(
        r"UPDATE automation_rules
          SET name = COALESCE($3, name),
              interval_minutes = COALESCE($4, interval_minutes),
              enabled = COALESCE($5, enabled),
              params = COALESCE($6, params),
              next_run_at = CASE
                  WHEN $4::int IS NOT NULL OR ($5::bool AND NOT enabled)
                      THEN now() + make_interval(mins => COALESCE($4, interval_minutes))
                  ELSE next_run_at
              END
          WHERE tenant_id = $1 AND id = $2
          RETURNING {RULE_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(rule_id)
    .bind(name)
    .bind(patch.interval_minutes)
    .bind(patch.enabled)
    .bind(patch.params)
    .fetch_optional(tx.as_mut())
    .await?
    .ok_or(AutomationError::NotFound)?;

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new("automation_rule", rule_id, AuditAction::Update, changes),
    )
    .await?;
    tx.commit().await?;

    info!(tenant_id = %ctx.tenant_id, %rule_id, enabled = rule.enabled, "automation rule updated");
    Ok(rule)
}

pub async fn delete_rule(pool: &PgPool, ctx: &TenantCtx, rule_id: Uuid) -> Result<(), AutomationError> {
    ctx.require(TenantPermission::Administer)?;
    let mut tx = pool.begin().await?;
    let result = sqlx::query("DELETE FROM automation_rules WHERE tenant_id = $1 AND id = $2")
        .bind(ctx.tenant_id)
        .bind(rule_id)
        .execute(tx.as_mut())
        .await?;
    if result.rows_affected() == 0 {
        return Err(AutomationError::NotFound);
    }
    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new("automation_rule", rule_id, AuditAction::Delete, json!({})),
    )
    .await?;
    tx.commit().await?;
    info!(tenant_id = %ctx.tenant_id, %rule_id, "automation rule deleted");
    Ok(())
}

/// Run a rule immediately, enabled or not. The schedule is left alone.
pub async fn run_rule_now(pool: &PgPool, ctx: &TenantCtx, rule_id: Uuid) -> Result<AutomationLog, AutomationError> {
    ctx.require(TenantPermission::Administer)?;
    let rule = get_rule(pool, ctx.tenant_id, rule_id).await?;
    let log = run_and_log(pool, &rule).await?;
    sqlx::query("UPDATE automation_rules SET last_run_at = $2 WHERE id = $1")
        .bind(rule.id)
        .bind(log.finished_at)
        .execute(pool)
        .await?;

    info!(tenant_id = %ctx.tenant_id, %rule_id, status = %log.status, "automation rule run manually");
    Ok(log)
}

pub async fn list_logs(pool: &PgPool, ctx: &TenantCtx, filter: &LogFilter) -> Result<Vec<AutomationLog>, AutomationError> {
    ctx.require(TenantPermission::Administer)?;
    let rows = sqlx::query_as::<_, AutomationLog>(&format!(
        r"SELECT {LOG_COLUMNS} FROM automation_logs
          WHERE tenant_id = $1 AND ($2::uuid IS NULL OR rule_id = $2)
          ORDER BY finished_at DESC
          LIMIT $3"
    ))
    .bind(ctx.tenant_id)
    .bind(filter.rule_id)
    .bind(filter.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
#[path = "automation_test.rs"]
mod tests;
