//! Financial analytics: monthly series, trend forecast, KPIs, insights.
//!
//! DESIGN
//! ======
//! The report is computed from posted ledger data and contract facts with
//! plain SQL aggregates, then shaped by pure functions (`fill_series`,
//! `fit_trend`, `project`, `compute_kpis`, `derive_insights`) that are unit
//! tested without a database.
//!
//! The optional narrative sends the finished report to the configured LLM.
//! Requests are limited per tenant by count and by token budget; tokens are
//! reserved before the call and settled or released after it.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::llm::LlmChat;
use crate::llm::types::{LlmError, Message};
use crate::rate_limit::{NARRATIVE_WINDOW, RateLimitError};
use crate::services::budget::{self, BudgetError, BudgetStatus};
use crate::services::tenant::{TenantCtx, TenantError, TenantPermission};
use crate::state::AppState;

pub const DEFAULT_MONTHS: u32 = 12;
pub const MAX_MONTHS: u32 = 36;
pub const DEFAULT_HORIZON: u32 = 3;
pub const MAX_HORIZON: u32 = 12;

const LOW_UTILIZATION_BP: i64 = 5_000;
const LOW_COLLECTION_BP: i64 = 8_000;
const NARRATIVE_MAX_TOKENS: u32 = 600;

const NARRATIVE_SYSTEM_PROMPT: &str = "You are a financial analyst for a car rental company. \
You receive a JSON report with monthly revenue and expenses (integer cents), a linear forecast, \
KPIs (rates in basis points) and rule-based insights. Write a short plain-text summary for the \
owner: at most five sentences, no markdown, amounts in the currency given. Do not invent numbers \
that are not in the report.";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error(transparent)]
    Tenant(#[from] TenantError),
    #[error(transparent)]
    Budget(#[from] BudgetError),
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("AI narrative is not configured")]
    AiUnavailable,
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for AnalyticsError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Tenant(e) => e.error_code(),
            Self::Budget(e) => e.error_code(),
            Self::RateLimited(e) => e.error_code(),
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::AiUnavailable => "E_AI_UNAVAILABLE",
            Self::Llm(e) => e.error_code(),
            Self::Database(_) => crate::error::E_DATABASE,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Tenant(e) => e.status(),
            Self::Budget(e) => e.status(),
            Self::RateLimited(e) => e.status(),
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::AiUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Llm(e) => e.status(),
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Llm(e) => e.retryable(),
            _ => false,
        }
    }
}

crate::error::impl_api_error!(AnalyticsError);

// =============================================================================
// PARAMETERS
// =============================================================================

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ReportParams {
    pub months: Option<u32>,
    pub horizon: Option<u32>,
}

impl ReportParams {
    /// Apply defaults and bounds.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for zero or out-of-range values.
    pub fn resolve(self) -> Result<(u32, u32), AnalyticsError> {
        let months = self.months.unwrap_or(DEFAULT_MONTHS);
        let horizon = self.horizon.unwrap_or(DEFAULT_HORIZON);
        if !(1..=MAX_MONTHS).contains(&months) {
            return Err(AnalyticsError::InvalidInput(format!("months must be 1..={MAX_MONTHS}")));
        }
        if !(1..=MAX_HORIZON).contains(&horizon) {
            return Err(AnalyticsError::InvalidInput(format!("horizon must be 1..={MAX_HORIZON}")));
        }
        Ok((months, horizon))
    }
}

// =============================================================================
// SERIES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthlyPoint {
    /// First day of the month.
    pub month: NaiveDate,
    pub revenue: i64,
    pub expense: i64,
    pub net: i64,
}

#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct MonthTotals {
    pub month: NaiveDate,
    pub revenue: i64,
    pub expense: i64,
}

#[must_use]
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// The `count` month starts ending with the month containing `today`.
#[must_use]
pub fn trailing_months(today: NaiveDate, count: u32) -> Vec<NaiveDate> {
    let current = month_start(today);
    (0..count)
        .rev()
        .filter_map(|back| current.checked_sub_months(Months::new(back)))
        .collect()
}

#[must_use]
pub fn month_end(start: NaiveDate) -> NaiveDate {
    start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(start)
}

/// One point per month, zero where the ledger has nothing.
#[must_use]
pub fn fill_series(months: &[NaiveDate], totals: &[MonthTotals]) -> Vec<MonthlyPoint> {
    months
        .iter()
        .map(|&month| {
            let (revenue, expense) = totals
                .iter()
                .find(|t| t.month == month)
                .map_or((0, 0), |t| (t.revenue, t.expense));
            MonthlyPoint { month, revenue, expense, net: revenue - expense }
        })
        .collect()
}

// =============================================================================
// FORECAST
// =============================================================================

/// Least-squares line over `x = 0..n`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trend {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl Trend {
    #[must_use]
    pub fn at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// `None` with fewer than two points.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fit_trend(values: &[i64]) -> Option<Trend> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let ys: Vec<f64> = values.iter().map(|&v| v as f64).collect();
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    // A flat series is fit perfectly by a flat line.
    let r_squared = if syy == 0.0 { 1.0 } else { (sxy * sxy) / (sxx * syy) };
    Some(Trend { slope, intercept, r_squared })
}

/// Next `horizon` values, never negative.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn project(values: &[i64], trend: Option<&Trend>, horizon: u32) -> Vec<i64> {
    match trend {
        Some(t) => {
            let n = values.len() as f64;
            (0..horizon)
                .map(|h| t.at(n + f64::from(h)).round().max(0.0) as i64)
                .collect()
        }
        None => {
            let flat = values.last().copied().unwrap_or(0).max(0);
            vec![flat; horizon as usize]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ForecastPoint {
    pub month: NaiveDate,
    pub revenue: i64,
    pub expense: i64,
    pub net: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Forecast {
    pub revenue_trend: Option<Trend>,
    pub expense_trend: Option<Trend>,
    pub points: Vec<ForecastPoint>,
}

impl Forecast {
    #[must_use]
    pub fn net_total(&self) -> i64 {
        self.points.iter().map(|p| p.net).sum()
    }
}

#[must_use]
pub fn forecast(series: &[MonthlyPoint], horizon: u32) -> Forecast {
    let revenue: Vec<i64> = series.iter().map(|p| p.revenue).collect();
    let expense: Vec<i64> = series.iter().map(|p| p.expense).collect();
    let revenue_trend = fit_trend(&revenue);
    let expense_trend = fit_trend(&expense);
    let projected_revenue = project(&revenue, revenue_trend.as_ref(), horizon);
    let projected_expense = project(&expense, expense_trend.as_ref(), horizon);

    let last = series.last().map(|p| p.month);
    let points = projected_revenue
        .into_iter()
        .zip(projected_expense)
        .enumerate()
        .filter_map(|(i, (revenue, expense))| {
            let offset = u32::try_from(i).ok()? + 1;
            let month = last?.checked_add_months(Months::new(offset))?;
            Some(ForecastPoint { month, revenue, expense, net: revenue - expense })
        })
        .collect();

    Forecast { revenue_trend, expense_trend, points }
}

// =============================================================================
// KPIS
// =============================================================================

/// Raw numbers the KPIs are derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KpiFacts {
    pub period_days: i64,
    pub fleet_size: i64,
    pub rented_vehicle_days: i64,
    pub completed_contracts: i64,
    pub completed_value: i64,
    pub revenue: i64,
    pub invoiced: i64,
    pub collected: i64,
    pub overdue_contracts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Kpis {
    pub utilization_bp: Option<i64>,
    pub average_contract_value: Option<i64>,
    pub revenue_per_vehicle: Option<i64>,
    pub collection_rate_bp: Option<i64>,
    pub overdue_contracts: i64,
}

fn ratio_bp(numerator: i64, denominator: i64) -> Option<i64> {
    if denominator <= 0 {
        return None;
    }
    i64::try_from(i128::from(numerator) * 10_000 / i128::from(denominator)).ok()
}

fn mean(total: i64, count: i64) -> Option<i64> {
    (count > 0).then(|| total / count)
}

#[must_use]
pub fn compute_kpis(facts: &KpiFacts) -> Kpis {
    let capacity = facts.fleet_size.checked_mul(facts.period_days).unwrap_or(i64::MAX);
    Kpis {
        utilization_bp: ratio_bp(facts.rented_vehicle_days, capacity),
        average_contract_value: mean(facts.completed_value, facts.completed_contracts),
        revenue_per_vehicle: mean(facts.revenue, facts.fleet_size),
        collection_rate_bp: ratio_bp(facts.collected, facts.invoiced),
        overdue_contracts: facts.overdue_contracts,
    }
}

// =============================================================================
// INSIGHTS
// =============================================================================

crate::db::text_enum! {
    pub enum InsightSeverity {
        Info => "info",
        Warning => "warning",
        Critical => "critical",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Insight {
    pub code: &'static str,
    pub severity: InsightSeverity,
    pub message: String,
}

impl Insight {
    fn new(code: &'static str, severity: InsightSeverity, message: impl Into<String>) -> Self {
        Self { code, severity, message: message.into() }
    }
}

/// Most severe first.
#[must_use]
pub fn derive_insights(forecast: &Forecast, kpis: &Kpis, over_budget_centers: &[String]) -> Vec<Insight> {
    let mut out = Vec::new();

    if !over_budget_centers.is_empty() {
        out.push(Insight::new(
            "OVER_BUDGET",
            InsightSeverity::Critical,
            format!("over budget this month: {}", over_budget_centers.join(", ")),
        ));
    }
    let projected_net = forecast.net_total();
    if projected_net < 0 {
        out.push(Insight::new(
            "NEGATIVE_FORECAST",
            InsightSeverity::Critical,
            format!("forecast net income is negative ({projected_net})"),
        ));
    }
    if let (Some(rev), Some(exp)) = (forecast.revenue_trend, forecast.expense_trend) {
        if exp.slope > rev.slope {
            out.push(Insight::new(
                "EXPENSES_OUTPACING_REVENUE",
                InsightSeverity::Warning,
                format!("expenses trend {:.0}/month against revenue {:.0}/month", exp.slope, rev.slope),
            ));
        } else if rev.slope > 0.0 {
            out.push(Insight::new(
                "REVENUE_GROWING",
                InsightSeverity::Info,
                format!("revenue trending up by {:.0}/month", rev.slope),
            ));
        }
    }
    if let Some(bp) = kpis.utilization_bp.filter(|&bp| bp < LOW_UTILIZATION_BP) {
        out.push(Insight::new(
            "LOW_UTILIZATION",
            InsightSeverity::Warning,
            format!("fleet utilization {}.{:02}% is below 50%", bp / 100, bp % 100),
        ));
    }
    if let Some(bp) = kpis.collection_rate_bp.filter(|&bp| bp < LOW_COLLECTION_BP) {
        out.push(Insight::new(
            "LOW_COLLECTION",
            InsightSeverity::Warning,
            format!("collection rate {}.{:02}% is below 80%", bp / 100, bp % 100),
        ));
    }
    if kpis.overdue_contracts > 0 {
        out.push(Insight::new(
            "OVERDUE_CONTRACTS",
            InsightSeverity::Info,
            format!("{} active contract(s) past their end date", kpis.overdue_contracts),
        ));
    }

    out.sort_by_key(|i| std::cmp::Reverse(severity_rank(i.severity)));
    out
}

fn severity_rank(s: InsightSeverity) -> u8 {
    match s {
        InsightSeverity::Info => 0,
        InsightSeverity::Warning => 1,
        InsightSeverity::Critical => 2,
    }
}

// =============================================================================
// REPORT
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsReport {
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub series: Vec<MonthlyPoint>,
    pub forecast: Forecast,
    pub kpis: Kpis,
    pub insights: Vec<Insight>,
}

async fn load_totals(pool: &PgPool, tenant_id: Uuid, from: NaiveDate, to: NaiveDate) -> Result<Vec<MonthTotals>, sqlx::Error> {
    sqlx::query_as::<_, MonthTotals>(
        r"SELECT date_trunc('month', e.entry_date)::date AS month,
                 COALESCE(SUM(CASE WHEN a.kind = 'revenue' THEN l.credit - l.debit ELSE 0 END), 0)::BIGINT AS revenue,
                 COALESCE(SUM(CASE WHEN a.kind = 'expense' THEN l.debit - l.credit ELSE 0 END), 0)::BIGINT AS expense
          FROM journal_lines l
          JOIN journal_entries e ON e.id = l.entry_id
          JOIN accounts a ON a.id = l.account_id
          WHERE e.tenant_id = $1
            AND e.status IN ('posted', 'reversed')
            AND e.entry_date BETWEEN $2 AND $3
            AND a.kind IN ('revenue', 'expense')
          GROUP BY 1
          ORDER BY 1",
    )
    .bind(tenant_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await
}

async fn load_kpi_facts(
    pool: &PgPool,
    tenant_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
    today: NaiveDate,
    revenue: i64,
) -> Result<KpiFacts, sqlx::Error> {
    let fleet_size: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM vehicles WHERE tenant_id = $1 AND status <> 'retired'")
            .bind(tenant_id)
            .fetch_one(pool)
            .await?;

    let (rented_vehicle_days, completed_contracts, completed_value, overdue_contracts): (i64, i64, i64, i64) =
        sqlx::query_as(
            r"SELECT
                COALESCE(SUM(GREATEST(0,
                    LEAST(COALESCE(returned_on, end_date), $3) - GREATEST(start_date, $2) + 1
                )) FILTER (WHERE status IN ('active', 'completed')), 0)::BIGINT,
                COUNT(*) FILTER (WHERE status = 'completed' AND returned_on BETWEEN $2 AND $3),
                COALESCE(SUM(total_amount) FILTER (WHERE status = 'completed' AND returned_on BETWEEN $2 AND $3), 0)::BIGINT,
                COUNT(*) FILTER (WHERE status = 'active' AND end_date < $4)
              FROM contracts
              WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .bind(today)
        .fetch_one(pool)
        .await?;

    let (invoiced, collected): (i64, i64) = sqlx::query_as(
        r"SELECT
            COALESCE(SUM(total) FILTER (WHERE source = 'contract_invoice'), 0)::BIGINT,
            COALESCE(SUM(total) FILTER (WHERE source = 'contract_payment'), 0)::BIGINT
          FROM journal_entries
          WHERE tenant_id = $1 AND status = 'posted' AND entry_date BETWEEN $2 AND $3",
    )
    .bind(tenant_id)
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await?;

    Ok(KpiFacts {
        period_days: (to - from).num_days() + 1,
        fleet_size,
        rented_vehicle_days,
        completed_contracts,
        completed_value,
        revenue,
        invoiced,
        collected,
        overdue_contracts,
    })
}

/// Full report for the trailing months ending with `today`'s month.
pub async fn build_report(
    pool: &PgPool,
    tenant_id: Uuid,
    months: u32,
    horizon: u32,
    today: NaiveDate,
) -> Result<AnalyticsReport, AnalyticsError> {
    let starts = trailing_months(today, months);
    let period_from = starts.first().copied().unwrap_or_else(|| month_start(today));
    let period_to = month_end(month_start(today));

    let totals = load_totals(pool, tenant_id, period_from, period_to).await?;
    let series = fill_series(&starts, &totals);
    let forecast = forecast(&series, horizon);

    let revenue = series.iter().map(|p| p.revenue).sum();
    let facts = load_kpi_facts(pool, tenant_id, period_from, period_to, today, revenue).await?;
    let kpis = compute_kpis(&facts);

    let budget = budget::current_month_report(pool, tenant_id, today).await?;
    let over_budget: Vec<String> = budget
        .rollup
        .iter()
        .filter(|r| r.status == BudgetStatus::OverBudget)
        .map(|r| r.code.clone())
        .collect();
    let insights = derive_insights(&forecast, &kpis, &over_budget);

    Ok(AnalyticsReport { period_from, period_to, series, forecast, kpis, insights })
}

pub async fn report(pool: &PgPool, ctx: &TenantCtx, params: ReportParams) -> Result<AnalyticsReport, AnalyticsError> {
    ctx.require(TenantPermission::View)?;
    let (months, horizon) = params.resolve()?;
    build_report(pool, ctx.tenant_id, months, horizon, Utc::now().date_naive()).await
}

// =============================================================================
// NARRATIVE
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Narrative {
    pub text: String,
    pub model: String,
    pub report: AnalyticsReport,
}

/// Rough prompt size for the token reservation; four bytes per token.
fn estimate_tokens(prompt: &str) -> u64 {
    (prompt.len() as u64).div_ceil(4) + u64::from(NARRATIVE_MAX_TOKENS)
}

/// Ask the LLM to summarise an already computed report.
pub async fn narrate(
    state: &AppState,
    llm: &Arc<dyn LlmChat>,
    tenant_id: Uuid,
    currency: &str,
    report: AnalyticsReport,
) -> Result<Narrative, AnalyticsError> {
    let key = format!("narrative:{tenant_id}");
    let payload = serde_json::json!({ "currency": currency, "report": &report });
    let prompt = format!("<report>{payload}</report>");
    let reserved = estimate_tokens(&prompt);
    state.rate_limiter.admit(&key, NARRATIVE_WINDOW, reserved)?;

    let response = match llm.chat(NARRATIVE_MAX_TOKENS, NARRATIVE_SYSTEM_PROMPT, &[Message::user(prompt)]).await {
        Ok(response) => response,
        Err(e) => {
            state.rate_limiter.release_tokens(&key, reserved);
            warn!(%tenant_id, error = %e, "analytics: narrative failed");
            return Err(e.into());
        }
    };
    state.rate_limiter.record_tokens(&key, response.total_tokens(), reserved);

    info!(
        %tenant_id,
        input_tokens = response.input_tokens,
        output_tokens = response.output_tokens,
        "analytics: narrative generated"
    );
    Ok(Narrative { text: response.text().trim().to_owned(), model: response.model, report })
}

pub async fn narrative(state: &AppState, ctx: &TenantCtx, params: ReportParams) -> Result<Narrative, AnalyticsError> {
    ctx.require(TenantPermission::View)?;
    let llm = state.llm.clone().ok_or(AnalyticsError::AiUnavailable)?;
    let (months, horizon) = params.resolve()?;

    let currency: String = sqlx::query_scalar("SELECT currency FROM tenants WHERE id = $1")
        .bind(ctx.tenant_id)
        .fetch_optional(&state.pool)
        .await?
        .unwrap_or_else(|| state.settings.default_currency.clone());
    let report = build_report(&state.pool, ctx.tenant_id, months, horizon, Utc::now().date_naive()).await?;
    narrate(state, &llm, ctx.tenant_id, &currency, report).await
}

#[cfg(test)]
#[path = "analytics_test.rs"]
mod tests;
