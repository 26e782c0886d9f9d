//! Analytics, automation and audit routes.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::auth::TenantUser;
use crate::routes::optional_json;
use crate::services::analytics::{self, AnalyticsReport, Narrative, ReportParams};
use crate::services::audit::{self, AuditFilter, AuditRow, ChainReport};
use crate::services::automation::{self, AutomationLog, AutomationRule, LogFilter, RuleInput, RulePatch};
use crate::services::tenant::TenantPermission;
use crate::state::AppState;

// =============================================================================
// ANALYTICS
// =============================================================================

/// `GET /api/analytics/report?months=&horizon=`
pub async fn analytics_report(
    State(state): State<AppState>,
    auth: TenantUser,
    Query(params): Query<ReportParams>,
) -> Result<Json<AnalyticsReport>, ApiError> {
    Ok(Json(analytics::report(&state.pool, &auth.ctx, params).await?))
}

/// `POST /api/analytics/narrative`: body `{months?, horizon?}` may be empty.
pub async fn analytics_narrative(
    State(state): State<AppState>,
    auth: TenantUser,
    body: Bytes,
) -> Result<Json<Narrative>, ApiError> {
    let params: ReportParams = optional_json(&body)?;
    Ok(Json(analytics::narrative(&state, &auth.ctx, params).await?))
}

// =============================================================================
// AUTOMATION
// =============================================================================

/// `GET /api/automation/rules`
pub async fn list_rules(
    State(state): State<AppState>,
    auth: TenantUser,
) -> Result<Json<Vec<AutomationRule>>, ApiError> {
    Ok(Json(automation::list_rules(&state.pool, &auth.ctx).await?))
}

/// `POST /api/automation/rules`
pub async fn create_rule(
    State(state): State<AppState>,
    auth: TenantUser,
    Json(body): Json<RuleInput>,
) -> Result<(StatusCode, Json<AutomationRule>), ApiError> {
    let rule = automation::create_rule(&state.pool, &auth.ctx, body).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// `PATCH /api/automation/rules/{id}`
pub async fn update_rule(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
    Json(body): Json<RulePatch>,
) -> Result<Json<AutomationRule>, ApiError> {
    Ok(Json(automation::update_rule(&state.pool, &auth.ctx, id, body).await?))
}

/// `DELETE /api/automation/rules/{id}`
pub async fn delete_rule(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    automation::delete_rule(&state.pool, &auth.ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/automation/rules/{id}/run`
pub async fn run_rule(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<Json<AutomationLog>, ApiError> {
    Ok(Json(automation::run_rule_now(&state.pool, &auth.ctx, id).await?))
}

/// `GET /api/automation/logs?rule_id=&limit=`
pub async fn list_logs(
    State(state): State<AppState>,
    auth: TenantUser,
    Query(filter): Query<LogFilter>,
) -> Result<Json<Vec<AutomationLog>>, ApiError> {
    Ok(Json(automation::list_logs(&state.pool, &auth.ctx, &filter).await?))
}

// =============================================================================
// AUDIT
// =============================================================================

/// `GET /api/audit?entity_type=&entity_id=&limit=`
pub async fn list_audit(
    State(state): State<AppState>,
    auth: TenantUser,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<Vec<AuditRow>>, ApiError> {
    auth.ctx.require(TenantPermission::View)?;
    Ok(Json(audit::list(&state.pool, auth.ctx.tenant_id, &filter).await?))
}

/// `GET /api/audit/verify`
pub async fn verify_audit(State(state): State<AppState>, auth: TenantUser) -> Result<Json<ChainReport>, ApiError> {
    auth.ctx.require(TenantPermission::View)?;
    Ok(Json(audit::verify_chain(&state.pool, auth.ctx.tenant_id).await?))
}
