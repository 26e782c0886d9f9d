//! Cost center, budget and budget report routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::auth::TenantUser;
use crate::services::budget::{
    self, Budget, BudgetFilter, BudgetInput, BudgetReport, CostCenter, CostCenterPatch, NewCostCenter,
};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ReportQuery {
    pub year: i32,
    pub month: Option<u32>,
}

/// `GET /api/budgets/cost-centers`
pub async fn list_cost_centers(
    State(state): State<AppState>,
    auth: TenantUser,
) -> Result<Json<Vec<CostCenter>>, ApiError> {
    Ok(Json(budget::list_cost_centers(&state.pool, &auth.ctx).await?))
}

/// `POST /api/budgets/cost-centers`
pub async fn create_cost_center(
    State(state): State<AppState>,
    auth: TenantUser,
    Json(body): Json<NewCostCenter>,
) -> Result<(StatusCode, Json<CostCenter>), ApiError> {
    let center = budget::create_cost_center(&state.pool, &auth.ctx, body).await?;
    Ok((StatusCode::CREATED, Json(center)))
}

/// `PATCH /api/budgets/cost-centers/{id}`
pub async fn update_cost_center(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
    Json(body): Json<CostCenterPatch>,
) -> Result<Json<CostCenter>, ApiError> {
    Ok(Json(budget::update_cost_center(&state.pool, &auth.ctx, id, body).await?))
}

/// `DELETE /api/budgets/cost-centers/{id}`
pub async fn delete_cost_center(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    budget::delete_cost_center(&state.pool, &auth.ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/budgets?year=&cost_center_id=`
pub async fn list_budgets(
    State(state): State<AppState>,
    auth: TenantUser,
    Query(filter): Query<BudgetFilter>,
) -> Result<Json<Vec<Budget>>, ApiError> {
    Ok(Json(budget::list_budgets(&state.pool, &auth.ctx, &filter).await?))
}

/// `PUT /api/budgets`: upsert on (cost center, year, month, account).
pub async fn upsert_budget(
    State(state): State<AppState>,
    auth: TenantUser,
    Json(body): Json<BudgetInput>,
) -> Result<Json<Budget>, ApiError> {
    Ok(Json(budget::upsert_budget(&state.pool, &auth.ctx, body).await?))
}

/// `DELETE /api/budgets/{id}`
pub async fn delete_budget(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    budget::delete_budget(&state.pool, &auth.ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/budgets/report?year=&month=`
pub async fn budget_report(
    State(state): State<AppState>,
    auth: TenantUser,
    Query(q): Query<ReportQuery>,
) -> Result<Json<BudgetReport>, ApiError> {
    Ok(Json(budget::budget_report(&state.pool, &auth.ctx, q.year, q.month).await?))
}
