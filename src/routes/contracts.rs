//! Rental contract routes: CRUD, lifecycle transitions and payments.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::auth::TenantUser;
use crate::routes::optional_json;
use crate::services::contract::{
    self, CompleteInput, Contract, ContractFilter, ContractInput, ContractPatch, PaymentInput, PaymentSummary,
    TransitionInput,
};
use crate::services::ledger::EntryHeader;
use crate::state::AppState;

/// `GET /api/contracts?status=&customer_id=&vehicle_id=`
pub async fn list_contracts(
    State(state): State<AppState>,
    auth: TenantUser,
    Query(filter): Query<ContractFilter>,
) -> Result<Json<Vec<Contract>>, ApiError> {
    Ok(Json(contract::list_contracts(&state.pool, &auth.ctx, &filter).await?))
}

/// `GET /api/contracts/overdue`
pub async fn list_overdue(State(state): State<AppState>, auth: TenantUser) -> Result<Json<Vec<Contract>>, ApiError> {
    Ok(Json(contract::list_overdue(&state.pool, &auth.ctx).await?))
}

/// `POST /api/contracts`: creates a priced draft.
pub async fn create_contract(
    State(state): State<AppState>,
    auth: TenantUser,
    Json(body): Json<ContractInput>,
) -> Result<(StatusCode, Json<Contract>), ApiError> {
    let created = contract::create_contract(&state.pool, &auth.ctx, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /api/contracts/{id}`
pub async fn get_contract(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Contract>, ApiError> {
    Ok(Json(contract::get_contract(&state.pool, &auth.ctx, id).await?))
}

/// `PATCH /api/contracts/{id}`: drafts only.
pub async fn update_contract(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ContractPatch>,
) -> Result<Json<Contract>, ApiError> {
    Ok(Json(contract::update_draft(&state.pool, &auth.ctx, id, body).await?))
}

/// `POST /api/contracts/{id}/activate`
pub async fn activate(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<Contract>, ApiError> {
    let input: TransitionInput = optional_json(&body)?;
    Ok(Json(contract::activate(&state.pool, &auth.ctx, id, input).await?))
}

/// `POST /api/contracts/{id}/complete`
pub async fn complete(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
    Json(body): Json<CompleteInput>,
) -> Result<Json<Contract>, ApiError> {
    Ok(Json(contract::complete(&state.pool, &auth.ctx, id, body).await?))
}

/// `POST /api/contracts/{id}/cancel`
pub async fn cancel(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<Contract>, ApiError> {
    let input: TransitionInput = optional_json(&body)?;
    Ok(Json(contract::cancel(&state.pool, &auth.ctx, id, input).await?))
}

/// `GET /api/contracts/{id}/payments`
pub async fn payment_summary(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentSummary>, ApiError> {
    Ok(Json(contract::payment_summary(&state.pool, &auth.ctx, id).await?))
}

/// `POST /api/contracts/{id}/payments`: returns the posted payment entry.
pub async fn record_payment(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
    Json(body): Json<PaymentInput>,
) -> Result<(StatusCode, Json<EntryHeader>), ApiError> {
    let entry = contract::record_payment(&state.pool, &auth.ctx, id, body).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
