//! Customer and vehicle routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::auth::TenantUser;
use crate::services::contract::{self, Contract, ContractFilter};
use crate::services::customer::{self, Customer, CustomerFilter, CustomerInput, CustomerPatch};
use crate::services::vehicle::{self, Vehicle, VehicleFilter, VehicleInput, VehiclePatch};
use crate::state::AppState;

// =============================================================================
// CUSTOMERS
// =============================================================================

/// `GET /api/customers`
pub async fn list_customers(
    State(state): State<AppState>,
    auth: TenantUser,
    Query(filter): Query<CustomerFilter>,
) -> Result<Json<Vec<Customer>>, ApiError> {
    Ok(Json(customer::list_customers(&state.pool, &auth.ctx, &filter).await?))
}

/// `POST /api/customers`
pub async fn create_customer(
    State(state): State<AppState>,
    auth: TenantUser,
    Json(body): Json<CustomerInput>,
) -> Result<(StatusCode, Json<Customer>), ApiError> {
    let created = customer::create_customer(&state.pool, &auth.ctx, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /api/customers/{id}`
pub async fn get_customer(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Customer>, ApiError> {
    Ok(Json(customer::get_customer(&state.pool, &auth.ctx, id).await?))
}

/// `PATCH /api/customers/{id}`
pub async fn update_customer(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
    Json(body): Json<CustomerPatch>,
) -> Result<Json<Customer>, ApiError> {
    Ok(Json(customer::update_customer(&state.pool, &auth.ctx, id, body).await?))
}

/// `DELETE /api/customers/{id}`
pub async fn delete_customer(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    customer::delete_customer(&state.pool, &auth.ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/customers/{id}/contracts` 404 when the customer is unknown.
pub async fn customer_contracts(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Contract>>, ApiError> {
    customer::get_customer(&state.pool, &auth.ctx, id).await?;
    let filter = ContractFilter { customer_id: Some(id), ..ContractFilter::default() };
    Ok(Json(contract::list_contracts(&state.pool, &auth.ctx, &filter).await?))
}

// =============================================================================
// VEHICLES
// =============================================================================

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// `GET /api/vehicles`
pub async fn list_vehicles(
    State(state): State<AppState>,
    auth: TenantUser,
    Query(filter): Query<VehicleFilter>,
) -> Result<Json<Vec<Vehicle>>, ApiError> {
    Ok(Json(vehicle::list_vehicles(&state.pool, &auth.ctx, &filter).await?))
}

/// `GET /api/vehicles/availability?from=&to=`
pub async fn availability(
    State(state): State<AppState>,
    auth: TenantUser,
    Query(q): Query<AvailabilityQuery>,
) -> Result<Json<Vec<Vehicle>>, ApiError> {
    Ok(Json(vehicle::availability(&state.pool, &auth.ctx, q.from, q.to).await?))
}

/// `POST /api/vehicles`
pub async fn create_vehicle(
    State(state): State<AppState>,
    auth: TenantUser,
    Json(body): Json<VehicleInput>,
) -> Result<(StatusCode, Json<Vehicle>), ApiError> {
    let created = vehicle::create_vehicle(&state.pool, &auth.ctx, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /api/vehicles/{id}`
pub async fn get_vehicle(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vehicle>, ApiError> {
    Ok(Json(vehicle::get_vehicle(&state.pool, &auth.ctx, id).await?))
}

/// `PATCH /api/vehicles/{id}`
pub async fn update_vehicle(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
    Json(body): Json<VehiclePatch>,
) -> Result<Json<Vehicle>, ApiError> {
    Ok(Json(vehicle::update_vehicle(&state.pool, &auth.ctx, id, body).await?))
}

/// `DELETE /api/vehicles/{id}`
pub async fn delete_vehicle(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    vehicle::delete_vehicle(&state.pool, &auth.ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
