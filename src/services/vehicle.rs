//! Fleet vehicles.
//!
//! `rented` is owned by the contract lifecycle: a patch may move a vehicle
//! between `available`, `maintenance`, and `retired`, but never into or out
//! of `rented`.

use axum::http::StatusCode;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::text_enum;
use crate::error::ErrorCode;
use crate::services::audit::{self, AuditAction, AuditEvent};
use crate::services::tenant::{TenantCtx, TenantError, TenantPermission};

const MIN_YEAR: i32 = 1950;

text_enum! {
    pub enum VehicleStatus {
        Available => "available",
        Rented => "rented",
        Maintenance => "maintenance",
        Retired => "retired",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VehicleError {
    #[error(transparent)]
    Tenant(#[from] TenantError),
    #[error("vehicle not found")]
    NotFound,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("plate already registered: {0}")]
    DuplicatePlate(String),
    #[error("vehicle was modified (current version {current})")]
    VersionConflict { current: i32 },
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: VehicleStatus, to: VehicleStatus },
    #[error("vehicle is referenced by contracts")]
    InUse,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for VehicleError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Tenant(e) => e.error_code(),
            Self::NotFound => "E_NOT_FOUND",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::DuplicatePlate(_) => "E_DUPLICATE",
            Self::VersionConflict { .. } => "E_VERSION_CONFLICT",
            Self::InvalidTransition { .. } => "E_INVALID_TRANSITION",
            Self::InUse => "E_IN_USE",
            Self::Database(_) => crate::error::E_DATABASE,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Tenant(e) => e.status(),
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::DuplicatePlate(_) | Self::VersionConflict { .. } | Self::InvalidTransition { .. } | Self::InUse => {
                StatusCode::CONFLICT
            }
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

crate::error::impl_api_error!(VehicleError);

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Vehicle {
    pub id: Uuid,
    pub plate: String,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub vin: Option<String>,
    pub color: Option<String>,
    pub daily_rate: i64,
    pub odometer_km: i64,
    #[sqlx(try_from = "String")]
    pub status: VehicleStatus,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehicleInput {
    pub plate: String,
    pub make: String,
    pub model: String,
    pub year: i32,
    #[serde(default)]
    pub vin: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    pub daily_rate: i64,
    #[serde(default)]
    pub odometer_km: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VehiclePatch {
    pub version: i32,
    pub plate: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub vin: Option<String>,
    pub color: Option<String>,
    pub daily_rate: Option<i64>,
    pub odometer_km: Option<i64>,
    pub status: Option<VehicleStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VehicleFilter {
    pub status: Option<VehicleStatus>,
}

pub(crate) const VEHICLE_COLUMNS: &str =
    "id, plate, make, model, year, vin, color, daily_rate, odometer_km, status, version, created_at, updated_at";

/// Uppercase with all whitespace removed.
#[must_use]
pub fn normalize_plate(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_uppercase).collect()
}

/// Field rules shared by create and patch. `today` bounds the model year.
pub fn validate_fields(plate: &str, make: &str, model: &str, year: i32, daily_rate: i64, odometer_km: i64, today: NaiveDate) -> Result<(), VehicleError> {
    if plate.is_empty() {
        return Err(VehicleError::InvalidInput("plate is required".into()));
    }
    if make.trim().is_empty() || model.trim().is_empty() {
        return Err(VehicleError::InvalidInput("make and model are required".into()));
    }
    let max_year = today.year() + 1;
    if !(MIN_YEAR..=max_year).contains(&year) {
        return Err(VehicleError::InvalidInput(format!("year must be {MIN_YEAR}..={max_year}")));
    }
    if daily_rate <= 0 {
        return Err(VehicleError::InvalidInput("daily_rate must be positive".into()));
    }
    if odometer_km < 0 {
        return Err(VehicleError::InvalidInput("odometer_km must be non-negative".into()));
    }
    Ok(())
}

/// Status changes a patch may make.
pub fn check_manual_transition(from: VehicleStatus, to: VehicleStatus) -> Result<(), VehicleError> {
    if from != to && (from == VehicleStatus::Rented || to == VehicleStatus::Rented) {
        return Err(VehicleError::InvalidTransition { from, to });
    }
    Ok(())
}

fn map_write_error(e: sqlx::Error, plate: &str) -> VehicleError {
    if crate::db::is_unique_violation(&e) {
        VehicleError::DuplicatePlate(plate.to_owned())
    } else {
        VehicleError::Database(e)
    }
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned)
}

pub async fn list_vehicles(pool: &PgPool, ctx: &TenantCtx, filter: &VehicleFilter) -> Result<Vec<Vehicle>, VehicleError> {
    ctx.require(TenantPermission::View)?;
    let rows = sqlx::query_as::<_, Vehicle>(&format!(
        r"SELECT {VEHICLE_COLUMNS} FROM vehicles
          WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2)
          ORDER BY plate"
    ))
    .bind(ctx.tenant_id)
    .bind(filter.status.map(VehicleStatus::as_str))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_vehicle(pool: &PgPool, ctx: &TenantCtx, vehicle_id: Uuid) -> Result<Vehicle, VehicleError> {
    ctx.require(TenantPermission::View)?;
    sqlx::query_as::<_, Vehicle>(&format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE tenant_id = $1 AND id = $2"))
        .bind(ctx.tenant_id)
        .bind(vehicle_id)
        .fetch_optional(pool)
        .await?
        .ok_or(VehicleError::NotFound)
}

/// Vehicles that could take a booking over `[from, to]`.
pub async fn availability(pool: &PgPool, ctx: &TenantCtx, from: NaiveDate, to: NaiveDate) -> Result<Vec<Vehicle>, VehicleError> {
    ctx.require(TenantPermission::View)?;
    if to < from {
        return Err(VehicleError::InvalidInput("`to` must not be before `from`".into()));
    }
    let rows = sqlx::query_as::<_, Vehicle>(&format!(
        r"SELECT {VEHICLE_COLUMNS} FROM vehicles v
          WHERE v.tenant_id = $1
            AND v.status IN ('available', 'rented')
            AND NOT EXISTS (
                SELECT 1 FROM contracts c
                WHERE c.vehicle_id = v.id
                  AND c.status IN ('draft', 'active')
                  AND daterange(c.start_date, c.end_date, '[]') && daterange($2, $3, '[]'))
          ORDER BY v.plate"
    ))
    .bind(ctx.tenant_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn create_vehicle(pool: &PgPool, ctx: &TenantCtx, input: VehicleInput) -> Result<Vehicle, VehicleError> {
    ctx.require(TenantPermission::ManageFleet)?;
    let plate = normalize_plate(&input.plate);
    validate_fields(&plate, &input.make, &input.model, input.year, input.daily_rate, input.odometer_km, Utc::now().date_naive())?;

    let mut tx = pool.begin().await?;
    let vehicle = sqlx::query_as::<_, Vehicle>(&format!(
        r"INSERT INTO vehicles (tenant_id, plate, make, model, year, vin, color, daily_rate, odometer_km)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
          RETURNING {VEHICLE_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(&plate)
    .bind(input.make.trim())
    .bind(input.model.trim())
    .bind(input.year)
    .bind(optional_text(input.vin.as_deref()).map(|v| v.to_ascii_uppercase()))
    .bind(optional_text(input.color.as_deref()))
    .bind(input.daily_rate)
    .bind(input.odometer_km)
    .fetch_one(tx.as_mut())
    .await
    .map_err(|e| map_write_error(e, &plate))?;

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new(
            "vehicle",
            vehicle.id,
            AuditAction::Create,
            serde_json::json!({ "plate": vehicle.plate, "daily_rate": vehicle.daily_rate, "status": vehicle.status }),
        ),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, vehicle_id = %vehicle.id, plate = %vehicle.plate, "vehicle created");
    Ok(vehicle)
}

pub async fn update_vehicle(pool: &PgPool, ctx: &TenantCtx, vehicle_id: Uuid, patch: VehiclePatch) -> Result<Vehicle, VehicleError> {
    ctx.require(TenantPermission::ManageFleet)?;

    let mut tx = pool.begin().await?;
    let current = sqlx::query_as::<_, Vehicle>(&format!(
        "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(ctx.tenant_id)
    .bind(vehicle_id)
    .fetch_optional(tx.as_mut())
    .await?
    .ok_or(VehicleError::NotFound)?;
    if current.version != patch.version {
        return Err(VehicleError::VersionConflict { current: current.version });
    }

    let plate = patch.plate.as_deref().map_or_else(|| current.plate.clone(), normalize_plate);
    let make = patch.make.as_deref().map_or(current.make.as_str(), str::trim).to_owned();
    let model = patch.model.as_deref().map_or(current.model.as_str(), str::trim).to_owned();
    let year = patch.year.unwrap_or(current.year);
    let daily_rate = patch.daily_rate.unwrap_or(current.daily_rate);
    let odometer_km = patch.odometer_km.unwrap_or(current.odometer_km);
    let status = patch.status.unwrap_or(current.status);
    validate_fields(&plate, &make, &model, year, daily_rate, odometer_km, Utc::now().date_naive())?;
    check_manual_transition(current.status, status)?;
    if odometer_km < current.odometer_km {
        return Err(VehicleError::InvalidInput("odometer cannot go backwards".into()));
    }
    let vin = match patch.vin.as_deref() {
        Some(v) => optional_text(Some(v)).map(|v| v.to_ascii_uppercase()),
        None => current.vin.clone(),
    };
    let color = match patch.color.as_deref() {
        Some(c) => optional_text(Some(c)),
        None => current.color.clone(),
    };

    let vehicle = sqlx::query_as::<_, Vehicle>(&format!(
        r"UPDATE vehicles
          SET plate = $3, make = $4, model = $5, year = $6, vin = $7, color = $8,
              daily_rate = $9, odometer_km = $10, status = $11,
              version = version + 1, updated_at = now()
          WHERE tenant_id = $1 AND id = $2
          RETURNING {VEHICLE_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(vehicle_id)
    .bind(&plate)
    .bind(&make)
    .bind(&model)
    .bind(year)
    .bind(vin)
    .bind(color)
    .bind(daily_rate)
    .bind(odometer_km)
    .bind(status.as_str())
    .fetch_one(tx.as_mut())
    .await
    .map_err(|e| map_write_error(e, &plate))?;

    let action = if status == current.status { AuditAction::Update } else { AuditAction::Transition };
    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new(
            "vehicle",
            vehicle_id,
            action,
            serde_json::json!({
                "version": vehicle.version,
                "plate": vehicle.plate,
                "daily_rate": vehicle.daily_rate,
                "odometer_km": vehicle.odometer_km,
                "status": vehicle.status,
            }),
        ),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %vehicle_id, status = %vehicle.status, version = vehicle.version, "vehicle updated");
    Ok(vehicle)
}

pub async fn delete_vehicle(pool: &PgPool, ctx: &TenantCtx, vehicle_id: Uuid) -> Result<(), VehicleError> {
    ctx.require(TenantPermission::ManageFleet)?;
    let mut tx = pool.begin().await?;
    let referenced: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM contracts WHERE tenant_id = $1 AND vehicle_id = $2)")
        .bind(ctx.tenant_id)
        .bind(vehicle_id)
        .fetch_one(tx.as_mut())
        .await?;
    if referenced {
        return Err(VehicleError::InUse);
    }

    let deleted = sqlx::query("DELETE FROM vehicles WHERE tenant_id = $1 AND id = $2")
        .bind(ctx.tenant_id)
        .bind(vehicle_id)
        .execute(tx.as_mut())
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(VehicleError::NotFound);
    }

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new("vehicle", vehicle_id, AuditAction::Delete, serde_json::json!({})),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %vehicle_id, "vehicle deleted");
    Ok(())
}

#[cfg(test)]
#[path = "vehicle_test.rs"]
mod tests;
