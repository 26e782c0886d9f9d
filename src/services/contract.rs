//! Rental contracts: pricing, lifecycle, and the postings they trigger.
//!
//! DESIGN
//! ======
//! ```text
//!   draft ──activate──▶ active ──complete──▶ completed
//!     │                   │
//!     └──────cancel───────┴──────cancel──────▶ cancelled
//! ```
//!
//! Every transition runs in one transaction that locks the contract row,
//! then the vehicle row. Completion also posts the invoice entry through
//! [`ledger::post_contract_invoice`], so a contract is never completed
//! without its receivable.
//!
//! Double booking is refused twice: an explicit overlap query gives a
//! readable error, and the `EXCLUDE USING gist` constraint catches the race
//! between two concurrent creates.

use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::db::text_enum;
use crate::error::ErrorCode;
use crate::services::audit::{self, AuditAction, AuditEvent};
use crate::services::customer::CustomerStatus;
use crate::services::ledger::{self, ContractRef, ENTRY_COLUMNS, EntryHeader, InvoiceAmounts, LedgerError, PaymentMethod};
use crate::services::numbering::{self, CONTRACT_SEQUENCE};
use crate::services::tenant::{TenantCtx, TenantError, TenantPermission};
use crate::services::vehicle::{VEHICLE_COLUMNS, Vehicle, VehicleStatus};

const BP_SCALE: i128 = 10_000;
const MAX_TAX_RATE_BP: i32 = 10_000;

text_enum! {
    pub enum ContractStatus {
        Draft => "draft",
        Active => "active",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

text_enum! {
    pub enum ContractAction {
        Activate => "activate",
        Complete => "complete",
        Cancel => "cancel",
    }
}

/// The lifecycle table.
pub fn next_status(from: ContractStatus, action: ContractAction) -> Result<ContractStatus, ContractError> {
    use ContractAction as A;
    use ContractStatus as S;
    match (from, action) {
        (S::Draft, A::Activate) => Ok(S::Active),
        (S::Active, A::Complete) => Ok(S::Completed),
        (S::Draft | S::Active, A::Cancel) => Ok(S::Cancelled),
        _ => Err(ContractError::InvalidTransition { from, action }),
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error(transparent)]
    Tenant(#[from] TenantError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("customer is blocked")]
    CustomerBlocked,
    #[error("driver license expires on {expiry}, before the rental ends")]
    LicenseExpired { expiry: NaiveDate },
    #[error("vehicle unavailable: {0}")]
    VehicleUnavailable(String),
    #[error("cannot {action} a {from} contract")]
    InvalidTransition { from: ContractStatus, action: ContractAction },
    #[error("contract was modified (current version {current})")]
    VersionConflict { current: i32 },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for ContractError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Tenant(e) => e.error_code(),
            Self::Ledger(e) => e.error_code(),
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::CustomerBlocked => "E_CUSTOMER_BLOCKED",
            Self::LicenseExpired { .. } => "E_LICENSE_EXPIRED",
            Self::VehicleUnavailable(_) => "E_VEHICLE_UNAVAILABLE",
            Self::InvalidTransition { .. } => "E_INVALID_TRANSITION",
            Self::VersionConflict { .. } => "E_VERSION_CONFLICT",
            Self::Database(_) => crate::error::E_DATABASE,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Tenant(e) => e.status(),
            Self::Ledger(e) => e.status(),
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::CustomerBlocked | Self::LicenseExpired { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::VehicleUnavailable(_) | Self::InvalidTransition { .. } | Self::VersionConflict { .. } => {
                StatusCode::CONFLICT
            }
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

crate::error::impl_api_error!(ContractError);

// =============================================================================
// PRICING
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct PricingInput {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub daily_rate: i64,
    pub discount: i64,
    pub tax_rate_bp: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pricing {
    pub rental_days: i32,
    pub base_amount: i64,
    pub discount: i64,
    pub net_amount: i64,
    pub tax_amount: i64,
    pub total_amount: i64,
}

/// `numerator / denominator` rounded half away from zero, for non-negative inputs.
#[must_use]
pub fn round_half_up_div(numerator: i128, denominator: i128) -> i128 {
    (numerator + denominator / 2) / denominator
}

/// Inclusive day count, base, discount, tax, and total.
///
/// # Errors
///
/// `InvalidInput` when dates are reversed, amounts are out of range, or the
/// result does not fit.
pub fn price(input: &PricingInput) -> Result<Pricing, ContractError> {
    if input.end_date < input.start_date {
        return Err(ContractError::InvalidInput("end_date must not be before start_date".into()));
    }
    if input.daily_rate <= 0 {
        return Err(ContractError::InvalidInput("daily_rate must be positive".into()));
    }
    if !(0..=MAX_TAX_RATE_BP).contains(&input.tax_rate_bp) {
        return Err(ContractError::InvalidInput(format!("tax_rate_bp must be 0..={MAX_TAX_RATE_BP}")));
    }

    let days = (input.end_date - input.start_date).num_days() + 1;
    let rental_days = i32::try_from(days).map_err(|_| ContractError::InvalidInput("rental too long".into()))?;
    let base_amount = input
        .daily_rate
        .checked_mul(days)
        .ok_or_else(|| ContractError::InvalidInput("amount overflow".into()))?;
    if input.discount < 0 || input.discount > base_amount {
        return Err(ContractError::InvalidInput("discount must be between 0 and the base amount".into()));
    }
    let net_amount = base_amount - input.discount;
    let tax = round_half_up_div(i128::from(net_amount) * i128::from(input.tax_rate_bp), BP_SCALE);
    let tax_amount = i64::try_from(tax).map_err(|_| ContractError::InvalidInput("amount overflow".into()))?;
    let total_amount = net_amount
        .checked_add(tax_amount)
        .ok_or_else(|| ContractError::InvalidInput("amount overflow".into()))?;

    Ok(Pricing { rental_days, base_amount, discount: input.discount, net_amount, tax_amount, total_amount })
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Contract {
    pub id: Uuid,
    pub number: String,
    pub customer_id: Uuid,
    pub vehicle_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub daily_rate: i64,
    pub rental_days: i32,
    pub base_amount: i64,
    pub discount: i64,
    pub tax_rate_bp: i32,
    pub tax_amount: i64,
    pub extra_charges: i64,
    pub total_amount: i64,
    pub deposit: i64,
    pub odometer_out: Option<i64>,
    pub odometer_in: Option<i64>,
    pub returned_on: Option<NaiveDate>,
    #[sqlx(try_from = "String")]
    pub status: ContractStatus,
    pub invoice_entry_id: Option<Uuid>,
    pub notes: Option<String>,
    pub version: i32,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    /// Rental net of discount, before tax and extras.
    #[must_use]
    pub fn net_rental(&self) -> i64 {
        self.base_amount - self.discount
    }

    fn ledger_ref(&self) -> ContractRef<'_> {
        ContractRef { id: self.id, number: &self.number }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractInput {
    pub customer_id: Uuid,
    pub vehicle_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Defaults to the vehicle's rate.
    #[serde(default)]
    pub daily_rate: Option<i64>,
    #[serde(default)]
    pub discount: i64,
    #[serde(default)]
    pub tax_rate_bp: i32,
    #[serde(default)]
    pub deposit: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Edits allowed while a contract is still a draft.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractPatch {
    pub version: i32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub daily_rate: Option<i64>,
    pub discount: Option<i64>,
    pub tax_rate_bp: Option<i32>,
    pub deposit: Option<i64>,
    pub notes: Option<String>,
}

/// Optional version guard on lifecycle calls.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionInput {
    #[serde(default)]
    pub version: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteInput {
    #[serde(default)]
    pub version: Option<i32>,
    #[serde(default)]
    pub return_date: Option<NaiveDate>,
    pub odometer_in: i64,
    #[serde(default)]
    pub extra_charges: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentInput {
    pub amount: i64,
    pub method: PaymentMethod,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractFilter {
    pub status: Option<ContractStatus>,
    pub customer_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentSummary {
    pub contract_id: Uuid,
    pub invoiced: i64,
    pub paid: i64,
    pub outstanding: i64,
    pub payments: Vec<EntryHeader>,
}

const CONTRACT_COLUMNS: &str = "id, number, customer_id, vehicle_id, start_date, end_date, daily_rate, rental_days, \
                                base_amount, discount, tax_rate_bp, tax_amount, extra_charges, total_amount, deposit, \
                                odometer_out, odometer_in, returned_on, status, invoice_entry_id, notes, version, \
                                created_by, created_at, updated_at";

// =============================================================================
// HELPERS
// =============================================================================

fn check_version(expected: Option<i32>, current: i32) -> Result<(), ContractError> {
    match expected {
        Some(v) if v != current => Err(ContractError::VersionConflict { current }),
        _ => Ok(()),
    }
}

/// Customer must be active and licensed through `end_date`.
pub fn check_customer(status: CustomerStatus, license_expiry: Option<NaiveDate>, end_date: NaiveDate) -> Result<(), ContractError> {
    if status == CustomerStatus::Blocked {
        return Err(ContractError::CustomerBlocked);
    }
    match license_expiry {
        Some(expiry) if expiry < end_date => Err(ContractError::LicenseExpired { expiry }),
        _ => Ok(()),
    }
}

fn map_booking_error(e: sqlx::Error) -> ContractError {
    if crate::db::is_exclusion_violation(&e) {
        ContractError::VehicleUnavailable("vehicle is already booked for these dates".into())
    } else {
        ContractError::Database(e)
    }
}

async fn lock_contract(conn: &mut PgConnection, tenant_id: Uuid, contract_id: Uuid) -> Result<Contract, ContractError> {
    sqlx::query_as::<_, Contract>(&format!(
        "SELECT {CONTRACT_COLUMNS} FROM contracts WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(tenant_id)
    .bind(contract_id)
    .fetch_optional(conn)
    .await?
    .ok_or(ContractError::NotFound("contract"))
}

async fn lock_vehicle(conn: &mut PgConnection, tenant_id: Uuid, vehicle_id: Uuid) -> Result<Vehicle, ContractError> {
    sqlx::query_as::<_, Vehicle>(&format!(
        "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(tenant_id)
    .bind(vehicle_id)
    .fetch_optional(conn)
    .await?
    .ok_or(ContractError::NotFound("vehicle"))
}

async fn check_customer_row(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    customer_id: Uuid,
    end_date: NaiveDate,
) -> Result<(), ContractError> {
    let row: Option<(String, Option<NaiveDate>)> = sqlx::query_as(
        "SELECT status, license_expiry FROM customers WHERE tenant_id = $1 AND id = $2 FOR SHARE",
    )
    .bind(tenant_id)
    .bind(customer_id)
    .fetch_optional(conn)
    .await?;
    let (status, expiry) = row.ok_or(ContractError::NotFound("customer"))?;
    let status = CustomerStatus::parse(&status).unwrap_or(CustomerStatus::Blocked);
    check_customer(status, expiry, end_date)
}

async fn check_vehicle_free(
    conn: &mut PgConnection,
    vehicle: &Vehicle,
    start_date: NaiveDate,
    end_date: NaiveDate,
    ignore_contract: Option<Uuid>,
) -> Result<(), ContractError> {
    if matches!(vehicle.status, VehicleStatus::Maintenance | VehicleStatus::Retired) {
        return Err(ContractError::VehicleUnavailable(format!("vehicle is {}", vehicle.status)));
    }
    let clash: Option<String> = sqlx::query_scalar(
        r"SELECT number FROM contracts
          WHERE vehicle_id = $1
            AND status IN ('draft', 'active')
            AND ($4::uuid IS NULL OR id <> $4)
            AND daterange(start_date, end_date, '[]') && daterange($2, $3, '[]')
          LIMIT 1",
    )
    .bind(vehicle.id)
    .bind(start_date)
    .bind(end_date)
    .bind(ignore_contract)
    .fetch_optional(conn)
    .await?;
    match clash {
        Some(number) => Err(ContractError::VehicleUnavailable(format!("overlaps contract {number}"))),
        None => Ok(()),
    }
}

async fn set_vehicle_state(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    vehicle_id: Uuid,
    status: VehicleStatus,
    odometer_km: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"UPDATE vehicles
          SET status = $3, odometer_km = COALESCE($4, odometer_km), version = version + 1, updated_at = now()
          WHERE tenant_id = $1 AND id = $2",
    )
    .bind(tenant_id)
    .bind(vehicle_id)
    .bind(status.as_str())
    .bind(odometer_km)
    .execute(conn)
    .await?;
    Ok(())
}

async fn audit_transition(
    conn: &mut PgConnection,
    ctx: &TenantCtx,
    contract: &Contract,
    from: ContractStatus,
    action: ContractAction,
) -> Result<(), sqlx::Error> {
    audit::append(
        conn,
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new(
            "contract",
            contract.id,
            AuditAction::Transition,
            serde_json::json!({
                "action": action,
                "from": from,
                "to": contract.status,
                "version": contract.version,
                "total_amount": contract.total_amount,
            }),
        ),
    )
    .await?;
    Ok(())
}

// =============================================================================
// READ
// =============================================================================

pub async fn list_contracts(pool: &PgPool, ctx: &TenantCtx, filter: &ContractFilter) -> Result<Vec<Contract>, ContractError> {
    ctx.require(TenantPermission::View)?;
    let rows = sqlx::query_as::<_, Contract>(&format!(
        r"SELECT {CONTRACT_COLUMNS} FROM contracts
          WHERE tenant_id = $1
            AND ($2::text IS NULL OR status = $2)
            AND ($3::uuid IS NULL OR customer_id = $3)
            AND ($4::uuid IS NULL OR vehicle_id = $4)
          ORDER BY start_date DESC, number DESC
          LIMIT $5 OFFSET $6"
    ))
    .bind(ctx.tenant_id)
    .bind(filter.status.map(ContractStatus::as_str))
    .bind(filter.customer_id)
    .bind(filter.vehicle_id)
    .bind(filter.limit.unwrap_or(100).clamp(1, 500))
    .bind(filter.offset.unwrap_or(0).max(0))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_contract(pool: &PgPool, ctx: &TenantCtx, contract_id: Uuid) -> Result<Contract, ContractError> {
    ctx.require(TenantPermission::View)?;
    sqlx::query_as::<_, Contract>(&format!("SELECT {CONTRACT_COLUMNS} FROM contracts WHERE tenant_id = $1 AND id = $2"))
        .bind(ctx.tenant_id)
        .bind(contract_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ContractError::NotFound("contract"))
}

/// Active contracts whose end date is before `today`, oldest first.
pub async fn find_overdue(pool: &PgPool, tenant_id: Uuid, today: NaiveDate) -> Result<Vec<Contract>, sqlx::Error> {
    sqlx::query_as::<_, Contract>(&format!(
        r"SELECT {CONTRACT_COLUMNS} FROM contracts
          WHERE tenant_id = $1 AND status = 'active' AND end_date < $2
          ORDER BY end_date"
    ))
    .bind(tenant_id)
    .bind(today)
    .fetch_all(pool)
    .await
}

pub async fn list_overdue(pool: &PgPool, ctx: &TenantCtx) -> Result<Vec<Contract>, ContractError> {
    ctx.require(TenantPermission::View)?;
    Ok(find_overdue(pool, ctx.tenant_id, Utc::now().date_naive()).await?)
}

// =============================================================================
// WRITE
// =============================================================================

pub async fn create_contract(pool: &PgPool, ctx: &TenantCtx, input: ContractInput) -> Result<Contract, ContractError> {
    ctx.require(TenantPermission::ManageFleet)?;
    if input.end_date < input.start_date {
        return Err(ContractError::InvalidInput("end_date must not be before start_date".into()));
    }
    if input.deposit < 0 {
        return Err(ContractError::InvalidInput("deposit must be non-negative".into()));
    }

    let mut tx = pool.begin().await?;
    check_customer_row(tx.as_mut(), ctx.tenant_id, input.customer_id, input.end_date).await?;
    let vehicle = lock_vehicle(tx.as_mut(), ctx.tenant_id, input.vehicle_id).await?;
    check_vehicle_free(tx.as_mut(), &vehicle, input.start_date, input.end_date, None).await?;

    let daily_rate = input.daily_rate.unwrap_or(vehicle.daily_rate);
    let pricing = price(&PricingInput {
        start_date: input.start_date,
        end_date: input.end_date,
        daily_rate,
        discount: input.discount,
        tax_rate_bp: input.tax_rate_bp,
    })?;

    let seq = numbering::next_value(tx.as_mut(), ctx.tenant_id, CONTRACT_SEQUENCE).await?;
    let number = numbering::format_number("RC", seq);
    let contract = sqlx::query_as::<_, Contract>(&format!(
        r"INSERT INTO contracts
              (tenant_id, number, customer_id, vehicle_id, start_date, end_date, daily_rate, rental_days,
               base_amount, discount, tax_rate_bp, tax_amount, total_amount, deposit, notes, created_by)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
          RETURNING {CONTRACT_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(&number)
    .bind(input.customer_id)
    .bind(input.vehicle_id)
    .bind(input.start_date)
    .bind(input.end_date)
    .bind(daily_rate)
    .bind(pricing.rental_days)
    .bind(pricing.base_amount)
    .bind(pricing.discount)
    .bind(input.tax_rate_bp)
    .bind(pricing.tax_amount)
    .bind(pricing.total_amount)
    .bind(input.deposit)
    .bind(input.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()))
    .bind(ctx.user_id)
    .fetch_one(tx.as_mut())
    .await
    .map_err(map_booking_error)?;

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new(
            "contract",
            contract.id,
            AuditAction::Create,
            serde_json::json!({
                "number": contract.number,
                "customer_id": contract.customer_id,
                "vehicle_id": contract.vehicle_id,
                "start_date": contract.start_date,
                "end_date": contract.end_date,
                "pricing": pricing,
            }),
        ),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, contract_id = %contract.id, number = %contract.number, total = contract.total_amount, "contract created");
    Ok(contract)
}

/// Re-price a draft after edits to its dates or terms.
pub async fn update_draft(pool: &PgPool, ctx: &TenantCtx, contract_id: Uuid, patch: ContractPatch) -> Result<Contract, ContractError> {
    ctx.require(TenantPermission::ManageFleet)?;

    let mut tx = pool.begin().await?;
    let current = lock_contract(tx.as_mut(), ctx.tenant_id, contract_id).await?;
    check_version(Some(patch.version), current.version)?;
    if current.status != ContractStatus::Draft {
        return Err(ContractError::InvalidInput(format!("only draft contracts can be edited; {} is {}", current.number, current.status)));
    }

    let start_date = patch.start_date.unwrap_or(current.start_date);
    let end_date = patch.end_date.unwrap_or(current.end_date);
    let deposit = patch.deposit.unwrap_or(current.deposit);
    if deposit < 0 {
        return Err(ContractError::InvalidInput("deposit must be non-negative".into()));
    }
    let pricing_input = PricingInput {
        start_date,
        end_date,
        daily_rate: patch.daily_rate.unwrap_or(current.daily_rate),
        discount: patch.discount.unwrap_or(current.discount),
        tax_rate_bp: patch.tax_rate_bp.unwrap_or(current.tax_rate_bp),
    };
    let pricing = price(&pricing_input)?;

    if start_date != current.start_date || end_date != current.end_date {
        check_customer_row(tx.as_mut(), ctx.tenant_id, current.customer_id, end_date).await?;
        let vehicle = lock_vehicle(tx.as_mut(), ctx.tenant_id, current.vehicle_id).await?;
        check_vehicle_free(tx.as_mut(), &vehicle, start_date, end_date, Some(contract_id)).await?;
    }

    let notes = match patch.notes.as_deref() {
        Some(n) => Some(n.trim()).filter(|n| !n.is_empty()).map(str::to_owned),
        None => current.notes.clone(),
    };
    let contract = sqlx::query_as::<_, Contract>(&format!(
        r"UPDATE contracts
          SET start_date = $3, end_date = $4, daily_rate = $5, rental_days = $6, base_amount = $7,
              discount = $8, tax_rate_bp = $9, tax_amount = $10, total_amount = $11, deposit = $12,
              notes = $13, version = version + 1, updated_at = now()
          WHERE tenant_id = $1 AND id = $2
          RETURNING {CONTRACT_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(contract_id)
    .bind(start_date)
    .bind(end_date)
    .bind(pricing_input.daily_rate)
    .bind(pricing.rental_days)
    .bind(pricing.base_amount)
    .bind(pricing.discount)
    .bind(pricing_input.tax_rate_bp)
    .bind(pricing.tax_amount)
    .bind(pricing.total_amount)
    .bind(deposit)
    .bind(notes)
    .fetch_one(tx.as_mut())
    .await
    .map_err(map_booking_error)?;

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new(
            "contract",
            contract_id,
            AuditAction::Update,
            serde_json::json!({
                "version": contract.version,
                "start_date": contract.start_date,
                "end_date": contract.end_date,
                "pricing": pricing,
                "deposit": contract.deposit,
            }),
        ),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %contract_id, version = contract.version, "contract draft updated");
    Ok(contract)
}

/// Hand the vehicle over: record `odometer_out` and mark it rented.
pub async fn activate(pool: &PgPool, ctx: &TenantCtx, contract_id: Uuid, input: TransitionInput) -> Result<Contract, ContractError> {
    ctx.require(TenantPermission::ManageFleet)?;
    let mut tx = pool.begin().await?;
    let current = lock_contract(tx.as_mut(), ctx.tenant_id, contract_id).await?;
    check_version(input.version, current.version)?;
    let to = next_status(current.status, ContractAction::Activate)?;

    check_customer_row(tx.as_mut(), ctx.tenant_id, current.customer_id, current.end_date).await?;
    let vehicle = lock_vehicle(tx.as_mut(), ctx.tenant_id, current.vehicle_id).await?;
    if vehicle.status != VehicleStatus::Available {
        return Err(ContractError::VehicleUnavailable(format!("vehicle is {}", vehicle.status)));
    }
    set_vehicle_state(tx.as_mut(), ctx.tenant_id, vehicle.id, VehicleStatus::Rented, None).await?;

    let contract = sqlx::query_as::<_, Contract>(&format!(
        r"UPDATE contracts
          SET status = $3, odometer_out = $4, version = version + 1, updated_at = now()
          WHERE tenant_id = $1 AND id = $2
          RETURNING {CONTRACT_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(contract_id)
    .bind(to.as_str())
    .bind(vehicle.odometer_km)
    .fetch_one(tx.as_mut())
    .await?;
    audit_transition(tx.as_mut(), ctx, &contract, current.status, ContractAction::Activate).await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %contract_id, vehicle_id = %vehicle.id, "contract activated");
    Ok(contract)
}

/// Return the vehicle, bill extras, and post the invoice.
pub async fn complete(pool: &PgPool, ctx: &TenantCtx, contract_id: Uuid, input: CompleteInput) -> Result<Contract, ContractError> {
    ctx.require(TenantPermission::ManageFleet)?;
    if input.extra_charges < 0 {
        return Err(ContractError::InvalidInput("extra_charges must be non-negative".into()));
    }

    let mut tx = pool.begin().await?;
    let current = lock_contract(tx.as_mut(), ctx.tenant_id, contract_id).await?;
    check_version(input.version, current.version)?;
    let to = next_status(current.status, ContractAction::Complete)?;

    let odometer_out = current.odometer_out.unwrap_or_default();
    if input.odometer_in < odometer_out {
        return Err(ContractError::InvalidInput(format!("odometer_in {} is below odometer_out {odometer_out}", input.odometer_in)));
    }
    let returned_on = input.return_date.unwrap_or_else(|| Utc::now().date_naive());
    if returned_on < current.start_date {
        return Err(ContractError::InvalidInput("return_date is before the rental started".into()));
    }
    let total_amount = current
        .total_amount
        .checked_add(input.extra_charges)
        .ok_or_else(|| ContractError::InvalidInput("amount overflow".into()))?;

    let vehicle = lock_vehicle(tx.as_mut(), ctx.tenant_id, current.vehicle_id).await?;
    let odometer = input.odometer_in.max(vehicle.odometer_km);
    set_vehicle_state(tx.as_mut(), ctx.tenant_id, vehicle.id, VehicleStatus::Available, Some(odometer)).await?;

    let amounts = InvoiceAmounts { net_rental: current.net_rental(), extra_charges: input.extra_charges, tax: current.tax_amount };
    let invoice = ledger::post_contract_invoice(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        current.ledger_ref(),
        returned_on,
        &amounts,
    )
    .await?;

    let contract = sqlx::query_as::<_, Contract>(&format!(
        r"UPDATE contracts
          SET status = $3, odometer_in = $4, returned_on = $5, extra_charges = $6, total_amount = $7,
              invoice_entry_id = $8, version = version + 1, updated_at = now()
          WHERE tenant_id = $1 AND id = $2
          RETURNING {CONTRACT_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(contract_id)
    .bind(to.as_str())
    .bind(input.odometer_in)
    .bind(returned_on)
    .bind(input.extra_charges)
    .bind(total_amount)
    .bind(invoice.id)
    .fetch_one(tx.as_mut())
    .await?;
    audit_transition(tx.as_mut(), ctx, &contract, current.status, ContractAction::Complete).await?;
    tx.commit().await?;

    tracing::info!(
        tenant_id = %ctx.tenant_id,
        %contract_id,
        invoice_entry_id = %invoice.id,
        total = contract.total_amount,
        "contract completed"
    );
    Ok(contract)
}

/// Cancel a draft or active contract, freeing the vehicle if it was out.
pub async fn cancel(pool: &PgPool, ctx: &TenantCtx, contract_id: Uuid, input: TransitionInput) -> Result<Contract, ContractError> {
    ctx.require(TenantPermission::ManageFleet)?;
    let mut tx = pool.begin().await?;
    let current = lock_contract(tx.as_mut(), ctx.tenant_id, contract_id).await?;
    check_version(input.version, current.version)?;
    let to = next_status(current.status, ContractAction::Cancel)?;

    if current.status == ContractStatus::Active {
        let vehicle = lock_vehicle(tx.as_mut(), ctx.tenant_id, current.vehicle_id).await?;
        if vehicle.status == VehicleStatus::Rented {
            set_vehicle_state(tx.as_mut(), ctx.tenant_id, vehicle.id, VehicleStatus::Available, None).await?;
        }
    }

    let contract = sqlx::query_as::<_, Contract>(&format!(
        r"UPDATE contracts SET status = $3, version = version + 1, updated_at = now()
          WHERE tenant_id = $1 AND id = $2
          RETURNING {CONTRACT_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(contract_id)
    .bind(to.as_str())
    .fetch_one(tx.as_mut())
    .await?;
    audit_transition(tx.as_mut(), ctx, &contract, current.status, ContractAction::Cancel).await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %contract_id, from = %current.status, "contract cancelled");
    Ok(contract)
}

// =============================================================================
// PAYMENTS
// =============================================================================

/// Post a customer payment against an active or completed contract.
pub async fn record_payment(pool: &PgPool, ctx: &TenantCtx, contract_id: Uuid, input: PaymentInput) -> Result<EntryHeader, ContractError> {
    ctx.require(TenantPermission::ManageFleet)?;
    if input.amount <= 0 {
        return Err(ContractError::InvalidInput("amount must be positive".into()));
    }

    let mut tx = pool.begin().await?;
    let contract = lock_contract(tx.as_mut(), ctx.tenant_id, contract_id).await?;
    if !matches!(contract.status, ContractStatus::Active | ContractStatus::Completed) {
        return Err(ContractError::InvalidInput(format!("payments need an active or completed contract; {} is {}", contract.number, contract.status)));
    }
    let entry = ledger::post_contract_payment(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        contract.ledger_ref(),
        input.date.unwrap_or_else(|| Utc::now().date_naive()),
        input.method,
        input.amount,
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %contract_id, entry_id = %entry.id, amount = input.amount, method = %input.method, "payment recorded");
    Ok(entry)
}

/// Payments posted for a contract and what is still owed. Reversed
/// payments do not count.
pub async fn payment_summary(pool: &PgPool, ctx: &TenantCtx, contract_id: Uuid) -> Result<PaymentSummary, ContractError> {
    let contract = get_contract(pool, ctx, contract_id).await?;
    let payments = sqlx::query_as::<_, EntryHeader>(&format!(
        r"SELECT {ENTRY_COLUMNS} FROM journal_entries
          WHERE tenant_id = $1 AND source = 'contract_payment' AND source_id = $2
          ORDER BY entry_date, number"
    ))
    .bind(ctx.tenant_id)
    .bind(contract_id)
    .fetch_all(pool)
    .await?;

    let paid = payments.iter().filter(|p| p.status == ledger::EntryStatus::Posted).map(|p| p.total).sum();
    let invoiced = if contract.status == ContractStatus::Completed { contract.total_amount } else { 0 };
    Ok(PaymentSummary { contract_id, invoiced, paid, outstanding: invoiced - paid, payments })
}

#[cfg(test)]
#[path = "contract_test.rs"]
mod tests;
