//! Chart of accounts, journal entries and financial reports.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::auth::TenantUser;
use crate::routes::optional_json;
use crate::services::ledger::{
    self, Account, AccountLedger, AccountPatch, EntryFilter, EntryHeader, EntryInput, IncomeStatement, JournalEntry,
    NewAccount, TrialBalance,
};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AsOfQuery {
    pub as_of: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct RangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReverseBody {
    pub entry_date: Option<NaiveDate>,
}

// =============================================================================
// ACCOUNTS
// =============================================================================

/// `GET /api/ledger/accounts`
pub async fn list_accounts(State(state): State<AppState>, auth: TenantUser) -> Result<Json<Vec<Account>>, ApiError> {
    Ok(Json(ledger::list_accounts(&state.pool, &auth.ctx).await?))
}

/// `POST /api/ledger/accounts`
pub async fn create_account(
    State(state): State<AppState>,
    auth: TenantUser,
    Json(body): Json<NewAccount>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let account = ledger::create_account(&state.pool, &auth.ctx, body).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// `PATCH /api/ledger/accounts/{id}`
pub async fn update_account(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
    Json(body): Json<AccountPatch>,
) -> Result<Json<Account>, ApiError> {
    Ok(Json(ledger::update_account(&state.pool, &auth.ctx, id, body).await?))
}

/// `DELETE /api/ledger/accounts/{id}`
pub async fn delete_account(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ledger::delete_account(&state.pool, &auth.ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/ledger/accounts/{id}/ledger?from=&to=`
pub async fn account_ledger(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<AccountLedger>, ApiError> {
    Ok(Json(ledger::account_ledger(&state.pool, &auth.ctx, id, range.from, range.to).await?))
}

// =============================================================================
// ENTRIES
// =============================================================================

/// `GET /api/ledger/entries?status=&source=&from=&to=`
pub async fn list_entries(
    State(state): State<AppState>,
    auth: TenantUser,
    Query(filter): Query<EntryFilter>,
) -> Result<Json<Vec<EntryHeader>>, ApiError> {
    Ok(Json(ledger::list_entries(&state.pool, &auth.ctx, &filter).await?))
}

/// `POST /api/ledger/entries`: draft, or posted when `post` is set.
pub async fn create_entry(
    State(state): State<AppState>,
    auth: TenantUser,
    Json(body): Json<EntryInput>,
) -> Result<(StatusCode, Json<JournalEntry>), ApiError> {
    let entry = ledger::create_entry(&state.pool, &auth.ctx, body).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// `GET /api/ledger/entries/{id}`
pub async fn get_entry(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<Json<JournalEntry>, ApiError> {
    Ok(Json(ledger::get_entry(&state.pool, &auth.ctx, id).await?))
}

/// `PUT /api/ledger/entries/{id}`: replaces a draft's header and lines.
pub async fn update_entry(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
    Json(body): Json<EntryInput>,
) -> Result<Json<JournalEntry>, ApiError> {
    Ok(Json(ledger::update_draft(&state.pool, &auth.ctx, id, body).await?))
}

/// `DELETE /api/ledger/entries/{id}`
pub async fn delete_entry(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ledger::delete_draft(&state.pool, &auth.ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/ledger/entries/{id}/post`
pub async fn post_entry(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
) -> Result<Json<JournalEntry>, ApiError> {
    Ok(Json(ledger::post_entry(&state.pool, &auth.ctx, id).await?))
}

/// `POST /api/ledger/entries/{id}/reverse`: returns the mirror entry.
pub async fn reverse_entry(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<(StatusCode, Json<JournalEntry>), ApiError> {
    let body: ReverseBody = optional_json(&body)?;
    let mirror = ledger::reverse_entry(&state.pool, &auth.ctx, id, body.entry_date).await?;
    Ok((StatusCode::CREATED, Json(mirror)))
}

// =============================================================================
// REPORTS
// =============================================================================

/// `GET /api/ledger/reports/trial-balance?as_of=`: defaults to today.
pub async fn trial_balance(
    State(state): State<AppState>,
    auth: TenantUser,
    Query(q): Query<AsOfQuery>,
) -> Result<Json<TrialBalance>, ApiError> {
    let as_of = q.as_of.unwrap_or_else(|| Utc::now().date_naive());
    Ok(Json(ledger::trial_balance(&state.pool, &auth.ctx, as_of).await?))
}

/// `GET /api/ledger/reports/income-statement?from=&to=`
pub async fn income_statement(
    State(state): State<AppState>,
    auth: TenantUser,
    Query(range): Query<RangeQuery>,
) -> Result<Json<IncomeStatement>, ApiError> {
    Ok(Json(ledger::income_statement(&state.pool, &auth.ctx, range.from, range.to).await?))
}
