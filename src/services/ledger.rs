//! General ledger: chart of accounts, journal entries, and reports.
//!
//! DESIGN
//! ======
//! Double-entry bookkeeping over `journal_entries` / `journal_lines`.
//! Amounts are `i64` minor units. An entry is a draft until posted; posted
//! entries never change again and are corrected by a mirror reversal.
//!
//! Line validation is a pure function ([`validate_lines`]) so the balancing
//! rules are testable without a database; ownership checks against the
//! tenant's accounts and cost centers run afterwards in the same
//! transaction as the write.
//!
//! Reports count both `posted` and `reversed` entries: a reversed original
//! stays in the books and its reversal offsets it.
//!
//! Automated entries ([`post_contract_invoice`], [`post_contract_payment`])
//! take a `&mut PgConnection` so the contract service can post inside its
//! own transaction.

use std::collections::HashMap;

use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::db::text_enum;
use crate::error::ErrorCode;
use crate::services::audit::{self, AuditAction, AuditEvent};
use crate::services::numbering::{self, JOURNAL_SEQUENCE};
use crate::services::tenant::{TenantCtx, TenantError, TenantPermission};

text_enum! {
    pub enum AccountKind {
        Asset => "asset",
        Liability => "liability",
        Equity => "equity",
        Revenue => "revenue",
        Expense => "expense",
    }
}

impl AccountKind {
    /// Assets and expenses grow on the debit side.
    #[must_use]
    pub fn debit_normal(self) -> bool {
        matches!(self, Self::Asset | Self::Expense)
    }
}

text_enum! {
    pub enum EntrySource {
        Manual => "manual",
        ContractInvoice => "contract_invoice",
        ContractPayment => "contract_payment",
        Reversal => "reversal",
    }
}

text_enum! {
    pub enum EntryStatus {
        Draft => "draft",
        Posted => "posted",
        Reversed => "reversed",
    }
}

text_enum! {
    pub enum PaymentMethod {
        Cash => "cash",
        Card => "card",
        Transfer => "transfer",
    }
}

/// Account codes the automated postings depend on.
pub mod codes {
    pub const CASH: &str = "1000";
    pub const BANK: &str = "1100";
    pub const RECEIVABLE: &str = "1200";
    pub const TAX_PAYABLE: &str = "2100";
    pub const RENTAL_REVENUE: &str = "4000";
    pub const EXTRA_REVENUE: &str = "4100";
}

/// Seeded into every new tenant; all are system accounts.
pub const DEFAULT_CHART: &[(&str, &str, AccountKind)] = &[
    ("1000", "Cash", AccountKind::Asset),
    ("1100", "Bank", AccountKind::Asset),
    ("1200", "Accounts Receivable", AccountKind::Asset),
    ("1500", "Fleet Vehicles", AccountKind::Asset),
    ("2000", "Accounts Payable", AccountKind::Liability),
    ("2100", "Tax Payable", AccountKind::Liability),
    ("2200", "Customer Deposits", AccountKind::Liability),
    ("3000", "Owner Equity", AccountKind::Equity),
    ("4000", "Rental Revenue", AccountKind::Revenue),
    ("4100", "Additional Charges Revenue", AccountKind::Revenue),
    ("5000", "Fuel", AccountKind::Expense),
    ("5100", "Maintenance & Repairs", AccountKind::Expense),
    ("5200", "Insurance", AccountKind::Expense),
    ("5300", "Depreciation", AccountKind::Expense),
    ("5900", "General & Administrative", AccountKind::Expense),
];

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Tenant(#[from] TenantError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("entry does not balance: {0}")]
    Unbalanced(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("system account {0} cannot be deleted or deactivated")]
    SystemAccount(String),
    #[error("account code already exists: {0}")]
    DuplicateCode(String),
    #[error("{0} is still referenced")]
    InUse(&'static str),
    #[error("system account {0} is missing")]
    MissingAccount(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for LedgerError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Tenant(e) => e.error_code(),
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::Unbalanced(_) => "E_UNBALANCED",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::InvalidTransition(_) => "E_INVALID_TRANSITION",
            Self::SystemAccount(_) => "E_SYSTEM_ACCOUNT",
            Self::DuplicateCode(_) => "E_DUPLICATE",
            Self::InUse(_) => "E_IN_USE",
            Self::MissingAccount(_) => "E_MISSING_ACCOUNT",
            Self::Database(_) => crate::error::E_DATABASE,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Tenant(e) => e.status(),
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unbalanced(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::InvalidTransition(_)
            | Self::SystemAccount(_)
            | Self::DuplicateCode(_)
            | Self::InUse(_)
            | Self::MissingAccount(_) => StatusCode::CONFLICT,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

crate::error::impl_api_error!(LedgerError);

// =============================================================================
// ACCOUNTS
// =============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub kind: AccountKind,
    pub is_system: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct NewAccount {
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountPatch {
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

const ACCOUNT_COLUMNS: &str = "id, code, name, kind, is_system, is_active, created_at";

pub async fn seed_default_accounts(conn: &mut PgConnection, tenant_id: Uuid) -> Result<u64, sqlx::Error> {
    let mut inserted = 0;
    for &(code, name, kind) in DEFAULT_CHART {
        inserted += sqlx::query(
            r"INSERT INTO accounts (tenant_id, code, name, kind, is_system)
              VALUES ($1, $2, $3, $4, true)
              ON CONFLICT (tenant_id, code) DO NOTHING",
        )
        .bind(tenant_id)
        .bind(code)
        .bind(name)
        .bind(kind.as_str())
        .execute(&mut *conn)
        .await?
        .rows_affected();
    }
    Ok(inserted)
}

pub async fn list_accounts(pool: &PgPool, ctx: &TenantCtx) -> Result<Vec<Account>, LedgerError> {
    ctx.require(TenantPermission::View)?;
    let rows = sqlx::query_as::<_, Account>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE tenant_id = $1 ORDER BY code"
    ))
    .bind(ctx.tenant_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn create_account(pool: &PgPool, ctx: &TenantCtx, input: NewAccount) -> Result<Account, LedgerError> {
    ctx.require(TenantPermission::ManageAccounting)?;
    let code = input.code.trim();
    let name = input.name.trim();
    if code.is_empty() || name.is_empty() {
        return Err(LedgerError::InvalidInput("code and name are required".into()));
    }

    let mut tx = pool.begin().await?;
    let account = sqlx::query_as::<_, Account>(&format!(
        "INSERT INTO accounts (tenant_id, code, name, kind) VALUES ($1, $2, $3, $4) RETURNING {ACCOUNT_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(code)
    .bind(name)
    .bind(input.kind.as_str())
    .fetch_one(tx.as_mut())
    .await
    .map_err(|e| {
        if crate::db::is_unique_violation(&e) {
            LedgerError::DuplicateCode(code.to_owned())
        } else {
            LedgerError::Database(e)
        }
    })?;

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new(
            "account",
            account.id,
            AuditAction::Create,
            serde_json::json!({ "code": account.code, "name": account.name, "kind": account.kind }),
        ),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, account_id = %account.id, code = %account.code, "account created");
    Ok(account)
}

pub async fn update_account(
    pool: &PgPool,
    ctx: &TenantCtx,
    account_id: Uuid,
    patch: AccountPatch,
) -> Result<Account, LedgerError> {
    ctx.require(TenantPermission::ManageAccounting)?;
    let name = patch.name.as_deref().map(str::trim);
    if name.is_some_and(str::is_empty) {
        return Err(LedgerError::InvalidInput("name cannot be empty".into()));
    }

    let mut tx = pool.begin().await?;
    let current = fetch_account(tx.as_mut(), ctx.tenant_id, account_id).await?;
    if current.is_system && patch.is_active == Some(false) {
        return Err(LedgerError::SystemAccount(current.code));
    }

    let account = sqlx::query_as::<_, Account>(&format!(
        r"UPDATE accounts SET name = COALESCE($3, name), is_active = COALESCE($4, is_active)
          WHERE tenant_id = $1 AND id = $2
          RETURNING {ACCOUNT_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(account_id)
    .bind(name)
    .bind(patch.is_active)
    .fetch_one(tx.as_mut())
    .await?;

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new(
            "account",
            account_id,
            AuditAction::Update,
            serde_json::json!({ "name": name, "is_active": patch.is_active }),
        ),
    )
    .await?;
    tx.commit().await?;
    Ok(account)
}

pub async fn delete_account(pool: &PgPool, ctx: &TenantCtx, account_id: Uuid) -> Result<(), LedgerError> {
    ctx.require(TenantPermission::ManageAccounting)?;
    let mut tx = pool.begin().await?;
    let current = fetch_account(tx.as_mut(), ctx.tenant_id, account_id).await?;
    if current.is_system {
        return Err(LedgerError::SystemAccount(current.code));
    }

    sqlx::query("DELETE FROM accounts WHERE tenant_id = $1 AND id = $2")
        .bind(ctx.tenant_id)
        .bind(account_id)
        .execute(tx.as_mut())
        .await
        .map_err(|e| {
            if crate::db::is_foreign_key_violation(&e) {
                LedgerError::InUse("account")
            } else {
                LedgerError::Database(e)
            }
        })?;

    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new("account", account_id, AuditAction::Delete, serde_json::json!({ "code": current.code })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %account_id, "account deleted");
    Ok(())
}

async fn fetch_account(conn: &mut PgConnection, tenant_id: Uuid, account_id: Uuid) -> Result<Account, LedgerError> {
    sqlx::query_as::<_, Account>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(tenant_id)
    .bind(account_id)
    .fetch_optional(conn)
    .await?
    .ok_or(LedgerError::NotFound("account"))
}

/// System-chart codes with no row for this tenant.
pub async fn missing_system_accounts(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<String>, sqlx::Error> {
    let present: Vec<String> = sqlx::query_scalar("SELECT code FROM accounts WHERE tenant_id = $1")
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;
    Ok(DEFAULT_CHART
        .iter()
        .map(|(code, _, _)| *code)
        .filter(|code| !present.iter().any(|p| p == code))
        .map(str::to_owned)
        .collect())
}

// =============================================================================
// VALIDATION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub account_id: Uuid,
    #[serde(default)]
    pub cost_center_id: Option<Uuid>,
    #[serde(default)]
    pub debit: i64,
    #[serde(default)]
    pub credit: i64,
    #[serde(default)]
    pub memo: Option<String>,
}

impl LineInput {
    #[must_use]
    pub fn debit(account_id: Uuid, amount: i64) -> Self {
        Self { account_id, cost_center_id: None, debit: amount, credit: 0, memo: None }
    }

    #[must_use]
    pub fn credit(account_id: Uuid, amount: i64) -> Self {
        Self { account_id, cost_center_id: None, debit: 0, credit: amount, memo: None }
    }

    #[must_use]
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

/// Check the balancing rules and return the entry total.
///
/// # Errors
///
/// The first violation found, in line order.
pub fn validate_lines(lines: &[LineInput]) -> Result<i64, LedgerError> {
    if lines.len() < 2 {
        return Err(LedgerError::InvalidInput("an entry needs at least two lines".into()));
    }

    let mut debit_total = 0_i64;
    let mut credit_total = 0_i64;
    for (idx, line) in lines.iter().enumerate() {
        let n = idx + 1;
        if line.debit < 0 || line.credit < 0 {
            return Err(LedgerError::InvalidInput(format!("line {n}: amounts must be non-negative")));
        }
        if (line.debit == 0) == (line.credit == 0) {
            return Err(LedgerError::InvalidInput(format!("line {n}: exactly one of debit or credit must be non-zero")));
        }
        debit_total = debit_total
            .checked_add(line.debit)
            .ok_or_else(|| LedgerError::InvalidInput("debit total overflows".into()))?;
        credit_total = credit_total
            .checked_add(line.credit)
            .ok_or_else(|| LedgerError::InvalidInput("credit total overflows".into()))?;
    }

    if debit_total != credit_total {
        return Err(LedgerError::Unbalanced(format!("debits {debit_total} != credits {credit_total}")));
    }
    Ok(debit_total)
}

/// Every referenced account must be the tenant's and active; every cost
/// center must be the tenant's.
async fn check_references(conn: &mut PgConnection, tenant_id: Uuid, lines: &[LineInput]) -> Result<(), LedgerError> {
    let mut account_ids: Vec<Uuid> = lines.iter().map(|l| l.account_id).collect();
    account_ids.sort_unstable();
    account_ids.dedup();
    let found: Vec<(Uuid, bool)> =
        sqlx::query_as("SELECT id, is_active FROM accounts WHERE tenant_id = $1 AND id = ANY($2)")
            .bind(tenant_id)
            .bind(&account_ids)
            .fetch_all(&mut *conn)
            .await?;
    for id in &account_ids {
        match found.iter().find(|(fid, _)| fid == id) {
            None => return Err(LedgerError::InvalidInput(format!("unknown account {id}"))),
            Some((_, false)) => return Err(LedgerError::InvalidInput(format!("account {id} is inactive"))),
            Some(_) => {}
        }
    }

    let mut center_ids: Vec<Uuid> = lines.iter().filter_map(|l| l.cost_center_id).collect();
    center_ids.sort_unstable();
    center_ids.dedup();
    if !center_ids.is_empty() {
        let known: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM cost_centers WHERE tenant_id = $1 AND id = ANY($2)")
                .bind(tenant_id)
                .bind(&center_ids)
                .fetch_one(&mut *conn)
                .await?;
        if usize::try_from(known).unwrap_or_default() != center_ids.len() {
            return Err(LedgerError::InvalidInput("unknown cost center".into()));
        }
    }
    Ok(())
}

// =============================================================================
// JOURNAL ENTRIES
// =============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EntryHeader {
    pub id: Uuid,
    pub number: String,
    pub entry_date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    #[sqlx(try_from = "String")]
    pub source: EntrySource,
    pub source_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub status: EntryStatus,
    pub reversal_of: Option<Uuid>,
    pub reversed_by: Option<Uuid>,
    pub total: i64,
    pub posted_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JournalLine {
    pub id: Uuid,
    pub line_no: i32,
    pub account_id: Uuid,
    pub account_code: String,
    pub account_name: String,
    pub cost_center_id: Option<Uuid>,
    pub debit: i64,
    pub credit: i64,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    #[serde(flatten)]
    pub header: EntryHeader,
    pub lines: Vec<JournalLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryInput {
    pub entry_date: NaiveDate,
    pub description: String,
    #[serde(default)]
    pub reference: Option<String>,
    pub lines: Vec<LineInput>,
    /// Post immediately instead of saving a draft.
    #[serde(default)]
    pub post: bool,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct EntryFilter {
    pub status: Option<EntryStatus>,
    pub source: Option<EntrySource>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub(crate) const ENTRY_COLUMNS: &str = "id, number, entry_date, description, reference, source, source_id, status, \
                             reversal_of, reversed_by, total, posted_at, created_by, created_at";

/// Header fields for [`insert_entry`].
struct NewEntry<'a> {
    entry_date: NaiveDate,
    description: &'a str,
    reference: Option<&'a str>,
    source: EntrySource,
    source_id: Option<Uuid>,
    reversal_of: Option<Uuid>,
    status: EntryStatus,
    total: i64,
}

async fn insert_entry(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    actor_id: Option<Uuid>,
    entry: NewEntry<'_>,
    lines: &[LineInput],
) -> Result<EntryHeader, sqlx::Error> {
    let seq = numbering::next_value(&mut *conn, tenant_id, JOURNAL_SEQUENCE).await?;
    let number = numbering::format_number("JE", seq);
    let header = sqlx::query_as::<_, EntryHeader>(&format!(
        r"INSERT INTO journal_entries
              (tenant_id, number, entry_date, description, reference, source, source_id,
               status, reversal_of, total, posted_at, created_by)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                  CASE WHEN $8 = 'posted' THEN now() END, $11)
          RETURNING {ENTRY_COLUMNS}"
    ))
    .bind(tenant_id)
    .bind(&number)
    .bind(entry.entry_date)
    .bind(entry.description)
    .bind(entry.reference)
    .bind(entry.source.as_str())
    .bind(entry.source_id)
    .bind(entry.status.as_str())
    .bind(entry.reversal_of)
    .bind(entry.total)
    .bind(actor_id)
    .fetch_one(&mut *conn)
    .await?;
    insert_lines(conn, header.id, lines).await?;
    Ok(header)
}

async fn insert_lines(conn: &mut PgConnection, entry_id: Uuid, lines: &[LineInput]) -> Result<(), sqlx::Error> {
    for (idx, line) in lines.iter().enumerate() {
        sqlx::query(
            r"INSERT INTO journal_lines (entry_id, line_no, account_id, cost_center_id, debit, credit, memo)
              VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry_id)
        .bind(i32::try_from(idx + 1).unwrap_or(i32::MAX))
        .bind(line.account_id)
        .bind(line.cost_center_id)
        .bind(line.debit)
        .bind(line.credit)
        .bind(line.memo.as_deref())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn load_lines(conn: &mut PgConnection, entry_id: Uuid) -> Result<Vec<JournalLine>, sqlx::Error> {
    sqlx::query_as::<_, JournalLine>(
        r"SELECT l.id, l.line_no, l.account_id, a.code AS account_code, a.name AS account_name,
                 l.cost_center_id, l.debit, l.credit, l.memo
          FROM journal_lines l
          JOIN accounts a ON a.id = l.account_id
          WHERE l.entry_id = $1
          ORDER BY l.line_no",
    )
    .bind(entry_id)
    .fetch_all(conn)
    .await
}

async fn lock_header(conn: &mut PgConnection, tenant_id: Uuid, entry_id: Uuid) -> Result<EntryHeader, LedgerError> {
    sqlx::query_as::<_, EntryHeader>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(tenant_id)
    .bind(entry_id)
    .fetch_optional(conn)
    .await?
    .ok_or(LedgerError::NotFound("journal entry"))
}

fn require_draft(header: &EntryHeader) -> Result<(), LedgerError> {
    if header.status == EntryStatus::Draft {
        Ok(())
    } else {
        Err(LedgerError::InvalidTransition(format!("{} is {}, not draft", header.number, header.status)))
    }
}

fn entry_changes(header: &EntryHeader, lines: &[LineInput]) -> serde_json::Value {
    serde_json::json!({
        "number": header.number,
        "entry_date": header.entry_date,
        "status": header.status,
        "total": header.total,
        "lines": lines,
    })
}

pub async fn list_entries(pool: &PgPool, ctx: &TenantCtx, filter: &EntryFilter) -> Result<Vec<EntryHeader>, LedgerError> {
    ctx.require(TenantPermission::View)?;
    let rows = sqlx::query_as::<_, EntryHeader>(&format!(
        r"SELECT {ENTRY_COLUMNS} FROM journal_entries
          WHERE tenant_id = $1
            AND ($2::text IS NULL OR status = $2)
            AND ($3::text IS NULL OR source = $3)
            AND ($4::date IS NULL OR entry_date >= $4)
            AND ($5::date IS NULL OR entry_date <= $5)
          ORDER BY entry_date DESC, number DESC
          LIMIT $6 OFFSET $7"
    ))
    .bind(ctx.tenant_id)
    .bind(filter.status.map(EntryStatus::as_str))
    .bind(filter.source.map(EntrySource::as_str))
    .bind(filter.from)
    .bind(filter.to)
    .bind(filter.limit.unwrap_or(100).clamp(1, 500))
    .bind(filter.offset.unwrap_or(0).max(0))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_entry(pool: &PgPool, ctx: &TenantCtx, entry_id: Uuid) -> Result<JournalEntry, LedgerError> {
    ctx.require(TenantPermission::View)?;
    let mut conn = pool.acquire().await?;
    let header = sqlx::query_as::<_, EntryHeader>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(ctx.tenant_id)
    .bind(entry_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(LedgerError::NotFound("journal entry"))?;
    let lines = load_lines(&mut *conn, entry_id).await?;
    Ok(JournalEntry { header, lines })
}

pub async fn create_entry(pool: &PgPool, ctx: &TenantCtx, input: EntryInput) -> Result<JournalEntry, LedgerError> {
    ctx.require(TenantPermission::ManageAccounting)?;
    let description = input.description.trim();
    if description.is_empty() {
        return Err(LedgerError::InvalidInput("description is required".into()));
    }
    let total = validate_lines(&input.lines)?;

    let mut tx = pool.begin().await?;
    check_references(tx.as_mut(), ctx.tenant_id, &input.lines).await?;
    let status = if input.post { EntryStatus::Posted } else { EntryStatus::Draft };
    let header = insert_entry(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        NewEntry {
            entry_date: input.entry_date,
            description,
            reference: input.reference.as_deref(),
            source: EntrySource::Manual,
            source_id: None,
            reversal_of: None,
            status,
            total,
        },
        &input.lines,
    )
    .await?;
    let action = if input.post { AuditAction::Post } else { AuditAction::Create };
    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new("journal_entry", header.id, action, entry_changes(&header, &input.lines)),
    )
    .await?;
    let lines = load_lines(tx.as_mut(), header.id).await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, entry_id = %header.id, number = %header.number, status = %header.status, total, "journal entry created");
    Ok(JournalEntry { header, lines })
}

/// Replace a draft's header fields and lines.
pub async fn update_draft(
    pool: &PgPool,
    ctx: &TenantCtx,
    entry_id: Uuid,
    input: EntryInput,
) -> Result<JournalEntry, LedgerError> {
    ctx.require(TenantPermission::ManageAccounting)?;
    let description = input.description.trim();
    if description.is_empty() {
        return Err(LedgerError::InvalidInput("description is required".into()));
    }
    let total = validate_lines(&input.lines)?;

    let status = if input.post { EntryStatus::Posted } else { EntryStatus::Draft };

    let mut tx = pool.begin().await?;
    let current = lock_header(tx.as_mut(), ctx.tenant_id, entry_id).await?;
    require_draft(&current)?;
    check_references(tx.as_mut(), ctx.tenant_id, &input.lines).await?;

    sqlx::query("DELETE FROM journal_lines WHERE entry_id = $1")
        .bind(entry_id)
        .execute(tx.as_mut())
        .await?;
    insert_lines(tx.as_mut(), entry_id, &input.lines).await?;
    let header = sqlx::query_as::<_, EntryHeader>(&format!(
        r"UPDATE journal_entries
          SET entry_date = $3, description = $4, reference = $5, total = $6,
              status = $7, posted_at = CASE WHEN $7 = 'posted' THEN now() END
          WHERE tenant_id = $1 AND id = $2
          RETURNING {ENTRY_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(entry_id)
    .bind(input.entry_date)
    .bind(description)
    .bind(input.reference.as_deref())
    .bind(total)
    .bind(status.as_str())
    .fetch_one(tx.as_mut())
    .await?;

    let action = if input.post { AuditAction::Post } else { AuditAction::Update };
    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new("journal_entry", entry_id, action, entry_changes(&header, &input.lines)),
    )
    .await?;
    let lines = load_lines(tx.as_mut(), entry_id).await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %entry_id, status = %header.status, "journal draft updated");
    Ok(JournalEntry { header, lines })
}

pub async fn delete_draft(pool: &PgPool, ctx: &TenantCtx, entry_id: Uuid) -> Result<(), LedgerError> {
    ctx.require(TenantPermission::ManageAccounting)?;
    let mut tx = pool.begin().await?;
    let current = lock_header(tx.as_mut(), ctx.tenant_id, entry_id).await?;
    require_draft(&current)?;

    sqlx::query("DELETE FROM journal_entries WHERE tenant_id = $1 AND id = $2")
        .bind(ctx.tenant_id)
        .bind(entry_id)
        .execute(tx.as_mut())
        .await?;
    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new("journal_entry", entry_id, AuditAction::Delete, serde_json::json!({ "number": current.number })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %entry_id, "journal draft deleted");
    Ok(())
}

pub async fn post_entry(pool: &PgPool, ctx: &TenantCtx, entry_id: Uuid) -> Result<JournalEntry, LedgerError> {
    ctx.require(TenantPermission::ManageAccounting)?;
    let mut tx = pool.begin().await?;
    let current = lock_header(tx.as_mut(), ctx.tenant_id, entry_id).await?;
    require_draft(&current)?;

    // Re-validate: accounts may have been deactivated since the draft was saved.
    let existing = load_lines(tx.as_mut(), entry_id).await?;
    let inputs: Vec<LineInput> = existing
        .iter()
        .map(|l| LineInput {
            account_id: l.account_id,
            cost_center_id: l.cost_center_id,
            debit: l.debit,
            credit: l.credit,
            memo: l.memo.clone(),
        })
        .collect();
    validate_lines(&inputs)?;
    check_references(tx.as_mut(), ctx.tenant_id, &inputs).await?;

    let header = sqlx::query_as::<_, EntryHeader>(&format!(
        r"UPDATE journal_entries SET status = 'posted', posted_at = now()
          WHERE tenant_id = $1 AND id = $2
          RETURNING {ENTRY_COLUMNS}"
    ))
    .bind(ctx.tenant_id)
    .bind(entry_id)
    .fetch_one(tx.as_mut())
    .await?;
    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new("journal_entry", entry_id, AuditAction::Post, serde_json::json!({ "number": header.number })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %entry_id, number = %header.number, "journal entry posted");
    Ok(JournalEntry { header, lines: existing })
}

/// Mirror lines with debit and credit swapped.
#[must_use]
pub fn mirror_lines(lines: &[JournalLine]) -> Vec<LineInput> {
    lines
        .iter()
        .map(|l| LineInput {
            account_id: l.account_id,
            cost_center_id: l.cost_center_id,
            debit: l.credit,
            credit: l.debit,
            memo: l.memo.clone(),
        })
        .collect()
}

/// Post a mirror of `entry_id` and mark the original reversed. Returns the
/// reversal.
pub async fn reverse_entry(
    pool: &PgPool,
    ctx: &TenantCtx,
    entry_id: Uuid,
    entry_date: Option<NaiveDate>,
) -> Result<JournalEntry, LedgerError> {
    ctx.require(TenantPermission::ManageAccounting)?;
    let mut tx = pool.begin().await?;
    let original = lock_header(tx.as_mut(), ctx.tenant_id, entry_id).await?;
    if original.status != EntryStatus::Posted {
        return Err(LedgerError::InvalidTransition(format!(
            "only posted entries can be reversed; {} is {}",
            original.number, original.status
        )));
    }

    let mirrored = mirror_lines(&load_lines(tx.as_mut(), entry_id).await?);
    let description = format!("Reversal of {}", original.number);
    let reversal = insert_entry(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        NewEntry {
            entry_date: entry_date.unwrap_or_else(|| Utc::now().date_naive()),
            description: &description,
            reference: Some(&original.number),
            source: EntrySource::Reversal,
            source_id: Some(entry_id),
            reversal_of: Some(entry_id),
            status: EntryStatus::Posted,
            total: original.total,
        },
        &mirrored,
    )
    .await?;

    sqlx::query("UPDATE journal_entries SET status = 'reversed', reversed_by = $3 WHERE tenant_id = $1 AND id = $2")
        .bind(ctx.tenant_id)
        .bind(entry_id)
        .bind(reversal.id)
        .execute(tx.as_mut())
        .await?;
    audit::append(
        tx.as_mut(),
        ctx.tenant_id,
        Some(ctx.user_id),
        AuditEvent::new(
            "journal_entry",
            entry_id,
            AuditAction::Reverse,
            serde_json::json!({ "number": original.number, "reversed_by": reversal.number }),
        ),
    )
    .await?;
    let lines = load_lines(tx.as_mut(), reversal.id).await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %ctx.tenant_id, %entry_id, reversal_id = %reversal.id, "journal entry reversed");
    Ok(JournalEntry { header: reversal, lines })
}

/// Posted entries (including reversed originals) whose lines do not balance.
pub async fn count_unbalanced_posted(pool: &PgPool, tenant_id: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r"SELECT COUNT(*) FROM (
              SELECT e.id
              FROM journal_entries e
              LEFT JOIN journal_lines l ON l.entry_id = e.id
              WHERE e.tenant_id = $1 AND e.status IN ('posted', 'reversed')
              GROUP BY e.id
              HAVING COALESCE(SUM(l.debit), 0) <> COALESCE(SUM(l.credit), 0)
                  OR COUNT(l.id) < 2
          ) unbalanced",
    )
    .bind(tenant_id)
    .fetch_one(pool)
    .await
}

// =============================================================================
// AUTOMATED ENTRIES
// =============================================================================

const AUTOMATED_CODES: [&str; 6] = [
    codes::CASH,
    codes::BANK,
    codes::RECEIVABLE,
    codes::TAX_PAYABLE,
    codes::RENTAL_REVENUE,
    codes::EXTRA_REVENUE,
];

/// Account ids for the codes automated postings use.
#[derive(Debug, Clone, Copy)]
pub struct SystemAccounts {
    pub cash: Uuid,
    pub bank: Uuid,
    pub receivable: Uuid,
    pub tax_payable: Uuid,
    pub rental_revenue: Uuid,
    pub extra_revenue: Uuid,
}

impl SystemAccounts {
    pub async fn load(conn: &mut PgConnection, tenant_id: Uuid) -> Result<Self, LedgerError> {
        let rows: Vec<(String, Uuid)> = sqlx::query_as(
            "SELECT code, id FROM accounts WHERE tenant_id = $1 AND code = ANY($2) AND is_active",
        )
        .bind(tenant_id)
        .bind(&AUTOMATED_CODES[..])
        .fetch_all(conn)
        .await?;
        let by_code: HashMap<String, Uuid> = rows.into_iter().collect();
        let get = |code: &'static str| by_code.get(code).copied().ok_or(LedgerError::MissingAccount(code));
        Ok(Self {
            cash: get(codes::CASH)?,
            bank: get(codes::BANK)?,
            receivable: get(codes::RECEIVABLE)?,
            tax_payable: get(codes::TAX_PAYABLE)?,
            rental_revenue: get(codes::RENTAL_REVENUE)?,
            extra_revenue: get(codes::EXTRA_REVENUE)?,
        })
    }
}

/// Amounts billed when a contract completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceAmounts {
    pub net_rental: i64,
    pub extra_charges: i64,
    pub tax: i64,
}

impl InvoiceAmounts {
    #[must_use]
    pub fn total(&self) -> i64 {
        self.net_rental + self.extra_charges + self.tax
    }
}

/// Receivable against revenue and tax; zero-amount lines are left out.
#[must_use]
pub fn invoice_lines(accounts: &SystemAccounts, amounts: &InvoiceAmounts) -> Vec<LineInput> {
    let mut lines = vec![LineInput::debit(accounts.receivable, amounts.total()).with_memo("receivable")];
    if amounts.net_rental > 0 {
        lines.push(LineInput::credit(accounts.rental_revenue, amounts.net_rental).with_memo("rental"));
    }
    if amounts.extra_charges > 0 {
        lines.push(LineInput::credit(accounts.extra_revenue, amounts.extra_charges).with_memo("extra charges"));
    }
    if amounts.tax > 0 {
        lines.push(LineInput::credit(accounts.tax_payable, amounts.tax).with_memo("tax"));
    }
    lines
}

#[must_use]
pub fn payment_lines(accounts: &SystemAccounts, method: PaymentMethod, amount: i64) -> Vec<LineInput> {
    let target = match method {
        PaymentMethod::Cash => accounts.cash,
        PaymentMethod::Card | PaymentMethod::Transfer => accounts.bank,
    };
    vec![
        LineInput::debit(target, amount).with_memo(method.as_str()),
        LineInput::credit(accounts.receivable, amount).with_memo("receivable"),
    ]
}

/// Which contract an automated entry belongs to.
#[derive(Debug, Clone, Copy)]
pub struct ContractRef<'a> {
    pub id: Uuid,
    pub number: &'a str,
}

async fn post_automated(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    actor_id: Option<Uuid>,
    entry: NewEntry<'_>,
    lines: &[LineInput],
) -> Result<EntryHeader, LedgerError> {
    validate_lines(lines)?;
    let header = insert_entry(&mut *conn, tenant_id, actor_id, entry, lines).await?;
    audit::append(
        conn,
        tenant_id,
        actor_id,
        AuditEvent::new("journal_entry", header.id, AuditAction::Post, entry_changes(&header, lines)),
    )
    .await?;
    tracing::info!(%tenant_id, entry_id = %header.id, number = %header.number, source = %header.source, "automated entry posted");
    Ok(header)
}

/// Post the completion invoice inside the caller's transaction.
pub async fn post_contract_invoice(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    actor_id: Option<Uuid>,
    contract: ContractRef<'_>,
    entry_date: NaiveDate,
    amounts: &InvoiceAmounts,
) -> Result<EntryHeader, LedgerError> {
    let accounts = SystemAccounts::load(&mut *conn, tenant_id).await?;
    let lines = invoice_lines(&accounts, amounts);
    let description = format!("Invoice for contract {}", contract.number);
    post_automated(
        conn,
        tenant_id,
        actor_id,
        NewEntry {
            entry_date,
            description: &description,
            reference: Some(contract.number),
            source: EntrySource::ContractInvoice,
            source_id: Some(contract.id),
            reversal_of: None,
            status: EntryStatus::Posted,
            total: amounts.total(),
        },
        &lines,
    )
    .await
}

/// Post a customer payment inside the caller's transaction.
pub async fn post_contract_payment(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    actor_id: Option<Uuid>,
    contract: ContractRef<'_>,
    entry_date: NaiveDate,
    method: PaymentMethod,
    amount: i64,
) -> Result<EntryHeader, LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidInput("payment amount must be positive".into()));
    }
    let accounts = SystemAccounts::load(&mut *conn, tenant_id).await?;
    let lines = payment_lines(&accounts, method, amount);
    let description = format!("Payment for contract {} ({method})", contract.number);
    post_automated(
        conn,
        tenant_id,
        actor_id,
        NewEntry {
            entry_date,
            description: &description,
            reference: Some(contract.number),
            source: EntrySource::ContractPayment,
            source_id: Some(contract.id),
            reversal_of: None,
            status: EntryStatus::Posted,
            total: amount,
        },
        &lines,
    )
    .await
}

// =============================================================================
// REPORTS
// =============================================================================

/// Balance in the account's normal direction.
#[must_use]
pub fn normal_balance(kind: AccountKind, debit: i64, credit: i64) -> i64 {
    if kind.debit_normal() { debit.saturating_sub(credit) } else { credit.saturating_sub(debit) }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TrialBalanceRow {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub kind: AccountKind,
    pub debit: i64,
    pub credit: i64,
    #[sqlx(skip)]
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialBalance {
    pub as_of: NaiveDate,
    pub rows: Vec<TrialBalanceRow>,
    pub total_debit: i64,
    pub total_credit: i64,
    pub balanced: bool,
}

impl TrialBalance {
    #[must_use]
    pub fn from_rows(as_of: NaiveDate, mut rows: Vec<TrialBalanceRow>) -> Self {
        let mut total_debit = 0_i64;
        let mut total_credit = 0_i64;
        for row in &mut rows {
            row.balance = normal_balance(row.kind, row.debit, row.credit);
            total_debit = i64::saturating_add(total_debit, row.debit);
            total_credit = i64::saturating_add(total_credit, row.credit);
        }
        Self { as_of, rows, total_debit, total_credit, balanced: total_debit == total_credit }
    }
}

pub async fn trial_balance(pool: &PgPool, ctx: &TenantCtx, as_of: NaiveDate) -> Result<TrialBalance, LedgerError> {
    ctx.require(TenantPermission::View)?;
    let rows = sqlx::query_as::<_, TrialBalanceRow>(
        r"SELECT a.id AS account_id, a.code, a.name, a.kind,
                 COALESCE(SUM(l.debit), 0)::BIGINT AS debit,
                 COALESCE(SUM(l.credit), 0)::BIGINT AS credit
          FROM accounts a
          JOIN journal_lines l ON l.account_id = a.id
          JOIN journal_entries e ON e.id = l.entry_id
          WHERE a.tenant_id = $1
            AND e.status IN ('posted', 'reversed')
            AND e.entry_date <= $2
          GROUP BY a.id, a.code, a.name, a.kind
          ORDER BY a.code",
    )
    .bind(ctx.tenant_id)
    .bind(as_of)
    .fetch_all(pool)
    .await?;
    Ok(TrialBalance::from_rows(as_of, rows))
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LedgerLine {
    pub entry_id: Uuid,
    pub number: String,
    pub entry_date: NaiveDate,
    pub description: String,
    pub memo: Option<String>,
    pub debit: i64,
    pub credit: i64,
    #[sqlx(skip)]
    pub running_balance: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountLedger {
    pub account: Account,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub opening_balance: i64,
    pub lines: Vec<LedgerLine>,
    pub closing_balance: i64,
}

/// Fill `running_balance` from `opening`; returns the closing balance.
pub fn apply_running_balance(kind: AccountKind, opening: i64, lines: &mut [LedgerLine]) -> i64 {
    let mut balance = opening;
    for line in lines {
        balance = balance.saturating_add(normal_balance(kind, line.debit, line.credit));
        line.running_balance = balance;
    }
    balance
}

pub async fn account_ledger(
    pool: &PgPool,
    ctx: &TenantCtx,
    account_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<AccountLedger, LedgerError> {
    ctx.require(TenantPermission::View)?;
    if to < from {
        return Err(LedgerError::InvalidInput("`to` must not be before `from`".into()));
    }
    let account = sqlx::query_as::<_, Account>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(ctx.tenant_id)
    .bind(account_id)
    .fetch_optional(pool)
    .await?
    .ok_or(LedgerError::NotFound("account"))?;

    let (opening_debit, opening_credit): (i64, i64) = sqlx::query_as(
        r"SELECT COALESCE(SUM(l.debit), 0)::BIGINT, COALESCE(SUM(l.credit), 0)::BIGINT
          FROM journal_lines l
          JOIN journal_entries e ON e.id = l.entry_id
          WHERE e.tenant_id = $1 AND l.account_id = $2
            AND e.status IN ('posted', 'reversed')
            AND e.entry_date < $3",
    )
    .bind(ctx.tenant_id)
    .bind(account_id)
    .bind(from)
    .fetch_one(pool)
    .await?;
    let opening_balance = normal_balance(account.kind, opening_debit, opening_credit);

    let mut lines = sqlx::query_as::<_, LedgerLine>(
        r"SELECT e.id AS entry_id, e.number, e.entry_date, e.description, l.memo, l.debit, l.credit
          FROM journal_lines l
          JOIN journal_entries e ON e.id = l.entry_id
          WHERE e.tenant_id = $1 AND l.account_id = $2
            AND e.status IN ('posted', 'reversed')
            AND e.entry_date BETWEEN $3 AND $4
          ORDER BY e.entry_date, e.number, l.line_no",
    )
    .bind(ctx.tenant_id)
    .bind(account_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    let closing_balance = apply_running_balance(account.kind, opening_balance, &mut lines);

    Ok(AccountLedger { account, from, to, opening_balance, lines, closing_balance })
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementLine {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncomeStatement {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub revenue: Vec<StatementLine>,
    pub expenses: Vec<StatementLine>,
    pub total_revenue: i64,
    pub total_expenses: i64,
    pub net_income: i64,
}

impl IncomeStatement {
    /// Split per-account totals into revenue and expense sections.
    #[must_use]
    pub fn from_rows(from: NaiveDate, to: NaiveDate, rows: Vec<TrialBalanceRow>) -> Self {
        let mut revenue = Vec::new();
        let mut expenses = Vec::new();
        for row in rows {
            let line = StatementLine {
                account_id: row.account_id,
                amount: normal_balance(row.kind, row.debit, row.credit),
                code: row.code,
                name: row.name,
            };
            match row.kind {
                AccountKind::Revenue => revenue.push(line),
                AccountKind::Expense => expenses.push(line),
                _ => {}
            }
        }
        let total_revenue = revenue.iter().map(|l| l.amount).fold(0, i64::saturating_add);
        let total_expenses = expenses.iter().map(|l| l.amount).fold(0, i64::saturating_add);
        Self {
            from,
            to,
            revenue,
            expenses,
            total_revenue,
            total_expenses,
            net_income: total_revenue.saturating_sub(total_expenses),
        }
    }
}

pub async fn income_statement(
    pool: &PgPool,
    ctx: &TenantCtx,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<IncomeStatement, LedgerError> {
    ctx.require(TenantPermission::View)?;
    if to < from {
        return Err(LedgerError::InvalidInput("`to` must not be before `from`".into()));
    }
    let rows = sqlx::query_as::<_, TrialBalanceRow>(
        r"SELECT a.id AS account_id, a.code, a.name, a.kind,
                 COALESCE(SUM(l.debit), 0)::BIGINT AS debit,
                 COALESCE(SUM(l.credit), 0)::BIGINT AS credit
          FROM accounts a
          JOIN journal_lines l ON l.account_id = a.id
          JOIN journal_entries e ON e.id = l.entry_id
          WHERE a.tenant_id = $1
            AND a.kind IN ('revenue', 'expense')
            AND e.status IN ('posted', 'reversed')
            AND e.entry_date BETWEEN $2 AND $3
          GROUP BY a.id, a.code, a.name, a.kind
          ORDER BY a.code",
    )
    .bind(ctx.tenant_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    Ok(IncomeStatement::from_rows(from, to, rows))
}

#[cfg(test)]
#[path = "ledger_test.rs"]
mod tests;
