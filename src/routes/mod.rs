//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds every JSON endpoint under `/api` plus `/healthz` into one Axum
//! router. Authentication and tenant selection happen in the extractors
//! from [`auth`]; handlers are thin wrappers over `crate::services`.

pub mod auth;
pub mod budgets;
pub mod contracts;
pub mod fleet;
pub mod insights;
pub mod ledger;
pub mod tenants;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post};
use serde::de::DeserializeOwned;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        // auth
        .route("/api/auth/email/request-code", post(auth::request_email_code))
        .route("/api/auth/email/verify-code", post(auth::verify_email_code))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/sessions", get(auth::list_sessions))
        .route("/api/auth/sessions/revoke-others", post(auth::revoke_other_sessions))
        .route("/api/auth/sessions/{id}", delete(auth::revoke_session))
        .route("/api/auth/mfa/enroll", post(auth::mfa_enroll))
        .route("/api/auth/mfa/verify", post(auth::mfa_verify))
        .route("/api/auth/mfa/disable", post(auth::mfa_disable))
        .route("/api/auth/mfa/status", get(auth::mfa_status))
        // tenants
        .route("/api/tenants", get(tenants::list_tenants).post(tenants::create_tenant))
        .route("/api/tenants/current", get(tenants::current_tenant).patch(tenants::update_current))
        .route("/api/tenants/current/members", get(tenants::list_members).post(tenants::add_member))
        .route(
            "/api/tenants/current/members/{user_id}",
            patch(tenants::update_member).delete(tenants::remove_member),
        )
        .route("/api/tenants/current/diagnostics", get(tenants::diagnostics))
        // customers
        .route("/api/customers", get(fleet::list_customers).post(fleet::create_customer))
        .route(
            "/api/customers/{id}",
            get(fleet::get_customer)
                .patch(fleet::update_customer)
                .delete(fleet::delete_customer),
        )
        .route("/api/customers/{id}/contracts", get(fleet::customer_contracts))
        // vehicles
        .route("/api/vehicles", get(fleet::list_vehicles).post(fleet::create_vehicle))
        .route("/api/vehicles/availability", get(fleet::availability))
        .route(
            "/api/vehicles/{id}",
            get(fleet::get_vehicle)
                .patch(fleet::update_vehicle)
                .delete(fleet::delete_vehicle),
        )
        // contracts
        .route("/api/contracts", get(contracts::list_contracts).post(contracts::create_contract))
        .route("/api/contracts/overdue", get(contracts::list_overdue))
        .route("/api/contracts/{id}", get(contracts::get_contract).patch(contracts::update_contract))
        .route("/api/contracts/{id}/activate", post(contracts::activate))
        .route("/api/contracts/{id}/complete", post(contracts::complete))
        .route("/api/contracts/{id}/cancel", post(contracts::cancel))
        .route(
            "/api/contracts/{id}/payments",
            get(contracts::payment_summary).post(contracts::record_payment),
        )
        // ledger
        .route("/api/ledger/accounts", get(ledger::list_accounts).post(ledger::create_account))
        .route(
            "/api/ledger/accounts/{id}",
            patch(ledger::update_account).delete(ledger::delete_account),
        )
        .route("/api/ledger/accounts/{id}/ledger", get(ledger::account_ledger))
        .route("/api/ledger/entries", get(ledger::list_entries).post(ledger::create_entry))
        .route(
            "/api/ledger/entries/{id}",
            get(ledger::get_entry)
                .put(ledger::update_entry)
                .delete(ledger::delete_entry),
        )
        .route("/api/ledger/entries/{id}/post", post(ledger::post_entry))
        .route("/api/ledger/entries/{id}/reverse", post(ledger::reverse_entry))
        .route("/api/ledger/reports/trial-balance", get(ledger::trial_balance))
        .route("/api/ledger/reports/income-statement", get(ledger::income_statement))
        // budgets
        .route(
            "/api/budgets/cost-centers",
            get(budgets::list_cost_centers).post(budgets::create_cost_center),
        )
        .route(
            "/api/budgets/cost-centers/{id}",
            patch(budgets::update_cost_center).delete(budgets::delete_cost_center),
        )
        .route("/api/budgets", get(budgets::list_budgets).put(budgets::upsert_budget))
        .route("/api/budgets/report", get(budgets::budget_report))
        .route("/api/budgets/{id}", delete(budgets::delete_budget))
        // analytics, automation, audit
        .route("/api/analytics/report", get(insights::analytics_report))
        .route("/api/analytics/narrative", post(insights::analytics_narrative))
        .route("/api/automation/rules", get(insights::list_rules).post(insights::create_rule))
        .route(
            "/api/automation/rules/{id}",
            patch(insights::update_rule).delete(insights::delete_rule),
        )
        .route("/api/automation/rules/{id}/run", post(insights::run_rule))
        .route("/api/automation/logs", get(insights::list_logs))
        .route("/api/audit", get(insights::list_audit))
        .route("/api/audit/verify", get(insights::verify_audit))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Parse an optional JSON body. Empty bodies yield `T::default()`.
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
