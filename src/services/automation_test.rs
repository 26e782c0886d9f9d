use super::*;
use crate::services::audit::ChainReport;
use crate::services::budget::BudgetLine;
use crate::services::contract::ContractStatus;
use crate::services::tenant::{DiagnosticFacts, EntityCounts};

fn d(m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, m, day).unwrap()
}

fn active_contract(number: &str, end_date: NaiveDate) -> Contract {
    let now = Utc::now();
    Contract {
        id: Uuid::new_v4(),
        number: number.into(),
        customer_id: Uuid::new_v4(),
        vehicle_id: Uuid::new_v4(),
        start_date: d(1, 1),
        end_date,
        daily_rate: 5_000,
        rental_days: 1,
        base_amount: 5_000,
        discount: 0,
        tax_rate_bp: 0,
        tax_amount: 0,
        extra_charges: 0,
        total_amount: 5_000,
        deposit: 0,
        odometer_out: Some(100),
        odometer_in: None,
        returned_on: None,
        status: ContractStatus::Active,
        invoice_entry_id: None,
        notes: None,
        version: 2,
        created_by: None,
        created_at: now,
        updated_at: now,
    }
}

fn budget_line(code: &str, budget: i64, actual: i64) -> BudgetLine {
    let (utilization_bp, status) = budget::classify(budget, actual);
    BudgetLine {
        cost_center_id: Uuid::new_v4(),
        cost_center_code: code.into(),
        cost_center_name: code.into(),
        account_id: None,
        account_code: None,
        budget,
        actual,
        variance: budget - actual,
        utilization_bp,
        status,
    }
}

fn diagnostics(facts: &DiagnosticFacts) -> Diagnostics {
    let (issues, status) = tenant::assess(facts);
    Diagnostics {
        tenant_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        counts: EntityCounts::default(),
        unbalanced_entries: facts.unbalanced_entries,
        missing_system_accounts: facts.missing_system_accounts.clone(),
        overdue_contracts: facts.overdue_contracts,
        orphaned_rented_vehicles: facts.orphaned_rented_vehicles,
        audit_chain: facts.audit_chain.clone(),
        issues,
        status,
    }
}

fn facts(unbalanced_entries: i64, overdue_contracts: i64) -> DiagnosticFacts {
    DiagnosticFacts {
        unbalanced_entries,
        missing_system_accounts: Vec::new(),
        overdue_contracts,
        orphaned_rented_vehicles: 0,
        audit_chain: ChainReport { ok: true, checked: 3, first_broken_seq: None, reason: None },
    }
}

// =========================================================================
// validation
// =========================================================================

#[test]
fn interval_bounds() {
    assert!(validate_interval(5).is_ok());
    assert!(validate_interval(10_080).is_ok());
    assert!(validate_interval(4).is_err());
    let err = validate_interval(10_081).unwrap_err();
    assert_eq!(err.error_code(), "E_INVALID_INPUT");
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[test]
fn params_must_be_an_object_with_sane_grace() {
    assert!(validate_params(&json!({})).is_ok());
    assert!(validate_params(&json!({ "grace_days": 2 })).is_ok());
    assert!(validate_params(&json!([1, 2])).is_err());
    assert!(validate_params(&json!({ "grace_days": -1 })).is_err());
    assert!(validate_params(&json!({ "grace_days": "two" })).is_err());
}

#[test]
fn blank_names_are_rejected() {
    assert_eq!(clean_name("  Nightly  ").unwrap(), "Nightly");
    assert!(clean_name("   ").is_err());
}

#[test]
fn rule_input_defaults_to_enabled() {
    let input: RuleInput =
        serde_json::from_str(r#"{"name":"x","action":"budget_alerts","interval_minutes":60}"#).unwrap();
    assert!(input.enabled);
    assert_eq!(input.action, RuleAction::BudgetAlerts);
    assert!(serde_json::from_str::<RuleInput>(r#"{"name":"x","action":"reboot","interval_minutes":60}"#).is_err());
}

#[test]
fn only_overdue_rule_is_enabled_by_default() {
    let enabled: Vec<_> = DEFAULT_RULES.iter().filter(|r| r.3).map(|r| r.1).collect();
    assert_eq!(enabled, vec![RuleAction::OverdueContracts]);
    assert!(DEFAULT_RULES.iter().all(|r| validate_interval(r.2).is_ok()));
}

// =========================================================================
// outcomes
// =========================================================================

#[test]
fn overdue_summary_lists_contracts() {
    let rows = vec![active_contract("RC-000001", d(10, 10)), active_contract("RC-000002", d(10, 16))];
    let outcome = summarize_overdue(&rows, d(10, 17), 0);
    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.summary, "2 overdue contract(s)");
    assert_eq!(outcome.details["contracts"][0]["days_overdue"], 7);
    assert_eq!(outcome.details["contracts"][1]["number"], "RC-000002");
}

#[test]
fn grace_days_hide_recent_overdues() {
    let rows = vec![active_contract("RC-000001", d(10, 10)), active_contract("RC-000002", d(10, 16))];
    let outcome = summarize_overdue(&rows, d(10, 17), 3);
    assert_eq!(outcome.summary, "1 overdue contract(s)");

    let none = summarize_overdue(&[], d(10, 17), 0);
    assert_eq!(none.summary, "no overdue contracts");
    assert_eq!(none.status, RunStatus::Success);
}

#[test]
fn budget_summary_counts_alerts() {
    let report = BudgetReport {
        year: 2026,
        month: Some(10),
        lines: vec![budget_line("GEN", 10_000, 5_000), budget_line("OPS", 10_000, 8_500), budget_line("MKT", 1_000, 1_200)],
        rollup: Vec::new(),
        total_budget: 21_000,
        total_actual: 14_700,
    };
    let outcome = summarize_budget(&report);
    assert_eq!(outcome.summary, "2 budget alert(s), 1 over budget");
    assert_eq!(outcome.details["alerts"].as_array().unwrap().len(), 2);
    assert_eq!(outcome.details["alerts"][1]["status"], "over_budget");
}

#[test]
fn integrity_fails_only_when_unhealthy() {
    let healthy = diagnostics(&facts(0, 0));
    let ok = summarize_integrity(&healthy);
    assert_eq!(ok.status, RunStatus::Success);
    assert_eq!(ok.summary, "no integrity issues");

    let degraded = diagnostics(&facts(0, 2));
    assert_eq!(summarize_integrity(&degraded).status, RunStatus::Success);

    let broken = diagnostics(&facts(1, 0));
    let outcome = summarize_integrity(&broken);
    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.details["status"], "unhealthy");
}

#[test]
fn log_rows_round_trip_text_columns() {
    assert_eq!(RuleAction::try_from("integrity_check".to_owned()).unwrap(), RuleAction::IntegrityCheck);
    assert_eq!(RunStatus::Failed.as_str(), "failed");
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
async fn live_manual_run_writes_a_log() {
    use crate::services::tenant::{NewTenant, TenantRole};

    let pool = crate::state::test_helpers::live_pool().await;
    let user = crate::services::email_auth::upsert_user_by_email(&pool, &format!("auto-{}@example.com", Uuid::new_v4()))
        .await
        .unwrap();
    let slug = format!("auto-{}", Uuid::new_v4().simple());
    let t = tenant::onboard_tenant(&pool, user, NewTenant { name: "Auto", slug: Some(&slug), currency: "EUR" })
        .await
        .unwrap();
    let ctx = TenantCtx { tenant_id: t.id, user_id: user, role: TenantRole::Admin };

    let rules = list_rules(&pool, &ctx).await.unwrap();
    assert_eq!(rules.len(), DEFAULT_RULES.len());
    let integrity = rules.iter().find(|r| r.action == RuleAction::IntegrityCheck).unwrap();

    let log = run_rule_now(&pool, &ctx, integrity.id).await.unwrap();
    assert_eq!(log.status, RunStatus::Success);
    let logs = list_logs(&pool, &ctx, &LogFilter { rule_id: Some(integrity.id), limit: None }).await.unwrap();
    assert_eq!(logs.len(), 1);

    let viewer = TenantCtx { role: TenantRole::Viewer, ..ctx };
    assert_eq!(list_rules(&pool, &viewer).await.unwrap_err().error_code(), "E_FORBIDDEN");
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
async fn live_concurrent_claims_take_a_rule_once() {
    use crate::services::tenant::{NewTenant, TenantRole};

    let pool = crate::state::test_helpers::live_pool().await;
    let user = crate::services::email_auth::upsert_user_by_email(&pool, &format!("claim-{}@example.com", Uuid::new_v4()))
        .await
        .unwrap();
    let slug = format!("claim-{}", Uuid::new_v4().simple());
    let t = tenant::onboard_tenant(&pool, user, NewTenant { name: "Claims", slug: Some(&slug), currency: "EUR" })
        .await
        .unwrap();
    let ctx = TenantCtx { tenant_id: t.id, user_id: user, role: TenantRole::Owner };

    let input = RuleInput {
        name: "Race".into(),
        action: RuleAction::IntegrityCheck,
        interval_minutes: 60,
        enabled: true,
        params: None,
    };
    let rule = create_rule(&pool, &ctx, input).await.unwrap();
    // oldest due rule in the table, so it lands in the first batch
    sqlx::query("UPDATE automation_rules SET next_run_at = '2000-01-01T00:00:00Z' WHERE id = $1")
        .bind(rule.id)
        .execute(&pool)
        .await
        .unwrap();

    let (a, b) = tokio::join!(claim_due(&pool, CLAIM_BATCH), claim_due(&pool, CLAIM_BATCH));
    let (a, b) = (a.unwrap(), b.unwrap());
    let hits = a.iter().chain(&b).filter(|r| r.id == rule.id).count();
    assert_eq!(hits, 1);

    let claimed = a.iter().chain(&b).find(|r| r.id == rule.id).unwrap();
    assert!(claimed.next_run_at > Utc::now());
    assert!(claimed.last_run_at.is_some());

    // no longer due
    let again = claim_due(&pool, CLAIM_BATCH).await.unwrap();
    assert!(again.iter().all(|r| r.id != rule.id));
}
