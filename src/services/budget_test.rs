use super::*;

fn center(code: &str, parent_id: Option<Uuid>) -> CostCenter {
    CostCenter {
        id: Uuid::new_v4(),
        code: code.into(),
        name: format!("{code} center"),
        parent_id,
        is_active: true,
        created_at: Utc::now(),
    }
}

fn budget(cost_center_id: Uuid, account_id: Option<Uuid>, amount: i64) -> BudgetAmount {
    BudgetAmount { cost_center_id, account_id, account_code: account_id.map(|_| "5000".into()), amount }
}

fn actual(cost_center_id: Uuid, account_id: Uuid, amount: i64) -> ActualAmount {
    ActualAmount { cost_center_id, account_id, amount }
}

// =============================================================================
// CLASSIFY
// =============================================================================

#[test]
fn classify_thresholds() {
    assert_eq!(classify(10_000, 7_999), (Some(7_999), BudgetStatus::OnTrack));
    assert_eq!(classify(10_000, 8_000), (Some(8_000), BudgetStatus::Warning));
    assert_eq!(classify(10_000, 10_000), (Some(10_000), BudgetStatus::Warning));
    assert_eq!(classify(10_000, 10_001), (Some(10_001), BudgetStatus::OverBudget));
}

#[test]
fn classify_zero_budget() {
    assert_eq!(classify(0, 0), (None, BudgetStatus::OnTrack));
    assert_eq!(classify(0, 1), (None, BudgetStatus::OverBudget));
}

#[test]
fn classify_handles_refunds_and_large_amounts() {
    assert_eq!(classify(1_000, -200), (Some(-2_000), BudgetStatus::OnTrack));
    let (bp, status) = classify(1, i64::MAX);
    assert_eq!(bp, Some(i64::MAX));
    assert_eq!(status, BudgetStatus::OverBudget);
}

// =============================================================================
// PERIODS / VALIDATION
// =============================================================================

#[test]
fn period_bounds_cover_month_and_year() {
    let d = |y, m, dd| NaiveDate::from_ymd_opt(y, m, dd).unwrap();
    assert_eq!(period_bounds(2028, Some(2)), Some((d(2028, 2, 1), d(2028, 2, 29))));
    assert_eq!(period_bounds(2026, Some(12)), Some((d(2026, 12, 1), d(2026, 12, 31))));
    assert_eq!(period_bounds(2026, None), Some((d(2026, 1, 1), d(2026, 12, 31))));
    assert_eq!(period_bounds(2026, Some(13)), None);
}

#[test]
fn validate_budget_rejects_bad_month_and_negative_amount() {
    let ok = BudgetInput { cost_center_id: Uuid::nil(), account_id: None, year: 2026, month: 3, amount: 0 };
    assert!(validate_budget(&ok).is_ok());
    assert!(validate_budget(&BudgetInput { month: 0, ..ok.clone() }).is_err());
    assert!(validate_budget(&BudgetInput { month: 13, ..ok.clone() }).is_err());
    assert!(validate_budget(&BudgetInput { amount: -1, ..ok }).is_err());
}

// =============================================================================
// CYCLES
// =============================================================================

#[test]
fn cycle_detection() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    // c -> b -> a
    let parents: HashMap<Uuid, Option<Uuid>> = [(a, None), (b, Some(a)), (c, Some(b))].into_iter().collect();

    assert!(creates_cycle(&parents, a, c), "a under its own grandchild");
    assert!(creates_cycle(&parents, b, b), "self parent");
    assert!(!creates_cycle(&parents, c, a));
    assert!(!creates_cycle(&parents, a, Uuid::new_v4()));
}

#[test]
fn patch_distinguishes_absent_and_null_parent() {
    let absent: CostCenterPatch = serde_json::from_str(r#"{"name":"Ops"}"#).unwrap();
    assert_eq!(absent.parent_id, None);
    let null: CostCenterPatch = serde_json::from_str(r#"{"parent_id":null}"#).unwrap();
    assert_eq!(null.parent_id, Some(None));
    let set: CostCenterPatch = serde_json::from_value(serde_json::json!({ "parent_id": Uuid::nil() })).unwrap();
    assert_eq!(set.parent_id, Some(Some(Uuid::nil())));
}

// =============================================================================
// REPORT
// =============================================================================

#[test]
fn general_budget_compares_all_accounts() {
    let ops = center("OPS", None);
    let fuel = Uuid::new_v4();
    let repairs = Uuid::new_v4();
    let lines = compose_lines(
        std::slice::from_ref(&ops),
        &[budget(ops.id, None, 10_000)],
        &[actual(ops.id, fuel, 6_000), actual(ops.id, repairs, 3_000)],
    );
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].actual, 9_000);
    assert_eq!(lines[0].variance, 1_000);
    assert_eq!(lines[0].utilization_bp, Some(9_000));
    assert_eq!(lines[0].status, BudgetStatus::Warning);
}

#[test]
fn account_budget_compares_only_its_account() {
    let ops = center("OPS", None);
    let fuel = Uuid::new_v4();
    let repairs = Uuid::new_v4();
    let lines = compose_lines(
        std::slice::from_ref(&ops),
        &[budget(ops.id, Some(fuel), 5_000)],
        &[actual(ops.id, fuel, 6_000), actual(ops.id, repairs, 3_000)],
    );
    assert_eq!(lines[0].actual, 6_000);
    assert_eq!(lines[0].variance, -1_000);
    assert_eq!(lines[0].status, BudgetStatus::OverBudget);
}

#[test]
fn lines_for_unknown_centers_are_dropped() {
    let ops = center("OPS", None);
    let lines = compose_lines(&[ops], &[budget(Uuid::new_v4(), None, 1)], &[]);
    assert!(lines.is_empty());
}

#[test]
fn rollup_adds_descendants_into_parents() {
    let root = center("ALL", None);
    let north = center("NORTH", Some(root.id));
    let depot = center("NORTH-DEPOT", Some(north.id));
    let acct = Uuid::new_v4();
    let centers = vec![root.clone(), north.clone(), depot.clone()];
    let budgets = vec![budget(north.id, None, 4_000), budget(depot.id, None, 1_000)];
    let actuals = vec![actual(depot.id, acct, 1_500), actual(root.id, acct, 200)];

    let rows = rollup(&centers, &budgets, &actuals);
    let get = |id: Uuid| rows.iter().find(|r| r.cost_center_id == id).unwrap();

    assert_eq!((get(depot.id).total_budget, get(depot.id).total_actual), (1_000, 1_500));
    assert_eq!(get(depot.id).status, BudgetStatus::OverBudget);
    assert_eq!((get(north.id).own_budget, get(north.id).total_budget), (4_000, 5_000));
    assert_eq!(get(north.id).total_actual, 1_500);
    assert_eq!((get(root.id).total_budget, get(root.id).total_actual), (5_000, 1_700));
    assert_eq!(get(root.id).own_actual, 200);
}

#[test]
fn rollup_and_lines_saturate_on_huge_amounts() {
    let root = center("ROOT", None);
    let child = center("CHILD", Some(root.id));
    let acct = Uuid::new_v4();
    let centers = vec![root.clone(), child.clone()];
    let budgets = vec![budget(root.id, None, i64::MAX), budget(child.id, None, i64::MAX)];
    let actuals = vec![actual(child.id, acct, i64::MAX), actual(child.id, acct, i64::MAX)];

    let rows = rollup(&centers, &budgets, &actuals);
    let top = rows.iter().find(|r| r.cost_center_id == root.id).unwrap();
    assert_eq!((top.total_budget, top.total_actual), (i64::MAX, i64::MAX));

    let lines = compose_lines(&centers, &[budget(child.id, None, 0)], &actuals);
    assert_eq!(lines[0].actual, i64::MAX);
    assert_eq!(lines[0].variance, -i64::MAX);
}

#[test]
fn rollup_survives_a_corrupt_cycle() {
    let mut a = center("A", None);
    let b = center("B", Some(a.id));
    a.parent_id = Some(b.id);
    let rows = rollup(&[a.clone(), b], &[budget(a.id, None, 100)], &[]);
    assert_eq!(rows.len(), 2);
}

#[test]
fn report_alerts_skip_on_track_lines() {
    let ops = center("OPS", None);
    let acct = Uuid::new_v4();
    let lines = compose_lines(
        std::slice::from_ref(&ops),
        &[budget(ops.id, None, 100), budget(ops.id, Some(acct), 1_000)],
        &[actual(ops.id, acct, 90)],
    );
    let report = BudgetReport { year: 2026, month: Some(1), lines, rollup: Vec::new(), total_budget: 1_100, total_actual: 90 };
    let alerts: Vec<_> = report.alerts().collect();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].budget, 100);
}

#[test]
fn status_serializes_snake_case() {
    assert_eq!(serde_json::to_value(BudgetStatus::OverBudget).unwrap(), "over_budget");
}

// =============================================================================
// LIVE
// =============================================================================

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;
    use crate::services::ledger::{self, EntryInput, LineInput};
    use crate::services::tenant::{self, NewTenant, TenantRole};

    async fn setup(pool: &PgPool) -> (TenantCtx, HashMap<String, Uuid>) {
        let email = format!("budget-{}@example.com", Uuid::new_v4());
        let user = crate::services::email_auth::upsert_user_by_email(pool, &email).await.unwrap();
        let slug = format!("budget-{}", Uuid::new_v4().simple());
        let t = tenant::onboard_tenant(pool, user, NewTenant { name: "Budgets", slug: Some(&slug), currency: "EUR" })
            .await
            .unwrap();
        let ctx = TenantCtx { tenant_id: t.id, user_id: user, role: TenantRole::Accountant };
        let accounts = ledger::list_accounts(pool, &ctx).await.unwrap();
        (ctx, accounts.into_iter().map(|a| (a.code, a.id)).collect())
    }

    fn monthly(cost_center_id: Uuid, amount: i64) -> BudgetInput {
        BudgetInput { cost_center_id, account_id: None, year: 2026, month: 1, amount }
    }

    #[tokio::test]
    async fn live_upsert_replaces_and_report_rolls_up() {
        let pool = crate::state::test_helpers::live_pool().await;
        let (ctx, accounts) = setup(&pool).await;

        let ops = create_cost_center(&pool, &ctx, NewCostCenter { code: "ops".into(), name: "Operations".into(), parent_id: None })
            .await
            .unwrap();
        let fuel = create_cost_center(&pool, &ctx, NewCostCenter { code: "fuel".into(), name: "Fuel".into(), parent_id: Some(ops.id) })
            .await
            .unwrap();
        assert_eq!(fuel.code, "FUEL");

        let first = upsert_budget(&pool, &ctx, monthly(fuel.id, 10_000)).await.unwrap();
        let second = upsert_budget(&pool, &ctx, monthly(fuel.id, 5_000)).await.unwrap();
        assert_eq!(first.id, second.id);
        let filter = BudgetFilter { year: Some(2026), cost_center_id: Some(fuel.id) };
        let stored = list_budgets(&pool, &ctx, &filter).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].amount, 5_000);

        let fill_up = EntryInput {
            entry_date: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
            description: "Fuel card".into(),
            reference: None,
            lines: vec![
                LineInput { account_id: accounts["5000"], cost_center_id: Some(fuel.id), debit: 4_500, credit: 0, memo: None },
                LineInput { account_id: accounts["1000"], cost_center_id: None, debit: 0, credit: 4_500, memo: None },
            ],
            post: true,
        };
        ledger::create_entry(&pool, &ctx, fill_up).await.unwrap();

        let report = budget_report(&pool, &ctx, 2026, Some(1)).await.unwrap();
        assert_eq!(report.lines.len(), 1);
        let line = &report.lines[0];
        assert_eq!((line.cost_center_code.as_str(), line.budget, line.actual), ("FUEL", 5_000, 4_500));
        assert_eq!(line.status, BudgetStatus::Warning);

        let parent = report.rollup.iter().find(|r| r.cost_center_id == ops.id).unwrap();
        assert_eq!((parent.own_budget, parent.own_actual), (0, 0));
        assert_eq!((parent.total_budget, parent.total_actual), (5_000, 4_500));
        assert_eq!(parent.status, BudgetStatus::Warning);

        // February is outside the posted entry
        let feb = budget_report(&pool, &ctx, 2026, Some(2)).await.unwrap();
        assert_eq!(feb.total_actual, 0);

        assert!(matches!(delete_cost_center(&pool, &ctx, fuel.id).await, Err(BudgetError::InUse)));
    }

    #[tokio::test]
    async fn live_account_budget_is_separate_from_center_budget() {
        let pool = crate::state::test_helpers::live_pool().await;
        let (ctx, accounts) = setup(&pool).await;
        let center = create_cost_center(&pool, &ctx, NewCostCenter { code: "FLEET".into(), name: "Fleet".into(), parent_id: None })
            .await
            .unwrap();

        let general = upsert_budget(&pool, &ctx, monthly(center.id, 1_000)).await.unwrap();
        let narrowed = upsert_budget(&pool, &ctx, BudgetInput { account_id: Some(accounts["5000"]), ..monthly(center.id, 400) })
            .await
            .unwrap();
        assert_ne!(general.id, narrowed.id);

        let bad = BudgetInput { account_id: Some(accounts["1000"]), ..monthly(center.id, 1) };
        assert!(matches!(upsert_budget(&pool, &ctx, bad).await, Err(BudgetError::InvalidInput(_))));

        // unused centers can go
        let spare = create_cost_center(&pool, &ctx, NewCostCenter { code: "SPARE".into(), name: "Spare".into(), parent_id: None })
            .await
            .unwrap();
        delete_cost_center(&pool, &ctx, spare.id).await.unwrap();
    }
}
