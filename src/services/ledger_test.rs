use super::*;

fn acct() -> Uuid {
    Uuid::new_v4()
}

fn system_accounts() -> SystemAccounts {
    SystemAccounts {
        cash: acct(),
        bank: acct(),
        receivable: acct(),
        tax_payable: acct(),
        rental_revenue: acct(),
        extra_revenue: acct(),
    }
}

fn line(account_id: Uuid, debit: i64, credit: i64) -> LineInput {
    LineInput { account_id, cost_center_id: None, debit, credit, memo: None }
}

fn tb_row(code: &str, kind: AccountKind, debit: i64, credit: i64) -> TrialBalanceRow {
    TrialBalanceRow {
        account_id: acct(),
        code: code.into(),
        name: format!("Account {code}"),
        kind,
        debit,
        credit,
        balance: 0,
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// =============================================================================
// VALIDATION
// =============================================================================

#[test]
fn balanced_entry_returns_total() {
    let lines = vec![line(acct(), 12_000, 0), line(acct(), 0, 10_000), line(acct(), 0, 2_000)];
    assert_eq!(validate_lines(&lines).unwrap(), 12_000);
}

#[test]
fn single_line_is_rejected() {
    let err = validate_lines(&[line(acct(), 100, 0)]).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));
}

#[test]
fn negative_amount_is_rejected() {
    let err = validate_lines(&[line(acct(), -5, 0), line(acct(), 0, -5)]).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(ref m) if m.starts_with("line 1")));
}

#[test]
fn line_with_both_or_neither_side_is_rejected() {
    let both = validate_lines(&[line(acct(), 100, 100), line(acct(), 0, 0)]).unwrap_err();
    assert!(matches!(both, LedgerError::InvalidInput(_)));
    let neither = validate_lines(&[line(acct(), 100, 0), line(acct(), 0, 0)]).unwrap_err();
    assert!(matches!(neither, LedgerError::InvalidInput(ref m) if m.starts_with("line 2")));
}

#[test]
fn unbalanced_entry_maps_to_422() {
    let err = validate_lines(&[line(acct(), 100, 0), line(acct(), 0, 99)]).unwrap_err();
    assert!(matches!(err, LedgerError::Unbalanced(_)));
    assert_eq!(err.error_code(), "E_UNBALANCED");
    assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[test]
fn overflow_is_reported_not_wrapped() {
    let lines = vec![line(acct(), i64::MAX, 0), line(acct(), 1, 0), line(acct(), 0, 1)];
    let err = validate_lines(&lines).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(ref m) if m.contains("overflow")));
}

#[test]
fn tenant_errors_keep_their_code() {
    let err = LedgerError::from(TenantError::Forbidden("viewer"));
    assert_eq!(err.error_code(), "E_FORBIDDEN");
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
}

// =============================================================================
// AUTOMATED ENTRIES
// =============================================================================

#[test]
fn invoice_lines_balance_and_skip_zero_amounts() {
    let accounts = system_accounts();
    let amounts = InvoiceAmounts { net_rental: 30_000, extra_charges: 0, tax: 5_700 };
    let lines = invoice_lines(&accounts, &amounts);

    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], LineInput::debit(accounts.receivable, 35_700).with_memo("receivable"));
    assert!(lines.iter().all(|l| l.account_id != accounts.extra_revenue));
    assert_eq!(validate_lines(&lines).unwrap(), amounts.total());
}

#[test]
fn invoice_lines_credit_extra_charges_separately() {
    let accounts = system_accounts();
    let amounts = InvoiceAmounts { net_rental: 10_000, extra_charges: 2_500, tax: 0 };
    let lines = invoice_lines(&accounts, &amounts);

    assert_eq!(lines.len(), 3);
    assert!(lines.iter().any(|l| l.account_id == accounts.extra_revenue && l.credit == 2_500));
    assert!(lines.iter().all(|l| l.account_id != accounts.tax_payable));
    assert_eq!(validate_lines(&lines).unwrap(), 12_500);
}

#[test]
fn payment_method_selects_cash_or_bank() {
    let accounts = system_accounts();
    let cash = payment_lines(&accounts, PaymentMethod::Cash, 500);
    assert_eq!(cash[0].account_id, accounts.cash);
    assert_eq!(cash[1], LineInput::credit(accounts.receivable, 500).with_memo("receivable"));

    for method in [PaymentMethod::Card, PaymentMethod::Transfer] {
        let lines = payment_lines(&accounts, method, 500);
        assert_eq!(lines[0].account_id, accounts.bank);
        assert_eq!(validate_lines(&lines).unwrap(), 500);
    }
}

#[test]
fn mirror_swaps_sides() {
    let a = acct();
    let b = acct();
    let original = vec![
        JournalLine {
            id: Uuid::new_v4(),
            line_no: 1,
            account_id: a,
            account_code: "1200".into(),
            account_name: "Accounts Receivable".into(),
            cost_center_id: None,
            debit: 700,
            credit: 0,
            memo: Some("receivable".into()),
        },
        JournalLine {
            id: Uuid::new_v4(),
            line_no: 2,
            account_id: b,
            account_code: "4000".into(),
            account_name: "Rental Revenue".into(),
            cost_center_id: None,
            debit: 0,
            credit: 700,
            memo: None,
        },
    ];
    let mirrored = mirror_lines(&original);
    assert_eq!(mirrored[0].credit, 700);
    assert_eq!(mirrored[0].debit, 0);
    assert_eq!(mirrored[1].debit, 700);
    assert_eq!(mirrored[0].memo.as_deref(), Some("receivable"));
    assert_eq!(validate_lines(&mirrored).unwrap(), 700);
}

// =============================================================================
// REPORTS
// =============================================================================

#[test]
fn default_chart_has_unique_codes_and_automated_accounts() {
    let mut codes_seen: Vec<&str> = DEFAULT_CHART.iter().map(|(c, _, _)| *c).collect();
    assert_eq!(codes_seen.len(), 15);
    codes_seen.sort_unstable();
    codes_seen.dedup();
    assert_eq!(codes_seen.len(), 15);
    for code in AUTOMATED_CODES {
        assert!(codes_seen.contains(&code), "{code} missing from default chart");
    }
}

#[test]
fn normal_balance_follows_account_kind() {
    assert_eq!(normal_balance(AccountKind::Asset, 100, 30), 70);
    assert_eq!(normal_balance(AccountKind::Expense, 100, 30), 70);
    assert_eq!(normal_balance(AccountKind::Revenue, 30, 100), 70);
    assert_eq!(normal_balance(AccountKind::Liability, 100, 30), -70);
}

#[test]
fn trial_balance_totals_and_balances() {
    let tb = TrialBalance::from_rows(
        date(2026, 3, 31),
        vec![
            tb_row("1200", AccountKind::Asset, 35_700, 10_000),
            tb_row("1000", AccountKind::Asset, 10_000, 0),
            tb_row("2100", AccountKind::Liability, 0, 5_700),
            tb_row("4000", AccountKind::Revenue, 0, 30_000),
        ],
    );
    assert!(tb.balanced);
    assert_eq!(tb.total_debit, 45_700);
    assert_eq!(tb.total_credit, 45_700);
    assert_eq!(tb.rows[0].balance, 25_700);
    assert_eq!(tb.rows[3].balance, 30_000);
}

#[test]
fn running_balance_starts_from_opening() {
    let mk = |debit, credit| LedgerLine {
        entry_id: Uuid::new_v4(),
        number: "JE-000001".into(),
        entry_date: date(2026, 1, 5),
        description: "x".into(),
        memo: None,
        debit,
        credit,
        running_balance: 0,
    };
    let mut lines = vec![mk(1_000, 0), mk(0, 400), mk(250, 0)];
    let closing = apply_running_balance(AccountKind::Asset, 500, &mut lines);
    assert_eq!(lines.iter().map(|l| l.running_balance).collect::<Vec<_>>(), vec![1_500, 1_100, 1_350]);
    assert_eq!(closing, 1_350);
}

#[test]
fn income_statement_splits_revenue_and_expense() {
    let stmt = IncomeStatement::from_rows(
        date(2026, 1, 1),
        date(2026, 1, 31),
        vec![
            tb_row("4000", AccountKind::Revenue, 0, 50_000),
            tb_row("4100", AccountKind::Revenue, 500, 3_000),
            tb_row("5000", AccountKind::Expense, 8_000, 0),
            tb_row("1000", AccountKind::Asset, 9_999, 0),
        ],
    );
    assert_eq!(stmt.total_revenue, 52_500);
    assert_eq!(stmt.total_expenses, 8_000);
    assert_eq!(stmt.net_income, 44_500);
    assert_eq!(stmt.revenue.len(), 2);
    assert_eq!(stmt.expenses.len(), 1);
}

#[test]
fn entry_input_defaults_to_draft() {
    let input: EntryInput = serde_json::from_value(serde_json::json!({
        "entry_date": "2026-02-01",
        "description": "Fuel",
        "lines": [
            { "account_id": Uuid::nil(), "debit": 100 },
            { "account_id": Uuid::nil(), "credit": 100 }
        ]
    }))
    .unwrap();
    assert!(!input.post);
    assert_eq!(input.lines[1].credit, 100);
    assert_eq!(input.lines[1].debit, 0);
}

#[test]
fn trial_balance_totals_saturate_instead_of_wrapping() {
    let tb = TrialBalance::from_rows(
        date(2026, 3, 31),
        vec![
            tb_row("1000", AccountKind::Asset, i64::MAX, 0),
            tb_row("1200", AccountKind::Asset, i64::MAX, 0),
            tb_row("4000", AccountKind::Revenue, 0, 1),
        ],
    );
    assert_eq!(tb.total_debit, i64::MAX);
    assert_eq!(tb.total_credit, 1);
    assert!(!tb.balanced);
    assert_eq!(normal_balance(AccountKind::Revenue, i64::MAX, -1), i64::MIN);
}

// =============================================================================
// LIVE
// =============================================================================

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;
    use crate::services::tenant::{self, NewTenant, TenantRole};

    async fn setup(pool: &PgPool) -> (TenantCtx, HashMap<String, Uuid>) {
        let email = format!("books-{}@example.com", Uuid::new_v4());
        let user = crate::services::email_auth::upsert_user_by_email(pool, &email).await.unwrap();
        let slug = format!("books-{}", Uuid::new_v4().simple());
        let t = tenant::onboard_tenant(pool, user, NewTenant { name: "Books", slug: Some(&slug), currency: "EUR" })
            .await
            .unwrap();
        let ctx = TenantCtx { tenant_id: t.id, user_id: user, role: TenantRole::Accountant };
        let accounts = list_accounts(pool, &ctx).await.unwrap();
        (ctx, accounts.into_iter().map(|a| (a.code, a.id)).collect())
    }

    #[tokio::test]
    async fn live_post_reverse_and_report() {
        let pool = crate::state::test_helpers::live_pool().await;
        let (ctx, ids) = setup(&pool).await;
        let input = EntryInput {
            entry_date: date(2026, 1, 10),
            description: "Fuel purchase".into(),
            reference: None,
            lines: vec![line(ids["5000"], 4_000, 0), line(ids["1000"], 0, 4_000)],
            post: false,
        };
        let draft = create_entry(&pool, &ctx, input).await.unwrap();
        assert_eq!(draft.header.status, EntryStatus::Draft);
        assert!(draft.header.number.starts_with("JE-"));

        let posted = post_entry(&pool, &ctx, draft.header.id).await.unwrap();
        assert_eq!(posted.header.status, EntryStatus::Posted);
        assert!(matches!(delete_draft(&pool, &ctx, draft.header.id).await, Err(LedgerError::InvalidTransition(_))));

        let reversal = reverse_entry(&pool, &ctx, draft.header.id, Some(date(2026, 1, 11))).await.unwrap();
        assert_eq!(reversal.header.source, EntrySource::Reversal);
        assert!(matches!(
            reverse_entry(&pool, &ctx, draft.header.id, None).await,
            Err(LedgerError::InvalidTransition(_))
        ));

        let tb = trial_balance(&pool, &ctx, date(2026, 1, 31)).await.unwrap();
        assert!(tb.balanced);
        assert!(tb.rows.iter().all(|r| r.balance == 0));
        assert_eq!(count_unbalanced_posted(&pool, ctx.tenant_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn live_system_accounts_are_protected() {
        let pool = crate::state::test_helpers::live_pool().await;
        let (ctx, ids) = setup(&pool).await;
        assert!(matches!(delete_account(&pool, &ctx, ids["1000"]).await, Err(LedgerError::SystemAccount(_))));
        let patch = AccountPatch { name: None, is_active: Some(false) };
        assert!(matches!(update_account(&pool, &ctx, ids["4000"], patch).await, Err(LedgerError::SystemAccount(_))));
        assert!(missing_system_accounts(&pool, ctx.tenant_id).await.unwrap().is_empty());
    }
}
