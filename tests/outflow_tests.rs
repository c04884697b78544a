// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use rusqlite::{params, Connection};

use tally::commands::transactions::load_transaction_doc;
use tally::engine::events::{dispatch, Event};
use tally::engine::outflow::assign_split;
use tally::engine::periods::ensure_period_for;
use tally::models::{OutflowStatus, PaymentType, PeriodType};

fn setup() -> Connection {
    tally::db::open_in_memory().unwrap()
}

fn outflow(conn: &Connection, name: &str, due: &str, due_date: &str) -> i64 {
    conn.execute(
        "INSERT INTO outflows(user_id, name, amount_due, due_date)
         VALUES ('default', ?1, ?2, ?3)",
        params![name, due, due_date],
    )
    .unwrap();
    conn.last_insert_rowid()
}

fn transaction(conn: &mut Connection, date: &str, amount: &str) -> (i64, i64) {
    conn.execute(
        "INSERT INTO transactions(user_id, date, payee, amount)
         VALUES ('default', ?1, 'Lender', ?2)",
        params![date, amount],
    )
    .unwrap();
    let txn_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO transaction_splits(transaction_id, amount) VALUES (?1, ?2)",
        params![txn_id, amount],
    )
    .unwrap();
    let split_id = conn.last_insert_rowid();
    let doc = load_transaction_doc(conn, txn_id).unwrap();
    let outcome = dispatch(conn, Event::TransactionCreated(doc));
    assert!(outcome.success, "{:?}", outcome.errors);
    (txn_id, split_id)
}

struct PeriodState {
    paid: i64,
    unpaid: i64,
    extra: i64,
    status: String,
}

fn period_state(conn: &Connection, outflow_id: i64, period_id: &str) -> PeriodState {
    conn.query_row(
        "SELECT amount_paid_cents, amount_unpaid_cents, extra_principal_cents, status
         FROM outflow_periods WHERE outflow_id=?1 AND period_id=?2",
        params![outflow_id, period_id],
        |r| {
            Ok(PeriodState {
                paid: r.get(0)?,
                unpaid: r.get(1)?,
                extra: r.get(2)?,
                status: r.get(3)?,
            })
        },
    )
    .unwrap()
}

#[test]
fn assignment_mirrors_into_all_three_granularities() {
    let mut conn = setup();
    let mortgage = outflow(&conn, "Mortgage", "100.00", "2026-03-15");
    let (txn, split) = transaction(&mut conn, "2026-03-10", "60.00");

    let result = assign_split(&mut conn, txn, split, mortgage, PaymentType::Regular, None).unwrap();
    assert!(result.success, "{:?}", result.errors);

    // 2026-03-10: monthly M03, weekly starting Monday 03-09, first half B05.
    for (period_id, p) in [
        ("2026-M03", &result.monthly_period),
        ("2026-W11", &result.weekly_period),
        ("2026-B05", &result.bi_monthly_period),
    ] {
        assert_eq!(p.period_id, period_id);
        let state = period_state(&conn, mortgage, period_id);
        assert_eq!(state.paid, 6000);
        assert_eq!(state.unpaid, 4000);
        assert_eq!(state.extra, 0);
        assert_eq!(state.status, OutflowStatus::PartiallyPaid.as_str());
    }
}

#[test]
fn overpayment_is_capped_and_overflows_into_extra_principal() {
    let mut conn = setup();
    let mortgage = outflow(&conn, "Mortgage", "100.00", "2026-03-15");
    let (txn1, split1) = transaction(&mut conn, "2026-03-10", "60.00");
    let (txn2, split2) = transaction(&mut conn, "2026-03-12", "50.00");

    assign_split(&mut conn, txn1, split1, mortgage, PaymentType::Regular, None).unwrap();
    assign_split(&mut conn, txn2, split2, mortgage, PaymentType::Regular, None).unwrap();

    let state = period_state(&conn, mortgage, "2026-M03");
    assert_eq!(state.paid, 10000);
    assert_eq!(state.unpaid, 0);
    assert_eq!(state.extra, 1000);
    assert_eq!(state.status, OutflowStatus::Paid.as_str());
}

#[test]
fn extra_principal_payments_never_count_toward_due() {
    let mut conn = setup();
    let mortgage = outflow(&conn, "Mortgage", "100.00", "2026-03-15");
    let (txn, split) = transaction(&mut conn, "2026-03-10", "40.00");

    assign_split(
        &mut conn,
        txn,
        split,
        mortgage,
        PaymentType::ExtraPrincipal,
        None,
    )
    .unwrap();

    let state = period_state(&conn, mortgage, "2026-M03");
    assert_eq!(state.paid, 0);
    assert_eq!(state.unpaid, 10000);
    assert_eq!(state.extra, 4000);
    assert_eq!(state.status, OutflowStatus::Pending.as_str());
}

#[test]
fn advance_payment_lands_in_the_target_period() {
    let mut conn = setup();
    let mortgage = outflow(&conn, "Mortgage", "100.00", "2026-03-15");
    let (txn, split) = transaction(&mut conn, "2026-03-20", "100.00");

    let d = chrono::NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
    ensure_period_for(&conn, PeriodType::Monthly, d).unwrap();

    let result = assign_split(
        &mut conn,
        txn,
        split,
        mortgage,
        PaymentType::Advance,
        Some("2026-M04"),
    )
    .unwrap();
    assert!(result.success, "{:?}", result.errors);

    // Mirrors follow the target period's start, not the transaction date.
    assert_eq!(result.monthly_period.period_id, "2026-M04");
    assert_eq!(result.weekly_period.period_id, "2026-W14");
    assert_eq!(result.bi_monthly_period.period_id, "2026-B07");
    let state = period_state(&conn, mortgage, "2026-M04");
    assert_eq!(state.paid, 10000);
    assert_eq!(state.status, OutflowStatus::Paid.as_str());
}

#[test]
fn assignment_detaches_the_split_from_its_budget() {
    let mut conn = setup();
    conn.execute(
        "INSERT INTO budgets(user_id, name, amount, start_date) VALUES ('default', 'Misc', '500', '2026-01-01')",
        [],
    )
    .unwrap();
    let misc: i64 = conn.last_insert_rowid();
    let mortgage = outflow(&conn, "Mortgage", "100.00", "2026-03-15");
    let (txn, split) = transaction(&mut conn, "2026-03-10", "60.00");

    // The catch-all budget took the split on create.
    let spent: i64 = conn
        .query_row(
            "SELECT spent_cents FROM budget_periods WHERE budget_id=?1 AND period_id='2026-M03'",
            params![misc],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(spent, 6000);

    assign_split(&mut conn, txn, split, mortgage, PaymentType::Regular, None).unwrap();

    let spent: i64 = conn
        .query_row(
            "SELECT spent_cents FROM budget_periods WHERE budget_id=?1 AND period_id='2026-M03'",
            params![misc],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(spent, 0);
    let (budget_id, outflow_id): (Option<i64>, Option<i64>) = conn
        .query_row(
            "SELECT budget_id, outflow_id FROM transaction_splits WHERE id=?1",
            params![split],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(budget_id, None);
    assert_eq!(outflow_id, Some(mortgage));
}

#[test]
fn split_on_another_outflow_is_rejected() {
    let mut conn = setup();
    let mortgage = outflow(&conn, "Mortgage", "100.00", "2026-03-15");
    let car = outflow(&conn, "Car loan", "300.00", "2026-03-20");
    let (txn, split) = transaction(&mut conn, "2026-03-10", "60.00");

    assign_split(&mut conn, txn, split, mortgage, PaymentType::Regular, None).unwrap();
    let err = assign_split(&mut conn, txn, split, car, PaymentType::Regular, None).unwrap_err();
    assert!(err.to_string().contains("already assigned"));
}

#[test]
fn reassignment_to_the_same_outflow_is_idempotent() {
    let mut conn = setup();
    let mortgage = outflow(&conn, "Mortgage", "100.00", "2026-03-15");
    let (txn, split) = transaction(&mut conn, "2026-03-10", "60.00");

    assign_split(&mut conn, txn, split, mortgage, PaymentType::Regular, None).unwrap();
    assign_split(&mut conn, txn, split, mortgage, PaymentType::Regular, None).unwrap();

    let state = period_state(&conn, mortgage, "2026-M03");
    assert_eq!(state.paid, 6000);
    let refs: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM outflow_period_splits WHERE split_id=?1",
            params![split],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(refs, 3);
}
