// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use chrono::NaiveDate;
use rusqlite::{params, Connection};

use tally::engine::batch::{commit_in_chunks, WriteOp, MAX_OPS_PER_CHUNK};
use tally::engine::periods::ensure_period_for;
use tally::models::PeriodType;

fn setup() -> (Connection, i64) {
    let conn = tally::db::open_in_memory().unwrap();
    conn.execute(
        "INSERT INTO budgets(user_id, name, amount, start_date) VALUES ('default', 'Food', '400', '2026-01-01')",
        [],
    )
    .unwrap();
    let budget = conn.last_insert_rowid();
    let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
    ensure_period_for(&conn, PeriodType::Monthly, date).unwrap();
    (conn, budget)
}

fn increment(budget_id: i64, delta_cents: i64) -> WriteOp {
    WriteOp::IncrementSpent {
        budget_id,
        period_id: "2026-M03".to_string(),
        user_id: "default".to_string(),
        budget_amount_cents: 40000,
        delta_cents,
    }
}

fn spent_cents(conn: &Connection, budget_id: i64) -> i64 {
    conn.query_row(
        "SELECT spent_cents FROM budget_periods WHERE budget_id=?1 AND period_id='2026-M03'",
        params![budget_id],
        |r| r.get(0),
    )
    .unwrap()
}

#[test]
fn first_increment_seeds_the_period_row() {
    let (mut conn, budget) = setup();
    let outcome = commit_in_chunks(&mut conn, &[increment(budget, 2500)], MAX_OPS_PER_CHUNK);
    assert!(outcome.success(), "{:?}", outcome.errors);
    assert_eq!(outcome.chunks_committed, 1);

    let (spent, remaining): (i64, i64) = conn
        .query_row(
            "SELECT spent_cents, remaining_cents FROM budget_periods
             WHERE budget_id=?1 AND period_id='2026-M03'",
            params![budget],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(spent, 2500);
    assert_eq!(remaining, 37500);
}

#[test]
fn large_op_sets_are_split_into_chunks() {
    let (mut conn, budget) = setup();
    let ops: Vec<WriteOp> = (0..1001).map(|_| increment(budget, 1)).collect();
    let outcome = commit_in_chunks(&mut conn, &ops, MAX_OPS_PER_CHUNK);
    assert!(outcome.success(), "{:?}", outcome.errors);
    assert_eq!(outcome.total_ops, 1001);
    assert_eq!(outcome.chunks_committed, 3);
    assert_eq!(spent_cents(&conn, budget), 1001);
}

#[test]
fn increments_commute() {
    let (mut conn, budget) = setup();
    let ops = [
        increment(budget, 2500),
        increment(budget, -1000),
        increment(budget, 300),
    ];
    let outcome = commit_in_chunks(&mut conn, &ops, MAX_OPS_PER_CHUNK);
    assert!(outcome.success(), "{:?}", outcome.errors);
    assert_eq!(spent_cents(&conn, budget), 1800);
}

#[test]
fn a_failed_chunk_does_not_stop_later_chunks() {
    let (mut conn, budget) = setup();
    // The middle op violates the period foreign key; with one op per
    // chunk the other two still commit.
    let bad = WriteOp::IncrementSpent {
        budget_id: budget,
        period_id: "2099-M01".to_string(),
        user_id: "default".to_string(),
        budget_amount_cents: 40000,
        delta_cents: 100,
    };
    let ops = [increment(budget, 2500), bad, increment(budget, 500)];
    let outcome = commit_in_chunks(&mut conn, &ops, 1);
    assert!(!outcome.success());
    assert_eq!(outcome.chunks_committed, 2);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(spent_cents(&conn, budget), 3000);
}

#[test]
fn recompute_budget_period_writes_the_absolute_sum() {
    let (mut conn, budget) = setup();
    conn.execute(
        "INSERT INTO transactions(user_id, date, payee, amount)
         VALUES ('default', '2026-03-10', 'Market', '55.00')",
        [],
    )
    .unwrap();
    let txn = conn.last_insert_rowid();
    for amount in ["25.00", "30.00"] {
        conn.execute(
            "INSERT INTO transaction_splits
                 (transaction_id, amount, budget_id, budget_period_id)
             VALUES (?1, ?2, ?3, '2026-M03')",
            params![txn, amount, budget],
        )
        .unwrap();
    }

    let op = WriteOp::RecomputeBudgetPeriod {
        budget_id: budget,
        period_id: "2026-M03".to_string(),
        user_id: "default".to_string(),
        budget_amount_cents: 40000,
    };
    // First application seeds the row; re-applying lands on the same sum.
    let outcome = commit_in_chunks(&mut conn, &[op.clone(), op], MAX_OPS_PER_CHUNK);
    assert!(outcome.success(), "{:?}", outcome.errors);
    let (spent, remaining): (i64, i64) = conn
        .query_row(
            "SELECT spent_cents, remaining_cents FROM budget_periods
             WHERE budget_id=?1 AND period_id='2026-M03'",
            params![budget],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(spent, 5500);
    assert_eq!(remaining, 34500);
}

#[test]
fn set_split_budget_writes_absolute_state() {
    let (mut conn, budget) = setup();
    conn.execute(
        "INSERT INTO transactions(user_id, date, payee, amount)
         VALUES ('default', '2026-03-10', 'Market', '25.00')",
        [],
    )
    .unwrap();
    let txn = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO transaction_splits(transaction_id, amount) VALUES (?1, '25.00')",
        params![txn],
    )
    .unwrap();
    let split = conn.last_insert_rowid();

    let op = WriteOp::SetSplitBudget {
        split_id: split,
        budget_id: Some(budget),
        budget_period_id: Some("2026-M03".to_string()),
    };
    // Re-applying the same op converges on the same state.
    let outcome = commit_in_chunks(&mut conn, &[op.clone(), op], MAX_OPS_PER_CHUNK);
    assert!(outcome.success(), "{:?}", outcome.errors);
    let (b, p): (Option<i64>, Option<String>) = conn
        .query_row(
            "SELECT budget_id, budget_period_id FROM transaction_splits WHERE id=?1",
            params![split],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(b, Some(budget));
    assert_eq!(p, Some("2026-M03".to_string()));
}
