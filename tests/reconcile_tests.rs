// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use rusqlite::{params, Connection};

use tally::commands::transactions::load_transaction_doc;
use tally::engine::events::{dispatch, Event};
use tally::engine::outflow::assign_split;
use tally::models::PaymentType;

fn setup() -> (Connection, i64, i64) {
    let conn = tally::db::open_in_memory().unwrap();
    conn.execute("INSERT INTO categories(name) VALUES('Groceries')", [])
        .unwrap();
    let groceries = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO budgets(user_id, name, amount, start_date) VALUES ('default', 'Food', '400', '2026-01-01')",
        [],
    )
    .unwrap();
    let food = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO budget_categories(budget_id, category_id) VALUES (?1, ?2)",
        params![food, groceries],
    )
    .unwrap();
    (conn, groceries, food)
}

fn transaction(conn: &mut Connection, date: &str, amount: &str, category_id: i64) -> i64 {
    conn.execute(
        "INSERT INTO transactions(user_id, date, payee, amount)
         VALUES ('default', ?1, 'Market', ?2)",
        params![date, amount],
    )
    .unwrap();
    let txn_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO transaction_splits(transaction_id, amount, category_id)
         VALUES (?1, ?2, ?3)",
        params![txn_id, amount, category_id],
    )
    .unwrap();
    let doc = load_transaction_doc(conn, txn_id).unwrap();
    let outcome = dispatch(conn, Event::TransactionCreated(doc));
    assert!(outcome.success, "{:?}", outcome.errors);
    txn_id
}

fn spent_cents(conn: &Connection, budget_id: i64, period_id: &str) -> i64 {
    conn.query_row(
        "SELECT spent_cents FROM budget_periods WHERE budget_id=?1 AND period_id=?2",
        params![budget_id, period_id],
        |r| r.get(0),
    )
    .unwrap_or(0)
}

#[test]
fn create_increments_the_resolved_budget_period() {
    let (mut conn, groceries, food) = setup();
    transaction(&mut conn, "2026-03-10", "25.00", groceries);
    assert_eq!(spent_cents(&conn, food, "2026-M03"), 2500);
    let remaining: i64 = conn
        .query_row(
            "SELECT remaining_cents FROM budget_periods WHERE budget_id=?1 AND period_id='2026-M03'",
            params![food],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(remaining, 37500);
}

#[test]
fn cross_month_date_edit_conserves_total_spending() {
    let (mut conn, groceries, food) = setup();
    let txn = transaction(&mut conn, "2026-03-10", "25.00", groceries);

    let before = load_transaction_doc(&conn, txn).unwrap();
    conn.execute(
        "UPDATE transactions SET date='2026-04-02' WHERE id=?1",
        params![txn],
    )
    .unwrap();
    let after = load_transaction_doc(&conn, txn).unwrap();
    let outcome = dispatch(&mut conn, Event::TransactionUpdated { before, after });
    assert!(outcome.success, "{:?}", outcome.errors);

    assert_eq!(spent_cents(&conn, food, "2026-M03"), 0);
    assert_eq!(spent_cents(&conn, food, "2026-M04"), 2500);
}

#[test]
fn amount_edit_applies_only_the_difference() {
    let (mut conn, groceries, food) = setup();
    let txn = transaction(&mut conn, "2026-03-10", "25.00", groceries);

    let before = load_transaction_doc(&conn, txn).unwrap();
    conn.execute(
        "UPDATE transactions SET amount='40.00' WHERE id=?1",
        params![txn],
    )
    .unwrap();
    conn.execute(
        "UPDATE transaction_splits SET amount='40.00' WHERE transaction_id=?1",
        params![txn],
    )
    .unwrap();
    let after = load_transaction_doc(&conn, txn).unwrap();
    let outcome = dispatch(&mut conn, Event::TransactionUpdated { before, after });
    assert!(outcome.success, "{:?}", outcome.errors);

    assert_eq!(spent_cents(&conn, food, "2026-M03"), 4000);
}

#[test]
fn unrelated_field_edits_are_skipped() {
    let (mut conn, groceries, food) = setup();
    let txn = transaction(&mut conn, "2026-03-10", "25.00", groceries);

    let before = load_transaction_doc(&conn, txn).unwrap();
    conn.execute(
        "UPDATE transactions SET payee='Renamed market', note='weekly run' WHERE id=?1",
        params![txn],
    )
    .unwrap();
    let after = load_transaction_doc(&conn, txn).unwrap();
    let outcome = dispatch(&mut conn, Event::TransactionUpdated { before, after });
    assert!(outcome.success);
    assert!(outcome.reconcile.as_ref().unwrap().skipped);
    assert_eq!(spent_cents(&conn, food, "2026-M03"), 2500);
}

#[test]
fn redelivered_update_leaves_aggregates_converged() {
    let (mut conn, groceries, food) = setup();
    let txn = transaction(&mut conn, "2026-03-10", "25.00", groceries);

    let before = load_transaction_doc(&conn, txn).unwrap();
    conn.execute(
        "UPDATE transactions SET date='2026-04-02' WHERE id=?1",
        params![txn],
    )
    .unwrap();
    let after = load_transaction_doc(&conn, txn).unwrap();

    let first = dispatch(
        &mut conn,
        Event::TransactionUpdated {
            before: before.clone(),
            after: after.clone(),
        },
    );
    assert!(first.success);
    // Same event again: stored assignments already match the target, so
    // the redelivery produces no increments.
    let second = dispatch(&mut conn, Event::TransactionUpdated { before, after });
    assert!(second.success);

    assert_eq!(spent_cents(&conn, food, "2026-M03"), 0);
    assert_eq!(spent_cents(&conn, food, "2026-M04"), 2500);
}

#[test]
fn redelivered_amount_edit_does_not_double_count() {
    let (mut conn, groceries, food) = setup();
    let txn = transaction(&mut conn, "2026-03-10", "25.00", groceries);

    let before = load_transaction_doc(&conn, txn).unwrap();
    conn.execute(
        "UPDATE transactions SET amount='40.00' WHERE id=?1",
        params![txn],
    )
    .unwrap();
    conn.execute(
        "UPDATE transaction_splits SET amount='40.00' WHERE transaction_id=?1",
        params![txn],
    )
    .unwrap();
    let after = load_transaction_doc(&conn, txn).unwrap();

    let first = dispatch(
        &mut conn,
        Event::TransactionUpdated {
            before: before.clone(),
            after: after.clone(),
        },
    );
    assert!(first.success, "{:?}", first.errors);
    assert_eq!(spent_cents(&conn, food, "2026-M03"), 4000);
    // Only the monthly granularity was written.
    assert_eq!(first.reconcile.as_ref().unwrap().period_types_updated, 1);

    // Ownership stayed put, so the edit is written as an absolute sum of
    // the stored splits; replaying it cannot add the difference again.
    let second = dispatch(&mut conn, Event::TransactionUpdated { before, after });
    assert!(second.success, "{:?}", second.errors);
    assert_eq!(spent_cents(&conn, food, "2026-M03"), 4000);
    let remaining: i64 = conn
        .query_row(
            "SELECT remaining_cents FROM budget_periods WHERE budget_id=?1 AND period_id='2026-M03'",
            params![food],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(remaining, 36000);
}

#[test]
fn delete_reverses_the_stored_assignment() {
    let (mut conn, groceries, food) = setup();
    let txn = transaction(&mut conn, "2026-03-10", "25.00", groceries);
    assert_eq!(spent_cents(&conn, food, "2026-M03"), 2500);

    let doc = load_transaction_doc(&conn, txn).unwrap();
    let outcome = dispatch(&mut conn, Event::TransactionDeleted(doc));
    assert!(outcome.success, "{:?}", outcome.errors);
    conn.execute("DELETE FROM transactions WHERE id=?1", params![txn])
        .unwrap();

    assert_eq!(spent_cents(&conn, food, "2026-M03"), 0);
}

#[test]
fn period_types_count_the_granularities_touched() {
    let (mut conn, groceries, _food) = setup();
    conn.execute(
        "INSERT INTO outflows(user_id, name, amount_due, due_date)
         VALUES ('default', 'Rent', '100.00', '2026-03-15')",
        [],
    )
    .unwrap();
    let rent = conn.last_insert_rowid();

    let txn = transaction(&mut conn, "2026-03-12", "60.00", groceries);
    let split: i64 = conn
        .query_row(
            "SELECT id FROM transaction_splits WHERE transaction_id=?1",
            params![txn],
            |r| r.get(0),
        )
        .unwrap();
    assign_split(&mut conn, txn, split, rent, PaymentType::Regular, None).unwrap();

    // Deleting a bill payment detaches it from all three mirrored
    // granularities, and the outcome reports exactly those.
    let doc = load_transaction_doc(&conn, txn).unwrap();
    let outcome = dispatch(&mut conn, Event::TransactionDeleted(doc));
    assert!(outcome.success, "{:?}", outcome.errors);
    assert_eq!(outcome.reconcile.unwrap().period_types_updated, 3);
}

#[test]
fn split_replacement_moves_spending_between_categories() {
    let (mut conn, groceries, food) = setup();
    conn.execute("INSERT INTO categories(name) VALUES('Travel')", [])
        .unwrap();
    let travel = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO budgets(user_id, name, amount, start_date) VALUES ('default', 'Trips', '300', '2026-01-01')",
        [],
    )
    .unwrap();
    let trips = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO budget_categories(budget_id, category_id) VALUES (?1, ?2)",
        params![trips, travel],
    )
    .unwrap();

    let txn = transaction(&mut conn, "2026-03-10", "25.00", groceries);
    let before = load_transaction_doc(&conn, txn).unwrap();

    // Replacement split is inserted while the old row still exists, the
    // way the update command stages it.
    conn.execute(
        "INSERT INTO transaction_splits(transaction_id, amount, category_id)
         VALUES (?1, '25.00', ?2)",
        params![txn, travel],
    )
    .unwrap();
    let new_split = conn.last_insert_rowid();
    let mut after = load_transaction_doc(&conn, txn).unwrap();
    after.splits.retain(|s| s.id == new_split);

    let outcome = dispatch(&mut conn, Event::TransactionUpdated { before, after });
    assert!(outcome.success, "{:?}", outcome.errors);
    conn.execute(
        "DELETE FROM transaction_splits WHERE transaction_id=?1 AND id != ?2",
        params![txn, new_split],
    )
    .unwrap();

    assert_eq!(spent_cents(&conn, food, "2026-M03"), 0);
    assert_eq!(spent_cents(&conn, trips, "2026-M03"), 2500);
}
