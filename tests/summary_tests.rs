// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use rusqlite::{params, Connection};

use tally::commands::transactions::load_transaction_doc;
use tally::engine::events::{dispatch, Event};
use tally::engine::outflow::assign_split;
use tally::engine::summary::{rebuild_group_periods, rebuild_user_summaries};
use tally::models::PaymentType;

fn setup() -> Connection {
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
    conn.execute(
        "INSERT INTO outflows(user_id, name, amount_due, due_date)
         VALUES ('default', 'Mortgage', '100.00', '2026-03-15')",
        [],
    )
    .unwrap();
    conn
}

fn transaction(
    conn: &mut Connection,
    date: &str,
    amount: &str,
    category: Option<i64>,
    group: Option<&str>,
) -> (i64, i64) {
    conn.execute(
        "INSERT INTO transactions(user_id, group_id, date, payee, amount)
         VALUES ('default', ?1, ?2, 'Somewhere', ?3)",
        params![group, date, amount],
    )
    .unwrap();
    let txn_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO transaction_splits(transaction_id, amount, category_id)
         VALUES (?1, ?2, ?3)",
        params![txn_id, amount, category],
    )
    .unwrap();
    let split_id = conn.last_insert_rowid();
    let doc = load_transaction_doc(conn, txn_id).unwrap();
    let outcome = dispatch(conn, Event::TransactionCreated(doc));
    assert!(outcome.success, "{:?}", outcome.errors);
    (txn_id, split_id)
}

fn groceries_id(conn: &Connection) -> i64 {
    conn.query_row("SELECT id FROM categories WHERE name='Groceries'", [], |r| {
        r.get(0)
    })
    .unwrap()
}

fn mortgage_id(conn: &Connection) -> i64 {
    conn.query_row("SELECT id FROM outflows WHERE name='Mortgage'", [], |r| {
        r.get(0)
    })
    .unwrap()
}

#[test]
fn user_summary_rolls_up_budgets_and_outflows() {
    let mut conn = setup();
    let groceries = groceries_id(&conn);
    let mortgage = mortgage_id(&conn);

    transaction(&mut conn, "2026-03-10", "25.00", Some(groceries), None);
    let (txn, split) = transaction(&mut conn, "2026-03-12", "60.00", None, None);
    assign_split(&mut conn, txn, split, mortgage, PaymentType::Regular, None).unwrap();

    let rows = rebuild_user_summaries(&mut conn, "default").unwrap();
    assert_eq!(rows, 1);

    let (spent, budgeted, due, paid, unpaid): (i64, i64, i64, i64, i64) = conn
        .query_row(
            "SELECT spent_cents, budgeted_cents, due_cents, paid_cents, unpaid_cents
             FROM user_summaries WHERE user_id='default' AND period_id='2026-M03'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .unwrap();
    assert_eq!(spent, 2500);
    assert_eq!(budgeted, 40000);
    assert_eq!(due, 10000);
    assert_eq!(paid, 6000);
    assert_eq!(unpaid, 4000);
}

#[test]
fn rebuild_is_idempotent() {
    let mut conn = setup();
    let groceries = groceries_id(&conn);
    transaction(&mut conn, "2026-03-10", "25.00", Some(groceries), None);

    let first = rebuild_user_summaries(&mut conn, "default").unwrap();
    let second = rebuild_user_summaries(&mut conn, "default").unwrap();
    assert_eq!(first, second);

    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM user_summaries WHERE user_id='default'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(count, first as i64);
    let spent: i64 = conn
        .query_row(
            "SELECT spent_cents FROM user_summaries WHERE period_id='2026-M03'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(spent, 2500);
}

#[test]
fn summaries_span_every_month_with_activity() {
    let mut conn = setup();
    let groceries = groceries_id(&conn);
    transaction(&mut conn, "2026-03-10", "25.00", Some(groceries), None);
    transaction(&mut conn, "2026-05-02", "10.00", Some(groceries), None);

    let rows = rebuild_user_summaries(&mut conn, "default").unwrap();
    assert_eq!(rows, 2);
    let periods: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT period_id FROM user_summaries ORDER BY period_id")
            .unwrap();
        let rows = stmt.query_map([], |r| r.get(0)).unwrap();
        rows.collect::<Result<_, _>>().unwrap()
    };
    assert_eq!(periods, vec!["2026-M03".to_string(), "2026-M05".to_string()]);
}

#[test]
fn group_periods_roll_up_labeled_transactions() {
    let mut conn = setup();
    let groceries = groceries_id(&conn);
    let mortgage = mortgage_id(&conn);

    transaction(
        &mut conn,
        "2026-03-10",
        "25.00",
        Some(groceries),
        Some("household"),
    );
    let (txn, split) = transaction(&mut conn, "2026-03-12", "60.00", None, Some("household"));
    assign_split(&mut conn, txn, split, mortgage, PaymentType::Regular, None).unwrap();
    // A transaction outside the group lands on the same Food budget; its
    // spending must not leak into the group rollup through the shared
    // budget period totals.
    transaction(&mut conn, "2026-03-20", "99.00", Some(groceries), None);

    let rows = rebuild_group_periods(&mut conn, "household").unwrap();
    assert!(rows >= 1);

    let (spent, budgeted, due, paid): (i64, i64, i64, i64) = conn
        .query_row(
            "SELECT total_spent_cents, total_budgeted_cents, total_due_cents, total_paid_cents
             FROM group_periods WHERE group_id='household' AND period_id='2026-M03'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .unwrap();
    assert_eq!(spent, 2500);
    assert_eq!(budgeted, 40000);
    assert_eq!(due, 10000);
    assert_eq!(paid, 6000);
}
