// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use rusqlite::params;

#[test]
fn schema_init_is_idempotent_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.sqlite");

    let conn = tally::db::open_at(&path).unwrap();
    conn.execute("INSERT INTO categories(name) VALUES('Groceries')", [])
        .unwrap();
    drop(conn);

    // Re-opening runs schema init again without touching existing data.
    let conn = tally::db::open_at(&path).unwrap();
    let name: String = conn
        .query_row("SELECT name FROM categories WHERE id=1", [], |r| r.get(0))
        .unwrap();
    assert_eq!(name, "Groceries");
}

#[test]
fn foreign_keys_are_enforced() {
    let conn = tally::db::open_in_memory().unwrap();
    let err = conn.execute(
        "INSERT INTO budget_periods(budget_id, period_id, user_id) VALUES (1, '2026-M01', 'default')",
        params![],
    );
    assert!(err.is_err());
}
