// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

static APP: Lazy<(&str, &str, &str)> = Lazy::new(|| ("com.alphavelocity", "Tally", "tally"));

pub fn db_path() -> Result<PathBuf> {
    let proj = ProjectDirs::from(APP.0, APP.1, APP.2)
        .context("Could not determine platform-specific data dir")?;
    let data_dir = proj.data_dir();
    fs::create_dir_all(data_dir).context("Failed to create data dir")?;
    Ok(data_dir.join("tally.sqlite"))
}

pub fn open_or_init() -> Result<Connection> {
    open_at(&db_path()?)
}

pub fn open_at(path: &Path) -> Result<Connection> {
    let mut conn =
        Connection::open(path).with_context(|| format!("Open DB at {}", path.display()))?;
    init_schema(&mut conn)?;
    Ok(conn)
}

/// In-memory database with the full schema. Used by tests.
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("Open in-memory DB")?;
    init_schema(&mut conn)?;
    Ok(conn)
}

fn init_schema(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS settings(
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS categories(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );

    -- Canonical time windows, one row per (year, type, index).
    -- id is deterministic (e.g. '2026-M03') so concurrent generation
    -- converges on identical rows. Ranges are half-open [start, end), UTC.
    CREATE TABLE IF NOT EXISTS source_periods(
        id TEXT PRIMARY KEY,
        period_type TEXT NOT NULL CHECK(period_type IN ('weekly','bi_monthly','monthly','annual')),
        start_date TEXT NOT NULL,
        end_date TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_source_periods_range ON source_periods(period_type, start_date);

    CREATE TABLE IF NOT EXISTS transactions(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        group_id TEXT,
        date TEXT NOT NULL,
        payee TEXT NOT NULL,
        amount TEXT NOT NULL, -- must equal the sum of its splits
        note TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);
    CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id);

    -- A split is assigned to at most one budget OR one outflow, never both.
    CREATE TABLE IF NOT EXISTS transaction_splits(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        transaction_id INTEGER NOT NULL,
        amount TEXT NOT NULL,
        category_id INTEGER,
        budget_id INTEGER,
        budget_period_id TEXT,
        outflow_id INTEGER,
        payment_type TEXT CHECK(payment_type IN ('regular','catch_up','advance','extra_principal')),
        FOREIGN KEY(transaction_id) REFERENCES transactions(id) ON DELETE CASCADE,
        FOREIGN KEY(category_id) REFERENCES categories(id) ON DELETE SET NULL,
        CHECK(budget_id IS NULL OR outflow_id IS NULL)
    );
    CREATE INDEX IF NOT EXISTS idx_splits_txn ON transaction_splits(transaction_id);
    CREATE INDEX IF NOT EXISTS idx_splits_budget ON transaction_splits(budget_id);
    CREATE INDEX IF NOT EXISTS idx_splits_outflow ON transaction_splits(outflow_id);

    CREATE TABLE IF NOT EXISTS budgets(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        amount TEXT NOT NULL DEFAULT '0',
        start_date TEXT NOT NULL,
        end_date TEXT, -- NULL = ongoing
        is_active INTEGER NOT NULL DEFAULT 1,
        is_everything_else INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(user_id, name)
    );
    CREATE INDEX IF NOT EXISTS idx_budgets_user ON budgets(user_id);

    -- Empty category set for a budget means it matches any category.
    CREATE TABLE IF NOT EXISTS budget_categories(
        budget_id INTEGER NOT NULL,
        category_id INTEGER NOT NULL,
        UNIQUE(budget_id, category_id),
        FOREIGN KEY(budget_id) REFERENCES budgets(id) ON DELETE CASCADE,
        FOREIGN KEY(category_id) REFERENCES categories(id) ON DELETE CASCADE
    );

    -- Aggregate counters are INTEGER minor units so concurrent event
    -- deliveries can apply commutative SQL increments. Document amounts
    -- stay TEXT decimals.
    CREATE TABLE IF NOT EXISTS budget_periods(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        budget_id INTEGER NOT NULL,
        period_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        spent_cents INTEGER NOT NULL DEFAULT 0,
        remaining_cents INTEGER NOT NULL DEFAULT 0,
        UNIQUE(budget_id, period_id),
        FOREIGN KEY(budget_id) REFERENCES budgets(id) ON DELETE CASCADE,
        FOREIGN KEY(period_id) REFERENCES source_periods(id)
    );

    CREATE TABLE IF NOT EXISTS outflows(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        amount_due TEXT NOT NULL,
        due_date TEXT NOT NULL,
        category_id INTEGER,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(user_id, name),
        FOREIGN KEY(category_id) REFERENCES categories(id) ON DELETE SET NULL
    );

    CREATE TABLE IF NOT EXISTS outflow_periods(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        outflow_id INTEGER NOT NULL,
        period_id TEXT NOT NULL,
        period_type TEXT NOT NULL,
        amount_due_cents INTEGER NOT NULL,
        amount_paid_cents INTEGER NOT NULL DEFAULT 0,
        amount_unpaid_cents INTEGER NOT NULL,
        extra_principal_cents INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'PENDING' CHECK(status IN ('PENDING','PARTIALLY_PAID','PAID')),
        is_due_period INTEGER NOT NULL DEFAULT 0,
        UNIQUE(outflow_id, period_id),
        FOREIGN KEY(outflow_id) REFERENCES outflows(id) ON DELETE CASCADE,
        FOREIGN KEY(period_id) REFERENCES source_periods(id)
    );
    CREATE INDEX IF NOT EXISTS idx_outflow_periods ON outflow_periods(outflow_id, period_type);

    -- Split references embedded in each outflow period (the mirrored view).
    CREATE TABLE IF NOT EXISTS outflow_period_splits(
        outflow_period_id INTEGER NOT NULL,
        transaction_id INTEGER NOT NULL,
        split_id INTEGER NOT NULL,
        amount TEXT NOT NULL,
        payment_type TEXT NOT NULL,
        UNIQUE(outflow_period_id, split_id),
        FOREIGN KEY(outflow_period_id) REFERENCES outflow_periods(id) ON DELETE CASCADE
    );

    -- Derived rollups. Never the source of truth; safe to rebuild from scratch.
    CREATE TABLE IF NOT EXISTS group_periods(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id TEXT NOT NULL,
        period_id TEXT NOT NULL,
        total_spent_cents INTEGER NOT NULL DEFAULT 0,
        total_budgeted_cents INTEGER NOT NULL DEFAULT 0,
        total_due_cents INTEGER NOT NULL DEFAULT 0,
        total_paid_cents INTEGER NOT NULL DEFAULT 0,
        UNIQUE(group_id, period_id)
    );

    CREATE TABLE IF NOT EXISTS user_summaries(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        period_id TEXT NOT NULL,
        spent_cents INTEGER NOT NULL DEFAULT 0,
        budgeted_cents INTEGER NOT NULL DEFAULT 0,
        due_cents INTEGER NOT NULL DEFAULT 0,
        paid_cents INTEGER NOT NULL DEFAULT 0,
        unpaid_cents INTEGER NOT NULL DEFAULT 0,
        UNIQUE(user_id, period_id)
    );
    "#,
    )?;
    Ok(())
}
