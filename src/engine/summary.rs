// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Read-optimized rollups.
//!
//! Summary documents are fully derived and never the source of truth.
//! Rebuilds run delete-and-reinsert from base state, so invoking them
//! redundantly is safe; this is the defined recovery path for drifted
//! aggregates.

use rusqlite::{params, Connection};

use crate::engine::{from_cents, EngineResult};
use crate::models::{BudgetPeriod, OutflowPeriod, UserSummary};

/// Pure rollup of one user's period documents. No side effects; the
/// caller decides whether to persist the result.
pub fn aggregate(
    user_id: &str,
    period_id: &str,
    budget_rows: &[BudgetPeriod],
    outflow_rows: &[OutflowPeriod],
) -> UserSummary {
    let mut summary = UserSummary {
        user_id: user_id.to_string(),
        period_id: period_id.to_string(),
        spent: rust_decimal::Decimal::ZERO,
        budgeted: rust_decimal::Decimal::ZERO,
        due: rust_decimal::Decimal::ZERO,
        paid: rust_decimal::Decimal::ZERO,
        unpaid: rust_decimal::Decimal::ZERO,
    };
    for b in budget_rows {
        summary.spent += b.spent;
        summary.budgeted += b.spent + b.remaining;
    }
    for o in outflow_rows {
        summary.due += o.amount_due;
        summary.paid += o.amount_paid;
        summary.unpaid += o.amount_unpaid;
    }
    summary
}

fn monthly_period_ids(conn: &Connection, user_id: &str) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT p.period_id FROM (
             SELECT bp.period_id FROM budget_periods bp WHERE bp.user_id=?1
             UNION
             SELECT op.period_id FROM outflow_periods op
             JOIN outflows o ON op.outflow_id=o.id
             WHERE o.user_id=?1 AND op.period_type='monthly'
         ) p
         JOIN source_periods sp ON sp.id=p.period_id
         WHERE sp.period_type='monthly'
         ORDER BY p.period_id",
    )?;
    let ids = stmt
        .query_map(params![user_id], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

fn budget_rows(conn: &Connection, user_id: &str, period_id: &str) -> EngineResult<Vec<BudgetPeriod>> {
    let mut stmt = conn.prepare(
        "SELECT budget_id, period_id, user_id, spent_cents, remaining_cents
         FROM budget_periods WHERE user_id=?1 AND period_id=?2",
    )?;
    let rows = stmt
        .query_map(params![user_id, period_id], |r| {
            Ok(BudgetPeriod {
                budget_id: r.get(0)?,
                period_id: r.get(1)?,
                user_id: r.get(2)?,
                spent: from_cents(r.get(3)?),
                remaining: from_cents(r.get(4)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn outflow_rows(
    conn: &Connection,
    user_id: &str,
    period_id: &str,
) -> EngineResult<Vec<OutflowPeriod>> {
    let mut stmt = conn.prepare(
        "SELECT op.id, op.outflow_id, op.period_id, op.amount_due_cents, op.amount_paid_cents,
                op.amount_unpaid_cents, op.extra_principal_cents, op.status, op.is_due_period
         FROM outflow_periods op JOIN outflows o ON op.outflow_id=o.id
         WHERE o.user_id=?1 AND op.period_id=?2",
    )?;
    let rows = stmt
        .query_map(params![user_id, period_id], |r| {
            Ok(OutflowPeriod {
                id: r.get(0)?,
                outflow_id: r.get(1)?,
                period_id: r.get(2)?,
                period_type: crate::models::PeriodType::Monthly,
                amount_due: from_cents(r.get(3)?),
                amount_paid: from_cents(r.get(4)?),
                amount_unpaid: from_cents(r.get(5)?),
                extra_principal: from_cents(r.get(6)?),
                status: crate::models::OutflowStatus::parse(&r.get::<_, String>(7)?)
                    .unwrap_or(crate::models::OutflowStatus::Pending),
                is_due_period: r.get::<_, i64>(8)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Rebuild every monthly summary row for a user from scratch.
pub fn rebuild_user_summaries(conn: &mut Connection, user_id: &str) -> EngineResult<usize> {
    let period_ids = monthly_period_ids(conn, user_id)?;
    let mut summaries = Vec::with_capacity(period_ids.len());
    for period_id in &period_ids {
        let budgets = budget_rows(conn, user_id, period_id)?;
        let outflows = outflow_rows(conn, user_id, period_id)?;
        summaries.push(aggregate(user_id, period_id, &budgets, &outflows));
    }

    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM user_summaries WHERE user_id=?1",
        params![user_id],
    )?;
    for s in &summaries {
        tx.execute(
            "INSERT INTO user_summaries
                 (user_id, period_id, spent_cents, budgeted_cents, due_cents, paid_cents, unpaid_cents)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                s.user_id,
                s.period_id,
                crate::engine::to_cents(s.spent)?,
                crate::engine::to_cents(s.budgeted)?,
                crate::engine::to_cents(s.due)?,
                crate::engine::to_cents(s.paid)?,
                crate::engine::to_cents(s.unpaid)?
            ],
        )?;
    }
    tx.commit()?;
    tracing::debug!(user_id, rows = summaries.len(), "rebuilt user summaries");
    Ok(summaries.len())
}

/// Rebuild the rollup rows for one group from its labeled transactions.
/// Spent and paid sum the group's own splits, never the whole budget or
/// outflow period totals: shared budgets carry spending from outside the
/// group that must not leak into its rollup. Budgeted and due sum the
/// distinct budgets/outflow periods the group's splits touch.
pub fn rebuild_group_periods(conn: &mut Connection, group_id: &str) -> EngineResult<usize> {
    struct Row {
        period_id: String,
        spent_cents: i64,
        paid_cents: i64,
        budgeted_cents: i64,
        due_cents: i64,
    }

    let rows = {
        let mut stmt = conn.prepare(
            "SELECT p.period_id FROM (
                 SELECT DISTINCT s.budget_period_id AS period_id
                 FROM transaction_splits s
                 JOIN transactions t ON s.transaction_id=t.id
                 WHERE t.group_id=?1 AND s.budget_period_id IS NOT NULL
                 UNION
                 SELECT DISTINCT op.period_id
                 FROM outflow_period_splits r
                 JOIN outflow_periods op ON r.outflow_period_id=op.id
                 JOIN transaction_splits s ON r.split_id=s.id
                 JOIN transactions t ON s.transaction_id=t.id
                 WHERE t.group_id=?1 AND op.period_type='monthly'
             ) p ORDER BY p.period_id",
        )?;
        let period_ids: Vec<String> = stmt
            .query_map(params![group_id], |r| r.get(0))?
            .collect::<Result<_, _>>()?;

        let mut rows = Vec::with_capacity(period_ids.len());
        for period_id in period_ids {
            let spent_cents: i64 = conn.query_row(
                "SELECT COALESCE(SUM(CAST(ROUND(s.amount * 100) AS INTEGER)), 0)
                 FROM transaction_splits s
                 JOIN transactions t ON s.transaction_id=t.id
                 WHERE t.group_id=?2 AND s.budget_period_id=?1",
                params![period_id, group_id],
                |r| r.get(0),
            )?;
            let budgeted_cents: i64 = conn.query_row(
                "SELECT COALESCE(SUM(CAST(ROUND(b.amount * 100) AS INTEGER)), 0)
                 FROM budgets b WHERE b.id IN (
                     SELECT DISTINCT s.budget_id FROM transaction_splits s
                     JOIN transactions t ON s.transaction_id=t.id
                     WHERE t.group_id=?2 AND s.budget_period_id=?1 AND s.budget_id IS NOT NULL)",
                params![period_id, group_id],
                |r| r.get(0),
            )?;
            let paid_cents: i64 = conn.query_row(
                "SELECT COALESCE(SUM(CAST(ROUND(r.amount * 100) AS INTEGER)), 0)
                 FROM outflow_period_splits r
                 JOIN outflow_periods op ON r.outflow_period_id=op.id
                 JOIN transaction_splits s ON r.split_id=s.id
                 JOIN transactions t ON s.transaction_id=t.id
                 WHERE t.group_id=?2 AND op.period_id=?1 AND op.period_type='monthly'
                   AND r.payment_type != 'extra_principal'",
                params![period_id, group_id],
                |r| r.get(0),
            )?;
            let due_cents: i64 = conn.query_row(
                "SELECT COALESCE(SUM(op.amount_due_cents), 0) FROM outflow_periods op
                 WHERE op.period_id=?1 AND op.period_type='monthly' AND op.id IN (
                     SELECT DISTINCT r.outflow_period_id FROM outflow_period_splits r
                     JOIN transaction_splits s ON r.split_id=s.id
                     JOIN transactions t ON s.transaction_id=t.id
                     WHERE t.group_id=?2)",
                params![period_id, group_id],
                |r| r.get(0),
            )?;
            rows.push(Row {
                period_id,
                spent_cents,
                paid_cents,
                budgeted_cents,
                due_cents,
            });
        }
        rows
    };

    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM group_periods WHERE group_id=?1",
        params![group_id],
    )?;
    for row in &rows {
        tx.execute(
            "INSERT INTO group_periods
                 (group_id, period_id, total_spent_cents, total_budgeted_cents,
                  total_due_cents, total_paid_cents)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                group_id,
                row.period_id,
                row.spent_cents,
                row.budgeted_cents,
                row.due_cents,
                row.paid_cents
            ],
        )?;
    }
    tx.commit()?;
    tracing::debug!(group_id, rows = rows.len(), "rebuilt group periods");
    Ok(rows.len())
}
