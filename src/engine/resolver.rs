// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Budget assignment: pick the best-fit budget for a split.
//!
//! Priority chain: a budget naming the split's category beats the
//! catch-all (empty category set), which beats the per-user system
//! "everything else" budget. Among specific matches the most recently
//! created budget wins, deterministically. No match is `Unassigned`,
//! never an error.

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::engine::batch::{commit_in_chunks, WriteOp, MAX_OPS_PER_CHUNK};
use crate::engine::{periods, to_cents, EngineResult};
use crate::models::PeriodType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Assignment {
    Assigned { budget_id: i64, period_id: String },
    Unassigned,
}

struct Candidate {
    budget_id: i64,
    is_everything_else: bool,
    category_count: i64,
    category_match: bool,
    created_at: String,
}

/// Resolve a split to a (budget, monthly period) pair.
pub fn resolve(
    conn: &Connection,
    category_id: Option<i64>,
    txn_date: NaiveDate,
    user_id: &str,
) -> EngineResult<Assignment> {
    let mut stmt = conn.prepare_cached(
        "SELECT b.id, b.is_everything_else, b.created_at,
                (SELECT COUNT(*) FROM budget_categories bc WHERE bc.budget_id=b.id),
                EXISTS(SELECT 1 FROM budget_categories bc
                       WHERE bc.budget_id=b.id AND bc.category_id=?3)
         FROM budgets b
         WHERE b.user_id=?1 AND b.is_active=1
           AND b.start_date <= ?2 AND (b.end_date IS NULL OR b.end_date > ?2)",
    )?;
    let date_s = txn_date.to_string();
    let rows = stmt.query_map(params![user_id, date_s, category_id], |r| {
        Ok(Candidate {
            budget_id: r.get(0)?,
            is_everything_else: r.get::<_, i64>(1)? != 0,
            created_at: r.get(2)?,
            category_count: r.get(3)?,
            category_match: r.get::<_, i64>(4)? != 0,
        })
    })?;

    let mut specific: Option<Candidate> = None;
    let mut catch_all: Option<Candidate> = None;
    let mut everything_else: Option<Candidate> = None;
    for row in rows {
        let c = row?;
        if c.is_everything_else {
            everything_else = Some(c);
        } else if c.category_count == 0 {
            catch_all = Some(c);
        } else if c.category_match {
            // Most recently created specific budget wins; id breaks ties.
            let better = match &specific {
                Some(cur) => {
                    (c.created_at.as_str(), c.budget_id) > (cur.created_at.as_str(), cur.budget_id)
                }
                None => true,
            };
            if better {
                specific = Some(c);
            }
        }
    }

    let winner = specific.or(catch_all).or(everything_else);
    match winner {
        Some(c) => {
            let period = periods::ensure_period_for(conn, PeriodType::Monthly, txn_date)?;
            Ok(Assignment::Assigned {
                budget_id: c.budget_id,
                period_id: period.id,
            })
        }
        None => Ok(Assignment::Unassigned),
    }
}

/// Create the per-user system "everything else" budget if missing. Exactly
/// one exists per user: zero amount, always active, undeletable.
pub fn ensure_everything_else(conn: &Connection, user_id: &str) -> EngineResult<i64> {
    conn.execute(
        "INSERT INTO budgets(user_id, name, amount, start_date, is_active, is_everything_else)
         SELECT ?1, 'Everything else', '0', '1970-01-01', 1, 1
         WHERE NOT EXISTS(SELECT 1 FROM budgets WHERE user_id=?1 AND is_everything_else=1)",
        params![user_id],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM budgets WHERE user_id=?1 AND is_everything_else=1",
        params![user_id],
        |r| r.get(0),
    )?;
    Ok(id)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReassignStats {
    pub success: bool,
    pub splits_reassigned: usize,
    pub splits_unassigned: usize,
    pub budget_periods_updated: usize,
    pub errors: Vec<String>,
}

struct SplitRow {
    split_id: i64,
    amount: Decimal,
    category_id: Option<i64>,
    budget_id: Option<i64>,
    budget_period_id: Option<String>,
    date: NaiveDate,
    user_id: String,
}

fn split_rows(
    conn: &Connection,
    where_clause: &str,
    args: &[&dyn rusqlite::ToSql],
) -> EngineResult<Vec<SplitRow>> {
    let sql = format!(
        "SELECT s.id, s.amount, s.category_id, s.budget_id, s.budget_period_id, t.date, t.user_id
         FROM transaction_splits s JOIN transactions t ON s.transaction_id=t.id
         WHERE {where_clause}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(args, |r| {
        Ok((
            r.get::<_, i64>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, Option<i64>>(2)?,
            r.get::<_, Option<i64>>(3)?,
            r.get::<_, Option<String>>(4)?,
            r.get::<_, String>(5)?,
            r.get::<_, String>(6)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (split_id, amount_s, category_id, budget_id, budget_period_id, date_s, user_id) = row?;
        let amount = amount_s.parse::<Decimal>().map_err(|e| {
            crate::engine::EngineError::Invariant(format!("bad split amount '{amount_s}': {e}"))
        })?;
        let date = NaiveDate::parse_from_str(&date_s, "%Y-%m-%d").map_err(|e| {
            crate::engine::EngineError::Invariant(format!("bad transaction date '{date_s}': {e}"))
        })?;
        out.push(SplitRow {
            split_id,
            amount,
            category_id,
            budget_id,
            budget_period_id,
            date,
            user_id,
        });
    }
    Ok(out)
}

fn budget_amount_cents(conn: &Connection, budget_id: i64) -> EngineResult<i64> {
    let s: String = conn.query_row(
        "SELECT amount FROM budgets WHERE id=?1",
        params![budget_id],
        |r| r.get(0),
    )?;
    let amount = s.parse::<Decimal>().map_err(|e| {
        crate::engine::EngineError::Invariant(format!("bad budget amount '{s}': {e}"))
    })?;
    to_cents(amount)
}

/// Move one split to wherever `resolve` now puts it, emitting the ops to
/// reverse the old assignment and apply the new one. No-op when the
/// assignment is unchanged, which makes re-runs converge.
fn reresolve_split(
    conn: &Connection,
    row: &SplitRow,
    old_budget_gone: bool,
    ops: &mut Vec<WriteOp>,
    stats: &mut ReassignStats,
) -> EngineResult<()> {
    let target = resolve(conn, row.category_id, row.date, &row.user_id)?;
    let delta = to_cents(row.amount)?;

    let (new_budget, new_period) = match &target {
        Assignment::Assigned {
            budget_id,
            period_id,
        } => (Some(*budget_id), Some(period_id.clone())),
        Assignment::Unassigned => (None, None),
    };
    if new_budget == row.budget_id && new_period == row.budget_period_id {
        return Ok(());
    }

    // Reverse the old contribution unless the old budget's rows are gone.
    if let (Some(old_budget), Some(old_period), false) =
        (row.budget_id, row.budget_period_id.as_ref(), old_budget_gone)
    {
        ops.push(WriteOp::IncrementSpent {
            budget_id: old_budget,
            period_id: old_period.clone(),
            user_id: row.user_id.clone(),
            budget_amount_cents: budget_amount_cents(conn, old_budget)?,
            delta_cents: -delta,
        });
        stats.budget_periods_updated += 1;
    }

    if let (Some(budget_id), Some(period_id)) = (new_budget, new_period.as_ref()) {
        ops.push(WriteOp::IncrementSpent {
            budget_id,
            period_id: period_id.clone(),
            user_id: row.user_id.clone(),
            budget_amount_cents: budget_amount_cents(conn, budget_id)?,
            delta_cents: delta,
        });
        stats.budget_periods_updated += 1;
        stats.splits_reassigned += 1;
    } else {
        stats.splits_unassigned += 1;
    }
    ops.push(WriteOp::SetSplitBudget {
        split_id: row.split_id,
        budget_id: new_budget,
        budget_period_id: new_period,
    });
    Ok(())
}

/// Re-resolve every split the deleted budget held against the remaining
/// active budgets. The deleted budget's period rows are already gone, so
/// only the new owner receives increments; splits that match nothing end
/// up unassigned, never dangling.
pub fn reassign_from_deleted_budget(
    conn: &mut Connection,
    budget_id: i64,
    user_id: &str,
) -> EngineResult<ReassignStats> {
    let rows = split_rows(
        conn,
        "s.budget_id=?1 AND t.user_id=?2",
        params![budget_id, user_id],
    )?;
    let mut stats = ReassignStats::default();
    let mut ops = Vec::new();
    for row in &rows {
        if let Err(e) = reresolve_split(conn, row, true, &mut ops, &mut stats) {
            tracing::error!(split_id = row.split_id, "re-resolution failed: {e}");
            stats.errors.push(format!("split {}: {e}", row.split_id));
        }
    }
    let batch = commit_in_chunks(conn, &ops, MAX_OPS_PER_CHUNK);
    stats.errors.extend(batch.errors);
    stats.success = stats.errors.is_empty();
    Ok(stats)
}

/// React to a budget's category-set change.
///
/// Added categories only pick up splits that are currently unassigned.
/// Any removal re-resolves every split on the budget, not just the
/// removed-category ones: removal can change which budget is most
/// specific for categories still on the budget. `force_full` requests
/// that same full pass without a removal, for window or activation
/// changes that can orphan splits the same way.
pub fn reassign_for_category_change(
    conn: &mut Connection,
    budget_id: i64,
    user_id: &str,
    added: &[i64],
    removed: &[i64],
    force_full: bool,
) -> EngineResult<ReassignStats> {
    let mut stats = ReassignStats::default();
    let mut ops = Vec::new();

    for &category_id in added {
        let rows = split_rows(
            conn,
            "s.budget_id IS NULL AND s.outflow_id IS NULL AND s.category_id=?1 AND t.user_id=?2",
            params![category_id, user_id],
        )?;
        for row in &rows {
            if let Err(e) = reresolve_split(conn, row, false, &mut ops, &mut stats) {
                tracing::error!(split_id = row.split_id, "pick-up failed: {e}");
                stats.errors.push(format!("split {}: {e}", row.split_id));
            }
        }
    }

    if !removed.is_empty() || force_full {
        let rows = split_rows(
            conn,
            "s.budget_id=?1 AND t.user_id=?2",
            params![budget_id, user_id],
        )?;
        for row in &rows {
            if let Err(e) = reresolve_split(conn, row, false, &mut ops, &mut stats) {
                tracing::error!(split_id = row.split_id, "re-resolution failed: {e}");
                stats.errors.push(format!("split {}: {e}", row.split_id));
            }
        }
    }

    let batch = commit_in_chunks(conn, &ops, MAX_OPS_PER_CHUNK);
    stats.errors.extend(batch.errors);
    stats.success = stats.errors.is_empty();
    Ok(stats)
}

/// Give every unassigned, non-bill split of a user another pass through
/// `resolve`. Used when a new budget appears; re-entrant by construction
/// (already-assigned splits are not candidates).
pub fn pick_up_unassigned(conn: &mut Connection, user_id: &str) -> EngineResult<ReassignStats> {
    let rows = split_rows(
        conn,
        "s.budget_id IS NULL AND s.outflow_id IS NULL AND t.user_id=?1",
        params![user_id],
    )?;
    let mut stats = ReassignStats::default();
    let mut ops = Vec::new();
    for row in &rows {
        if let Err(e) = reresolve_split(conn, row, false, &mut ops, &mut stats) {
            tracing::error!(split_id = row.split_id, "pick-up failed: {e}");
            stats.errors.push(format!("split {}: {e}", row.split_id));
        }
    }
    let batch = commit_in_chunks(conn, &ops, MAX_OPS_PER_CHUNK);
    stats.errors.extend(batch.errors);
    stats.success = stats.errors.is_empty();
    Ok(stats)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecalcStats {
    pub success: bool,
    pub transactions_updated: usize,
    pub spending_updated: usize,
    pub errors: Vec<String>,
}

/// Re-resolve splits in the given categories and date range, then rebuild
/// the touched periods of `budget_id` to absolute sums. The absolute
/// rebuild makes this the repair path for drifted budget aggregates.
pub fn recalculate_historical(
    conn: &mut Connection,
    budget_id: i64,
    user_id: &str,
    category_ids: &[i64],
    start: NaiveDate,
    end: NaiveDate,
) -> EngineResult<RecalcStats> {
    let mut stats = RecalcStats::default();
    let mut reassign = ReassignStats::default();
    let mut ops = Vec::new();

    for &category_id in category_ids {
        let rows = split_rows(
            conn,
            "s.category_id=?1 AND t.user_id=?2 AND t.date>=?3 AND t.date<?4
               AND s.outflow_id IS NULL",
            params![category_id, user_id, start.to_string(), end.to_string()],
        )?;
        for row in &rows {
            match reresolve_split(conn, row, false, &mut ops, &mut reassign) {
                Ok(()) => {}
                Err(e) => {
                    tracing::error!(split_id = row.split_id, "recalculation failed: {e}");
                    stats.errors.push(format!("split {}: {e}", row.split_id));
                }
            }
        }
    }
    stats.transactions_updated = reassign.splits_reassigned + reassign.splits_unassigned;

    let batch = commit_in_chunks(conn, &ops, MAX_OPS_PER_CHUNK);
    stats.errors.extend(batch.errors);

    // Absolute recompute of every period the budget now holds splits in.
    match rebuild_budget_periods(conn, budget_id) {
        Ok(n) => stats.spending_updated = n,
        Err(e) => stats.errors.push(format!("budget {budget_id} rebuild: {e}")),
    }
    stats.success = stats.errors.is_empty();
    Ok(stats)
}

/// Recompute every period row of a budget from the splits assigned to it.
/// Periods with no remaining splits are deleted. Idempotent.
pub fn rebuild_budget_periods(conn: &mut Connection, budget_id: i64) -> EngineResult<usize> {
    let amount_cents = budget_amount_cents(conn, budget_id)?;
    let user_id: String = conn.query_row(
        "SELECT user_id FROM budgets WHERE id=?1",
        params![budget_id],
        |r| r.get(0),
    )?;
    let existing: Vec<String> = {
        let mut stmt = conn.prepare("SELECT period_id FROM budget_periods WHERE budget_id=?1")?;
        let ids = stmt
            .query_map(params![budget_id], |r| r.get(0))?
            .collect::<Result<_, _>>()?;
        ids
    };

    let rows = split_rows(conn, "s.budget_id=?1", params![budget_id])?;
    let mut ops = Vec::new();
    let mut held: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for row in &rows {
        let period_id = match row.budget_period_id.clone() {
            Some(id) => id,
            None => {
                // Repair splits that lost their period in a partial batch.
                let id = periods::ensure_period_for(conn, PeriodType::Monthly, row.date)?.id;
                ops.push(WriteOp::SetSplitBudget {
                    split_id: row.split_id,
                    budget_id: Some(budget_id),
                    budget_period_id: Some(id.clone()),
                });
                id
            }
        };
        held.insert(period_id);
    }
    for period_id in &existing {
        if !held.contains(period_id) {
            ops.push(WriteOp::DeleteBudgetPeriod {
                budget_id,
                period_id: period_id.clone(),
            });
        }
    }
    let updated = held.len();
    for period_id in held {
        ops.push(WriteOp::RecomputeBudgetPeriod {
            budget_id,
            period_id,
            user_id: user_id.clone(),
            budget_amount_cents: amount_cents,
        });
    }

    let batch = commit_in_chunks(conn, &ops, MAX_OPS_PER_CHUNK);
    if !batch.success() {
        return Err(crate::engine::EngineError::Invariant(
            batch.errors.join("; "),
        ));
    }
    Ok(updated)
}
