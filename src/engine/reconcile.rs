// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Delta-based spending reconciliation.
//!
//! A transaction mutation arrives as (old, new) document pair; the engine
//! diffs the split sets, re-resolves ownership of each surviving split,
//! and applies one signed increment per touched (budget, period) pair.
//! Reversal is driven by each split's stored assignment, so a redelivered
//! event that finds assignments already moved produces no deltas. Amount
//! edits that leave ownership in place are recomputed to the absolute sum
//! of the stored splits rather than incremented, so re-running them cannot
//! re-apply the difference. Reconciliation failures never abort the source
//! mutation: they are collected into the outcome's error list.

use std::collections::{BTreeSet, HashMap};

use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::engine::batch::{commit_in_chunks, WriteOp, MAX_OPS_PER_CHUNK};
use crate::engine::{outflow, periods, resolver, to_cents, EngineError, EngineResult};
use crate::models::{PeriodType, Split, TransactionDoc};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileOutcome {
    pub success: bool,
    pub budget_periods_updated: usize,
    pub budgets_affected: usize,
    pub period_types_updated: usize,
    pub skipped: bool,
    pub errors: Vec<String>,
}

/// Cheap pre-check: does this edit touch anything spending-relevant?
/// Unrelated field edits (payee, note) must not trigger recomputation.
pub fn spending_relevant_change(old: &TransactionDoc, new: &TransactionDoc) -> bool {
    let old_period = periods::period_for_date(PeriodType::Monthly, old.transaction.date);
    let new_period = periods::period_for_date(PeriodType::Monthly, new.transaction.date);
    if old_period.id != new_period.id {
        return true;
    }
    if old.splits.len() != new.splits.len() {
        return true;
    }
    let key = |s: &Split| {
        (
            s.id,
            s.amount,
            s.category_id,
            s.budget_id,
            s.outflow_id,
            s.payment_type,
        )
    };
    let mut old_keys: Vec<_> = old.splits.iter().map(key).collect();
    let mut new_keys: Vec<_> = new.splits.iter().map(key).collect();
    old_keys.sort();
    new_keys.sort();
    old_keys != new_keys
}

struct StoredAssignment {
    exists: bool,
    budget_id: Option<i64>,
    budget_period_id: Option<String>,
    outflow_id: Option<i64>,
}

fn stored_assignment(conn: &Connection, split_id: i64) -> EngineResult<StoredAssignment> {
    let row = conn
        .query_row(
            "SELECT budget_id, budget_period_id, outflow_id FROM transaction_splits WHERE id=?1",
            params![split_id],
            |r| {
                Ok((
                    r.get::<_, Option<i64>>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<i64>>(2)?,
                ))
            },
        )
        .optional()?;
    Ok(match row {
        Some((budget_id, budget_period_id, outflow_id)) => StoredAssignment {
            exists: true,
            budget_id,
            budget_period_id,
            outflow_id,
        },
        None => StoredAssignment {
            exists: false,
            budget_id: None,
            budget_period_id: None,
            outflow_id: None,
        },
    })
}

struct DeltaSet {
    by_pair: HashMap<(i64, String), i64>,
    // Pairs whose stored splits already carry the committed amounts; these
    // get an absolute recompute instead of a signed increment.
    recompute: BTreeSet<(i64, String)>,
    ops: Vec<WriteOp>,
}

impl DeltaSet {
    fn add(&mut self, budget_id: i64, period_id: &str, cents: i64) {
        *self
            .by_pair
            .entry((budget_id, period_id.to_string()))
            .or_insert(0) += cents;
    }
}

/// Reconcile aggregates after a transaction create / update / delete.
///
/// `old` is `None` for creates, `new` is `None` for deletes; updates carry
/// both. Returns a structured outcome; this function does not fail the
/// caller even when individual writes do.
pub fn reconcile(
    conn: &mut Connection,
    old: Option<&TransactionDoc>,
    new: Option<&TransactionDoc>,
    user_id: &str,
    group_id: Option<&str>,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    if let (Some(o), Some(n)) = (old, new) {
        if !spending_relevant_change(o, n) {
            outcome.success = true;
            outcome.skipped = true;
            return outcome;
        }
    }
    if old.is_none() && new.is_none() {
        outcome.success = true;
        outcome.skipped = true;
        return outcome;
    }

    let old_map: HashMap<i64, &Split> = old
        .map(|d| d.splits.iter().map(|s| (s.id, s)).collect())
        .unwrap_or_default();
    let new_map: HashMap<i64, &Split> = new
        .map(|d| d.splits.iter().map(|s| (s.id, s)).collect())
        .unwrap_or_default();
    let mut split_ids: BTreeSet<i64> = old_map.keys().copied().collect();
    split_ids.extend(new_map.keys().copied());

    let mut deltas = DeltaSet {
        by_pair: HashMap::new(),
        recompute: BTreeSet::new(),
        ops: Vec::new(),
    };

    for split_id in split_ids {
        let result = reconcile_split(
            conn,
            split_id,
            old_map.get(&split_id).copied(),
            new_map.get(&split_id).copied(),
            new.map(|d| d.transaction.date),
            user_id,
            &mut deltas,
        );
        if let Err(e) = result {
            tracing::error!(split_id, "split reconciliation failed: {e}");
            outcome.errors.push(format!("split {split_id}: {e}"));
        }
    }

    // One signed increment per (budget, period) pair, zero deltas dropped.
    // Pairs marked for recompute are written absolutely instead, after the
    // assignment ops, so the sum reads the post-assignment split rows.
    let mut budget_amounts: HashMap<i64, i64> = HashMap::new();
    let mut budgets: BTreeSet<i64> = BTreeSet::new();
    let mut increments = Vec::new();
    for ((budget_id, period_id), cents) in &deltas.by_pair {
        if *cents == 0 || deltas.recompute.contains(&(*budget_id, period_id.clone())) {
            continue;
        }
        let amount_cents = match budget_amounts.entry(*budget_id) {
            std::collections::hash_map::Entry::Occupied(e) => *e.get(),
            std::collections::hash_map::Entry::Vacant(v) => {
                match budget_amount_cents(conn, *budget_id) {
                    Ok(c) => *v.insert(c),
                    Err(e) => {
                        outcome.errors.push(format!("budget {budget_id}: {e}"));
                        continue;
                    }
                }
            }
        };
        increments.push(WriteOp::IncrementSpent {
            budget_id: *budget_id,
            period_id: period_id.clone(),
            user_id: user_id.to_string(),
            budget_amount_cents: amount_cents,
            delta_cents: *cents,
        });
        budgets.insert(*budget_id);
    }
    for (budget_id, period_id) in &deltas.recompute {
        let amount_cents = match budget_amounts.entry(*budget_id) {
            std::collections::hash_map::Entry::Occupied(e) => *e.get(),
            std::collections::hash_map::Entry::Vacant(v) => {
                match budget_amount_cents(conn, *budget_id) {
                    Ok(c) => *v.insert(c),
                    Err(e) => {
                        outcome.errors.push(format!("budget {budget_id}: {e}"));
                        continue;
                    }
                }
            }
        };
        increments.push(WriteOp::RecomputeBudgetPeriod {
            budget_id: *budget_id,
            period_id: period_id.clone(),
            user_id: user_id.to_string(),
            budget_amount_cents: amount_cents,
        });
        budgets.insert(*budget_id);
    }
    outcome.budget_periods_updated = increments.len();
    outcome.budgets_affected = budgets.len();

    let mut ops = deltas.ops;
    ops.extend(increments);
    outcome.period_types_updated = touched_period_types(conn, &ops);
    let batch = commit_in_chunks(conn, &ops, MAX_OPS_PER_CHUNK);
    outcome.errors.extend(batch.errors);
    outcome.success = outcome.errors.is_empty();

    tracing::debug!(
        user_id,
        group_id = group_id.unwrap_or(""),
        pairs = outcome.budget_periods_updated,
        errors = outcome.errors.len(),
        "reconcile finished"
    );
    outcome
}

/// Count the distinct period types the committed ops actually touched.
fn touched_period_types(conn: &Connection, ops: &[WriteOp]) -> usize {
    let mut source_ids: BTreeSet<&str> = BTreeSet::new();
    let mut outflow_rows: BTreeSet<i64> = BTreeSet::new();
    for op in ops {
        match op {
            WriteOp::IncrementSpent { period_id, .. }
            | WriteOp::RecomputeBudgetPeriod { period_id, .. }
            | WriteOp::DeleteBudgetPeriod { period_id, .. } => {
                source_ids.insert(period_id.as_str());
            }
            WriteOp::PutSplitReference {
                outflow_period_id, ..
            }
            | WriteOp::RecomputeOutflowPeriod { outflow_period_id } => {
                outflow_rows.insert(*outflow_period_id);
            }
            _ => {}
        }
    }
    let mut types: BTreeSet<String> = BTreeSet::new();
    for id in source_ids {
        if let Ok(t) = conn.query_row(
            "SELECT period_type FROM source_periods WHERE id=?1",
            params![id],
            |r| r.get::<_, String>(0),
        ) {
            types.insert(t);
        }
    }
    for id in outflow_rows {
        if let Ok(t) = conn.query_row(
            "SELECT period_type FROM outflow_periods WHERE id=?1",
            params![id],
            |r| r.get::<_, String>(0),
        ) {
            types.insert(t);
        }
    }
    types.len()
}

fn budget_amount_cents(conn: &Connection, budget_id: i64) -> EngineResult<i64> {
    let s: Option<String> = conn
        .query_row(
            "SELECT amount FROM budgets WHERE id=?1",
            params![budget_id],
            |r| r.get(0),
        )
        .optional()?;
    let s = s.ok_or_else(|| EngineError::NotFound(format!("budget {budget_id}")))?;
    let amount = s
        .parse::<Decimal>()
        .map_err(|e| EngineError::Invariant(format!("bad budget amount '{s}': {e}")))?;
    to_cents(amount)
}

#[allow(clippy::too_many_arguments)]
fn reconcile_split(
    conn: &Connection,
    split_id: i64,
    old_split: Option<&Split>,
    new_split: Option<&Split>,
    new_date: Option<chrono::NaiveDate>,
    user_id: &str,
    deltas: &mut DeltaSet,
) -> EngineResult<()> {
    let stored = stored_assignment(conn, split_id)?;

    // Split removed (or whole transaction deleted): reverse whatever the
    // store still reflects, then clear. A redelivery finds the row gone or
    // already cleared and does nothing.
    let Some(new_split) = new_split else {
        if !stored.exists {
            return Ok(());
        }
        if stored.outflow_id.is_some() {
            deltas.ops.extend(outflow::detach_split_ops(conn, split_id)?);
        }
        if let (Some(budget_id), Some(period_id)) = (stored.budget_id, &stored.budget_period_id) {
            let amount = old_split
                .map(|s| s.amount)
                .ok_or_else(|| EngineError::Invariant(format!("split {split_id} has no payload")))?;
            deltas.add(budget_id, period_id, -to_cents(amount)?);
            deltas.ops.push(WriteOp::SetSplitBudget {
                split_id,
                budget_id: None,
                budget_period_id: None,
            });
        }
        return Ok(());
    };

    if !stored.exists {
        return Err(EngineError::NotFound(format!("split {split_id}")));
    }

    // Bill-tracked splits stay off budgets; refresh the mirrored amount if
    // the transaction edit changed it.
    if stored.outflow_id.is_some() {
        let amount_changed = old_split.map(|s| s.amount) != Some(new_split.amount);
        if amount_changed {
            deltas
                .ops
                .extend(outflow::refresh_split_ops(conn, split_id, new_split.amount)?);
        }
        return Ok(());
    }

    let date = new_date.ok_or_else(|| {
        EngineError::Invariant(format!("split {split_id} present without a new document"))
    })?;
    let target = resolver::resolve(conn, new_split.category_id, date, user_id)?;
    let (target_budget, target_period) = match &target {
        resolver::Assignment::Assigned {
            budget_id,
            period_id,
        } => (Some(*budget_id), Some(period_id.clone())),
        resolver::Assignment::Unassigned => (None, None),
    };

    let stored_pair = (stored.budget_id, stored.budget_period_id.clone());
    if stored_pair == (target_budget, target_period.clone()) {
        // Ownership unchanged; only an amount edit moves the aggregate.
        // The stored split row already carries the committed amount, so
        // the pair is recomputed absolutely; a redelivered event lands on
        // the same sum instead of re-applying the difference.
        if let (Some(budget_id), Some(period_id)) = (stored.budget_id, &stored.budget_period_id) {
            let old_amount = old_split.map(|s| s.amount).unwrap_or(new_split.amount);
            if to_cents(new_split.amount)? != to_cents(old_amount)? {
                deltas.recompute.insert((budget_id, period_id.clone()));
            }
        }
        return Ok(());
    }

    // Ownership moved: reverse the stored side, apply the resolved side.
    if let (Some(budget_id), Some(period_id)) = (stored.budget_id, &stored.budget_period_id) {
        let old_amount = old_split.map(|s| s.amount).unwrap_or(new_split.amount);
        deltas.add(budget_id, period_id, -to_cents(old_amount)?);
    }
    if let (Some(budget_id), Some(period_id)) = (target_budget, &target_period) {
        deltas.add(budget_id, period_id, to_cents(new_split.amount)?);
    }
    deltas.ops.push(WriteOp::SetSplitBudget {
        split_id,
        budget_id: target_budget,
        budget_period_id: target_period,
    });
    Ok(())
}
