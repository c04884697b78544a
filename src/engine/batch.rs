// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Chunked atomic commits.
//!
//! Operations are partitioned into fixed-size chunks; each chunk commits
//! as one SQLite transaction (all-or-nothing), but chunks are independent:
//! a later chunk's failure does not roll back an earlier committed chunk.
//! Callers get throughput instead of end-to-end atomicity, and rely on the
//! idempotent recompute paths to repair a partially applied batch.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::engine::{to_cents, with_retries, EngineError, EngineResult};
use crate::models::{OutflowStatus, PaymentType, SplitReference};

/// Hard per-commit limit of the document store.
pub const MAX_OPS_PER_CHUNK: usize = 500;

/// A single store write. Every variant is safe to re-apply: increments are
/// paired with deltas computed once by the caller, everything else writes
/// absolute state.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Commutative signed increment of one budget period's spent counter.
    /// Inserts the row (spent 0, remaining = budget amount) when absent.
    IncrementSpent {
        budget_id: i64,
        period_id: String,
        user_id: String,
        budget_amount_cents: i64,
        delta_cents: i64,
    },
    /// Recompute one budget period's spent counter to the absolute sum of
    /// the splits assigned to it. Re-applying overwrites with the same sum.
    RecomputeBudgetPeriod {
        budget_id: i64,
        period_id: String,
        user_id: String,
        budget_amount_cents: i64,
    },
    /// Drop a budget period row (budget deleted or emptied out).
    DeleteBudgetPeriod { budget_id: i64, period_id: String },
    /// Point a split at a budget period, or clear the assignment.
    SetSplitBudget {
        split_id: i64,
        budget_id: Option<i64>,
        budget_period_id: Option<String>,
    },
    /// Point a split at an outflow, or clear the assignment.
    SetSplitOutflow {
        split_id: i64,
        outflow_id: Option<i64>,
        payment_type: Option<PaymentType>,
    },
    /// Add or replace one mirrored split reference on an outflow period.
    PutSplitReference {
        outflow_period_id: i64,
        reference: SplitReference,
    },
    /// Remove a mirrored split reference everywhere it appears.
    RemoveSplitReference { split_id: i64 },
    /// Recompute one outflow period's paid/unpaid/extra/status from its
    /// reference list. Absolute, so redelivery converges.
    RecomputeOutflowPeriod { outflow_period_id: i64 },
}

impl WriteOp {
    pub fn apply(&self, tx: &Transaction<'_>) -> EngineResult<()> {
        match self {
            WriteOp::IncrementSpent {
                budget_id,
                period_id,
                user_id,
                budget_amount_cents,
                delta_cents,
            } => {
                tx.execute(
                    "INSERT OR IGNORE INTO budget_periods
                         (budget_id, period_id, user_id, spent_cents, remaining_cents)
                     VALUES (?1, ?2, ?3, 0, ?4)",
                    params![budget_id, period_id, user_id, budget_amount_cents],
                )?;
                tx.execute(
                    "UPDATE budget_periods
                     SET spent_cents = spent_cents + ?3,
                         remaining_cents = remaining_cents - ?3
                     WHERE budget_id=?1 AND period_id=?2",
                    params![budget_id, period_id, delta_cents],
                )?;
                Ok(())
            }
            WriteOp::RecomputeBudgetPeriod {
                budget_id,
                period_id,
                user_id,
                budget_amount_cents,
            } => {
                let spent_cents: i64 = tx.query_row(
                    "SELECT COALESCE(SUM(CAST(ROUND(amount * 100) AS INTEGER)), 0)
                     FROM transaction_splits WHERE budget_id=?1 AND budget_period_id=?2",
                    params![budget_id, period_id],
                    |r| r.get(0),
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO budget_periods
                         (budget_id, period_id, user_id, spent_cents, remaining_cents)
                     VALUES (?1, ?2, ?3, 0, ?4)",
                    params![budget_id, period_id, user_id, budget_amount_cents],
                )?;
                tx.execute(
                    "UPDATE budget_periods
                     SET spent_cents=?3, remaining_cents=?4 - ?3
                     WHERE budget_id=?1 AND period_id=?2",
                    params![budget_id, period_id, spent_cents, budget_amount_cents],
                )?;
                Ok(())
            }
            WriteOp::DeleteBudgetPeriod {
                budget_id,
                period_id,
            } => {
                tx.execute(
                    "DELETE FROM budget_periods WHERE budget_id=?1 AND period_id=?2",
                    params![budget_id, period_id],
                )?;
                Ok(())
            }
            WriteOp::SetSplitBudget {
                split_id,
                budget_id,
                budget_period_id,
            } => {
                let n = tx.execute(
                    "UPDATE transaction_splits SET budget_id=?2, budget_period_id=?3
                     WHERE id=?1",
                    params![split_id, budget_id, budget_period_id],
                )?;
                if n == 0 {
                    return Err(EngineError::NotFound(format!("split {split_id}")));
                }
                Ok(())
            }
            WriteOp::SetSplitOutflow {
                split_id,
                outflow_id,
                payment_type,
            } => {
                let n = tx.execute(
                    "UPDATE transaction_splits SET outflow_id=?2, payment_type=?3
                     WHERE id=?1",
                    params![split_id, outflow_id, payment_type.map(|p| p.as_str())],
                )?;
                if n == 0 {
                    return Err(EngineError::NotFound(format!("split {split_id}")));
                }
                Ok(())
            }
            WriteOp::PutSplitReference {
                outflow_period_id,
                reference,
            } => {
                tx.execute(
                    "INSERT INTO outflow_period_splits
                         (outflow_period_id, transaction_id, split_id, amount, payment_type)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(outflow_period_id, split_id) DO UPDATE SET
                         amount=excluded.amount, payment_type=excluded.payment_type",
                    params![
                        outflow_period_id,
                        reference.transaction_id,
                        reference.split_id,
                        reference.amount.to_string(),
                        reference.payment_type.as_str()
                    ],
                )?;
                Ok(())
            }
            WriteOp::RemoveSplitReference { split_id } => {
                tx.execute(
                    "DELETE FROM outflow_period_splits WHERE split_id=?1",
                    params![split_id],
                )?;
                Ok(())
            }
            WriteOp::RecomputeOutflowPeriod { outflow_period_id } => {
                recompute_outflow_period(tx, *outflow_period_id)
            }
        }
    }
}

/// Recompute paid/unpaid/extra-principal/status for one outflow period from
/// its mirrored split references. `amount_paid` is the non-extra-principal
/// sum capped at `amount_due`; overflow past the due amount is tracked as
/// extra principal, never as unpaid.
fn recompute_outflow_period(tx: &Transaction<'_>, outflow_period_id: i64) -> EngineResult<()> {
    let due_cents: Option<i64> = tx
        .query_row(
            "SELECT amount_due_cents FROM outflow_periods WHERE id=?1",
            params![outflow_period_id],
            |r| r.get(0),
        )
        .optional()?;
    let due_cents =
        due_cents.ok_or_else(|| EngineError::NotFound(format!("outflow period {outflow_period_id}")))?;

    let mut stmt =
        tx.prepare("SELECT amount, payment_type FROM outflow_period_splits WHERE outflow_period_id=?1")?;
    let mut rows = stmt.query(params![outflow_period_id])?;
    let mut regular_cents = 0i64;
    let mut extra_cents = 0i64;
    while let Some(r) = rows.next()? {
        let amount_s: String = r.get(0)?;
        let ptype_s: String = r.get(1)?;
        let amount = amount_s.parse::<Decimal>().map_err(|e| {
            EngineError::Invariant(format!("bad split reference amount '{amount_s}': {e}"))
        })?;
        let cents = to_cents(amount)?;
        match PaymentType::parse(&ptype_s) {
            Some(PaymentType::ExtraPrincipal) => extra_cents += cents,
            Some(_) => regular_cents += cents,
            None => {
                return Err(EngineError::Invariant(format!(
                    "bad payment type '{ptype_s}' on outflow period {outflow_period_id}"
                )))
            }
        }
    }

    let paid_cents = regular_cents.min(due_cents);
    let overflow = (regular_cents - due_cents).max(0);
    let unpaid_cents = due_cents - paid_cents;
    let status = if due_cents > 0 && paid_cents >= due_cents {
        OutflowStatus::Paid
    } else if paid_cents > 0 {
        OutflowStatus::PartiallyPaid
    } else {
        OutflowStatus::Pending
    };

    tx.execute(
        "UPDATE outflow_periods
         SET amount_paid_cents=?2, amount_unpaid_cents=?3, extra_principal_cents=?4, status=?5
         WHERE id=?1",
        params![
            outflow_period_id,
            paid_cents,
            unpaid_cents,
            extra_cents + overflow,
            status.as_str()
        ],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub chunks_committed: usize,
    pub total_ops: usize,
    pub errors: Vec<String>,
}

impl BatchOutcome {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Commit `ops` in chunks of at most `max_ops_per_chunk`. Each chunk is one
/// transaction; a failed chunk is recorded and skipped, later chunks still
/// commit. Transient busy errors are retried with backoff before a chunk is
/// declared failed.
pub fn commit_in_chunks(
    conn: &mut Connection,
    ops: &[WriteOp],
    max_ops_per_chunk: usize,
) -> BatchOutcome {
    let mut outcome = BatchOutcome {
        total_ops: ops.len(),
        ..Default::default()
    };
    for (i, chunk) in ops.chunks(max_ops_per_chunk.max(1)).enumerate() {
        let result = with_retries("batch chunk", || {
            let tx = conn.transaction()?;
            for op in chunk {
                op.apply(&tx)?;
            }
            tx.commit()?;
            Ok(())
        });
        match result {
            Ok(()) => outcome.chunks_committed += 1,
            Err(e) => {
                tracing::error!(chunk = i, ops = chunk.len(), "batch chunk failed: {e}");
                outcome.errors.push(format!("chunk {i}: {e}"));
            }
        }
    }
    outcome
}
