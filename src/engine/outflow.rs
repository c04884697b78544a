// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Outflow (recurring bill) period matching.
//!
//! One logical bill payment is mirrored into the monthly, weekly and
//! bi-monthly OutflowPeriod rows as a single atomic write-set, so no
//! partially-mirrored state is ever observable. Auto-detect mode places a
//! split by its transaction date; manual mode targets a named period for
//! advance payments.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::engine::batch::{commit_in_chunks, WriteOp, MAX_OPS_PER_CHUNK};
use crate::engine::{from_cents, periods, to_cents, EngineError, EngineResult};
use crate::models::{
    Outflow, OutflowPeriod, OutflowStatus, PaymentType, PeriodType, Split, SplitReference,
};

#[derive(Debug, Clone, Serialize)]
pub struct OutflowAssignment {
    pub success: bool,
    pub split: Split,
    pub monthly_period: OutflowPeriod,
    pub weekly_period: OutflowPeriod,
    pub bi_monthly_period: OutflowPeriod,
    pub periods_updated: usize,
    pub errors: Vec<String>,
}

fn load_split(conn: &Connection, split_id: i64) -> EngineResult<Split> {
    let row = conn
        .query_row(
            "SELECT id, transaction_id, amount, category_id, budget_id, budget_period_id,
                    outflow_id, payment_type
             FROM transaction_splits WHERE id=?1",
            params![split_id],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<i64>>(3)?,
                    r.get::<_, Option<i64>>(4)?,
                    r.get::<_, Option<String>>(5)?,
                    r.get::<_, Option<i64>>(6)?,
                    r.get::<_, Option<String>>(7)?,
                ))
            },
        )
        .optional()?;
    let (id, transaction_id, amount_s, category_id, budget_id, budget_period_id, outflow_id, pt) =
        row.ok_or_else(|| EngineError::NotFound(format!("split {split_id}")))?;
    let amount = amount_s
        .parse::<Decimal>()
        .map_err(|e| EngineError::Invariant(format!("bad split amount '{amount_s}': {e}")))?;
    let payment_type = match pt {
        Some(s) => Some(
            PaymentType::parse(&s)
                .ok_or_else(|| EngineError::Invariant(format!("bad payment type '{s}'")))?,
        ),
        None => None,
    };
    Ok(Split {
        id,
        transaction_id,
        amount,
        category_id,
        budget_id,
        budget_period_id,
        outflow_id,
        payment_type,
    })
}

fn load_outflow(conn: &Connection, outflow_id: i64) -> EngineResult<Outflow> {
    let row = conn
        .query_row(
            "SELECT id, user_id, name, amount_due, due_date, category_id
             FROM outflows WHERE id=?1",
            params![outflow_id],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, Option<i64>>(5)?,
                ))
            },
        )
        .optional()?;
    let (id, user_id, name, due_s, date_s, category_id) =
        row.ok_or_else(|| EngineError::NotFound(format!("outflow {outflow_id}")))?;
    let amount_due = due_s
        .parse::<Decimal>()
        .map_err(|e| EngineError::Invariant(format!("bad amount due '{due_s}': {e}")))?;
    let due_date = NaiveDate::parse_from_str(&date_s, "%Y-%m-%d")
        .map_err(|e| EngineError::Invariant(format!("bad due date '{date_s}': {e}")))?;
    Ok(Outflow {
        id,
        user_id,
        name,
        amount_due,
        due_date,
        category_id,
    })
}

/// Ensure the OutflowPeriod row for (outflow, period) exists and return its
/// rowid. `is_due_period` is true for exactly the period whose range
/// contains the bill's due date.
fn ensure_outflow_period(
    conn: &Connection,
    outflow: &Outflow,
    period_type: PeriodType,
    anchor: NaiveDate,
) -> EngineResult<i64> {
    let period = periods::ensure_period_for(conn, period_type, anchor)?;
    let due_cents = to_cents(outflow.amount_due)?;
    conn.execute(
        "INSERT OR IGNORE INTO outflow_periods
             (outflow_id, period_id, period_type, amount_due_cents, amount_unpaid_cents, is_due_period)
         VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
        params![
            outflow.id,
            period.id,
            period_type.as_str(),
            due_cents,
            period.contains(outflow.due_date) as i64
        ],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM outflow_periods WHERE outflow_id=?1 AND period_id=?2",
        params![outflow.id, period.id],
        |r| r.get(0),
    )?;
    Ok(id)
}

fn load_outflow_period(conn: &Connection, id: i64) -> EngineResult<OutflowPeriod> {
    let row = conn
        .query_row(
            "SELECT id, outflow_id, period_id, period_type, amount_due_cents, amount_paid_cents,
                    amount_unpaid_cents, extra_principal_cents, status, is_due_period
             FROM outflow_periods WHERE id=?1",
            params![id],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i64>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, i64>(6)?,
                    r.get::<_, i64>(7)?,
                    r.get::<_, String>(8)?,
                    r.get::<_, i64>(9)?,
                ))
            },
        )
        .optional()?;
    let (id, outflow_id, period_id, type_s, due, paid, unpaid, extra, status_s, is_due) =
        row.ok_or_else(|| EngineError::NotFound(format!("outflow period {id}")))?;
    Ok(OutflowPeriod {
        id,
        outflow_id,
        period_id,
        period_type: PeriodType::parse(&type_s)
            .ok_or_else(|| EngineError::Invariant(format!("bad period type '{type_s}'")))?,
        amount_due: from_cents(due),
        amount_paid: from_cents(paid),
        amount_unpaid: from_cents(unpaid),
        extra_principal: from_cents(extra),
        status: OutflowStatus::parse(&status_s)
            .ok_or_else(|| EngineError::Invariant(format!("bad status '{status_s}'")))?,
        is_due_period: is_due != 0,
    })
}

/// Assign a split to an outflow, mirroring it into all three period
/// granularities at once.
///
/// Auto mode places each mirror in the period containing the transaction
/// date. With `target_period_id` (advance payments) every mirror follows
/// the target period's start date instead. A split already on a different
/// outflow is rejected; a budget-assigned split is detached from its
/// budget first, preserving budget/outflow exclusivity.
pub fn assign_split(
    conn: &mut Connection,
    transaction_id: i64,
    split_id: i64,
    outflow_id: i64,
    payment_type: PaymentType,
    target_period_id: Option<&str>,
) -> EngineResult<OutflowAssignment> {
    let split = load_split(conn, split_id)?;
    if split.transaction_id != transaction_id {
        return Err(EngineError::Validation(format!(
            "split {split_id} does not belong to transaction {transaction_id}"
        )));
    }
    if let Some(existing) = split.outflow_id {
        if existing != outflow_id {
            return Err(EngineError::Validation(format!(
                "split {split_id} is already assigned to outflow {existing}"
            )));
        }
    }
    let outflow = load_outflow(conn, outflow_id)?;

    let txn_date_s: String = conn.query_row(
        "SELECT date FROM transactions WHERE id=?1",
        params![transaction_id],
        |r| r.get(0),
    )?;
    let txn_date = NaiveDate::parse_from_str(&txn_date_s, "%Y-%m-%d")
        .map_err(|e| EngineError::Invariant(format!("bad transaction date '{txn_date_s}': {e}")))?;

    let anchor = match target_period_id {
        Some(id) => periods::period_by_id(conn, id)?.start_date,
        None => txn_date,
    };

    let mut ops: Vec<WriteOp> = Vec::new();

    // Exclusivity: leaving a budget reverses its contribution there.
    if let (Some(budget_id), Some(period_id)) = (split.budget_id, split.budget_period_id.clone()) {
        let amount_s: String = conn.query_row(
            "SELECT amount FROM budgets WHERE id=?1",
            params![budget_id],
            |r| r.get(0),
        )?;
        let budget_amount = amount_s
            .parse::<Decimal>()
            .map_err(|e| EngineError::Invariant(format!("bad budget amount '{amount_s}': {e}")))?;
        ops.push(WriteOp::IncrementSpent {
            budget_id,
            period_id,
            user_id: outflow.user_id.clone(),
            budget_amount_cents: to_cents(budget_amount)?,
            delta_cents: -to_cents(split.amount)?,
        });
    }
    ops.push(WriteOp::SetSplitBudget {
        split_id,
        budget_id: None,
        budget_period_id: None,
    });
    ops.push(WriteOp::SetSplitOutflow {
        split_id,
        outflow_id: Some(outflow_id),
        payment_type: Some(payment_type),
    });

    let reference = SplitReference {
        transaction_id,
        split_id,
        amount: split.amount,
        payment_type,
    };
    let mut period_row_ids = Vec::with_capacity(3);
    for period_type in PeriodType::mirrored() {
        let row_id = ensure_outflow_period(conn, &outflow, period_type, anchor)?;
        ops.push(WriteOp::PutSplitReference {
            outflow_period_id: row_id,
            reference: reference.clone(),
        });
        ops.push(WriteOp::RecomputeOutflowPeriod {
            outflow_period_id: row_id,
        });
        period_row_ids.push(row_id);
    }

    // One chunk: the three mirrors commit or fail together.
    let batch = commit_in_chunks(conn, &ops, MAX_OPS_PER_CHUNK);
    if !batch.success() {
        return Err(EngineError::Invariant(format!(
            "outflow assignment did not commit: {}",
            batch.errors.join("; ")
        )));
    }

    Ok(OutflowAssignment {
        success: true,
        split: load_split(conn, split_id)?,
        monthly_period: load_outflow_period(conn, period_row_ids[0])?,
        weekly_period: load_outflow_period(conn, period_row_ids[1])?,
        bi_monthly_period: load_outflow_period(conn, period_row_ids[2])?,
        periods_updated: 3,
        errors: Vec::new(),
    })
}

/// Ops that take a split off its outflow everywhere it is mirrored.
/// Used by reconciliation when a split is deleted or its amount changes.
pub fn detach_split_ops(conn: &Connection, split_id: i64) -> EngineResult<Vec<WriteOp>> {
    let mut stmt =
        conn.prepare("SELECT outflow_period_id FROM outflow_period_splits WHERE split_id=?1")?;
    let period_ids: Vec<i64> = stmt
        .query_map(params![split_id], |r| r.get(0))?
        .collect::<Result<_, _>>()?;
    let mut ops = vec![WriteOp::RemoveSplitReference { split_id }];
    for outflow_period_id in period_ids {
        ops.push(WriteOp::RecomputeOutflowPeriod { outflow_period_id });
    }
    ops.push(WriteOp::SetSplitOutflow {
        split_id,
        outflow_id: None,
        payment_type: None,
    });
    Ok(ops)
}

/// Refresh the mirrored amount of a still-assigned split after its
/// transaction was edited, then recompute the touched periods.
pub fn refresh_split_ops(
    conn: &Connection,
    split_id: i64,
    amount: Decimal,
) -> EngineResult<Vec<WriteOp>> {
    let mut stmt = conn.prepare(
        "SELECT outflow_period_id, transaction_id, payment_type
         FROM outflow_period_splits WHERE split_id=?1",
    )?;
    let rows: Vec<(i64, i64, String)> = stmt
        .query_map(params![split_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })?
        .collect::<Result<_, _>>()?;
    let mut ops = Vec::new();
    for (outflow_period_id, transaction_id, ptype_s) in rows {
        let payment_type = PaymentType::parse(&ptype_s)
            .ok_or_else(|| EngineError::Invariant(format!("bad payment type '{ptype_s}'")))?;
        ops.push(WriteOp::PutSplitReference {
            outflow_period_id,
            reference: SplitReference {
                transaction_id,
                split_id,
                amount,
                payment_type,
            },
        });
        ops.push(WriteOp::RecomputeOutflowPeriod { outflow_period_id });
    }
    Ok(ops)
}

/// Seed the three due-period rows for a newly created outflow.
pub fn seed_due_periods(conn: &Connection, outflow_id: i64) -> EngineResult<usize> {
    let outflow = load_outflow(conn, outflow_id)?;
    let mut created = 0;
    for period_type in PeriodType::mirrored() {
        ensure_outflow_period(conn, &outflow, period_type, outflow.due_date)?;
        created += 1;
    }
    Ok(created)
}
