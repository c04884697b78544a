// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Event dispatch: before/after document pairs from the trigger layer.
//!
//! Delivery is at-least-once and not globally ordered, so every handler
//! is safe to re-run. Handlers report failures in the outcome instead of
//! propagating them; the source mutation that raised the event has
//! already succeeded and must stay succeeded.

use rusqlite::Connection;
use serde::Serialize;

use crate::engine::reconcile::{reconcile, ReconcileOutcome};
use crate::engine::resolver::{self, ReassignStats};
use crate::engine::{outflow, EngineResult};
use crate::models::{Budget, Outflow, TransactionDoc};

#[derive(Debug, Clone)]
pub enum Event {
    TransactionCreated(TransactionDoc),
    TransactionUpdated {
        before: TransactionDoc,
        after: TransactionDoc,
    },
    TransactionDeleted(TransactionDoc),
    BudgetCreated(Budget),
    BudgetUpdated {
        before: Budget,
        after: Budget,
    },
    BudgetDeleted(Budget),
    OutflowCreated(Outflow),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub reconcile: Option<ReconcileOutcome>,
    pub reassign: Option<ReassignStats>,
    pub periods_seeded: usize,
    pub errors: Vec<String>,
}

impl DispatchOutcome {
    fn from_reconcile(r: ReconcileOutcome) -> Self {
        DispatchOutcome {
            success: r.success,
            errors: r.errors.clone(),
            reconcile: Some(r),
            ..Default::default()
        }
    }

    fn from_reassign(r: EngineResult<ReassignStats>) -> Self {
        match r {
            Ok(stats) => DispatchOutcome {
                success: stats.success,
                errors: stats.errors.clone(),
                reassign: Some(stats),
                ..Default::default()
            },
            Err(e) => {
                tracing::error!("reassignment failed: {e}");
                DispatchOutcome {
                    success: false,
                    errors: vec![e.to_string()],
                    ..Default::default()
                }
            }
        }
    }
}

pub fn dispatch(conn: &mut Connection, event: Event) -> DispatchOutcome {
    match event {
        Event::TransactionCreated(doc) => on_transaction_written(conn, None, Some(&doc)),
        Event::TransactionUpdated { before, after } => {
            on_transaction_written(conn, Some(&before), Some(&after))
        }
        Event::TransactionDeleted(doc) => on_transaction_written(conn, Some(&doc), None),
        Event::BudgetCreated(budget) => on_budget_created(conn, &budget),
        Event::BudgetUpdated { before, after } => on_budget_updated(conn, &before, &after),
        Event::BudgetDeleted(budget) => {
            DispatchOutcome::from_reassign(resolver::reassign_from_deleted_budget(
                conn,
                budget.id,
                &budget.user_id,
            ))
        }
        Event::OutflowCreated(outflow_doc) => on_outflow_created(conn, &outflow_doc),
    }
}

fn on_transaction_written(
    conn: &mut Connection,
    before: Option<&TransactionDoc>,
    after: Option<&TransactionDoc>,
) -> DispatchOutcome {
    let doc = after.or(before).expect("event carries a document");
    let user_id = doc.transaction.user_id.clone();
    let group_id = doc.transaction.group_id.clone();
    let outcome = reconcile(conn, before, after, &user_id, group_id.as_deref());
    if !outcome.errors.is_empty() {
        // Aggregates may be stale; the rebuild path repairs them later.
        tracing::error!(
            user_id,
            errors = outcome.errors.len(),
            "reconciliation left stale aggregates"
        );
    }
    DispatchOutcome::from_reconcile(outcome)
}

fn on_budget_created(conn: &mut Connection, budget: &Budget) -> DispatchOutcome {
    // A new budget can only pick up splits that nothing else owns; splits
    // held by other budgets stay put until those budgets change.
    DispatchOutcome::from_reassign(resolver::pick_up_unassigned(conn, &budget.user_id))
}

fn on_budget_updated(conn: &mut Connection, before: &Budget, after: &Budget) -> DispatchOutcome {
    let added: Vec<i64> = after
        .category_ids
        .iter()
        .filter(|c| !before.category_ids.contains(c))
        .copied()
        .collect();
    let removed: Vec<i64> = before
        .category_ids
        .iter()
        .filter(|c| !after.category_ids.contains(c))
        .copied()
        .collect();
    // Window or activation changes can orphan splits the same way a
    // category removal can; they request the same full re-resolution.
    let structural = before.start_date != after.start_date
        || before.end_date != after.end_date
        || before.is_active != after.is_active;
    DispatchOutcome::from_reassign(resolver::reassign_for_category_change(
        conn,
        after.id,
        &after.user_id,
        &added,
        &removed,
        structural,
    ))
}

fn on_outflow_created(conn: &mut Connection, outflow_doc: &Outflow) -> DispatchOutcome {
    match outflow::seed_due_periods(conn, outflow_doc.id) {
        Ok(n) => DispatchOutcome {
            success: true,
            periods_seeded: n,
            ..Default::default()
        },
        Err(e) => {
            tracing::error!(outflow_id = outflow_doc.id, "seeding due periods failed: {e}");
            DispatchOutcome {
                success: false,
                errors: vec![e.to_string()],
                ..Default::default()
            }
        }
    }
}
