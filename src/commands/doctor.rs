// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Invariant checks over the stored aggregates. Everything here is
//! read-only; repairs go through `budget recalc` and `summary rebuild`.

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::engine::to_cents;
use crate::models::PeriodType;
use crate::utils::{maybe_print_json, parse_decimal, pretty_table};

#[derive(Debug, Serialize)]
pub struct Issue {
    pub check: &'static str,
    pub subject: String,
    pub detail: String,
}

pub fn handle(conn: &Connection, m: &ArgMatches) -> Result<()> {
    let year: Option<i32> = match m.get_one::<String>("year") {
        Some(s) => Some(s.parse().context("Invalid year")?),
        None => None,
    };

    let mut issues = Vec::new();
    check_partition(conn, year, &mut issues)?;
    check_budget_conservation(conn, &mut issues)?;
    check_outflow_sums(conn, &mut issues)?;
    check_split_assignments(conn, &mut issues)?;

    if maybe_print_json(m.get_flag("json"), m.get_flag("jsonl"), &issues)? {
        if !issues.is_empty() {
            bail!("{} invariant violations", issues.len());
        }
        return Ok(());
    }
    if issues.is_empty() {
        println!("No issues found");
        return Ok(());
    }
    let rows = issues
        .iter()
        .map(|i| vec![i.check.to_string(), i.subject.clone(), i.detail.clone()])
        .collect();
    println!("{}", pretty_table(&["Check", "Subject", "Detail"], rows));
    bail!("{} invariant violations", issues.len());
}

/// Adjacent stored periods of one type must tile without gap or overlap.
fn check_partition(conn: &Connection, year: Option<i32>, issues: &mut Vec<Issue>) -> Result<()> {
    for period_type in [
        PeriodType::Weekly,
        PeriodType::BiMonthly,
        PeriodType::Monthly,
        PeriodType::Annual,
    ] {
        let mut stmt = conn.prepare(
            "SELECT id, start_date, end_date FROM source_periods
             WHERE period_type=?1 ORDER BY start_date",
        )?;
        let rows: Vec<(String, String, String)> = stmt
            .query_map(params![period_type.as_str()], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })?
            .collect::<Result<_, _>>()?;
        let rows: Vec<_> = match year {
            Some(y) => {
                let prefix = format!("{y}-");
                rows.into_iter()
                    .filter(|(_, s, _)| s.starts_with(&prefix))
                    .collect()
            }
            None => rows,
        };
        for pair in rows.windows(2) {
            let (prev_id, _, prev_end) = &pair[0];
            let (next_id, next_start, _) = &pair[1];
            if prev_end != next_start {
                let kind = if prev_end < next_start { "gap" } else { "overlap" };
                issues.push(Issue {
                    check: "period-partition",
                    subject: format!("{prev_id} / {next_id}"),
                    detail: format!("{kind}: {prev_end} vs {next_start}"),
                });
            }
        }
    }
    Ok(())
}

/// Every budget period's spent counter must equal the sum of the splits
/// assigned to it, and remaining must be the budget amount minus spent.
fn check_budget_conservation(conn: &Connection, issues: &mut Vec<Issue>) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT bp.budget_id, bp.period_id, bp.spent_cents, bp.remaining_cents, b.amount,
                COALESCE((SELECT SUM(CAST(ROUND(s.amount * 100) AS INTEGER))
                          FROM transaction_splits s
                          WHERE s.budget_id=bp.budget_id AND s.budget_period_id=bp.period_id), 0)
         FROM budget_periods bp JOIN budgets b ON bp.budget_id=b.id",
    )?;
    let rows: Vec<(i64, String, i64, i64, String, i64)> = stmt
        .query_map([], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
            ))
        })?
        .collect::<Result<_, _>>()?;
    for (budget_id, period_id, spent, remaining, amount_s, split_sum) in rows {
        let subject = format!("budget {budget_id} period {period_id}");
        if spent != split_sum {
            issues.push(Issue {
                check: "budget-conservation",
                subject: subject.clone(),
                detail: format!("spent_cents {spent} != split sum {split_sum}"),
            });
        }
        let amount_cents = to_cents(parse_decimal(&amount_s)?)?;
        if spent + remaining != amount_cents {
            issues.push(Issue {
                check: "budget-remaining",
                subject,
                detail: format!(
                    "spent {spent} + remaining {remaining} != budget amount {amount_cents}"
                ),
            });
        }
    }
    Ok(())
}

/// paid + unpaid must equal due in every outflow period, and the status
/// must agree with the paid amount.
fn check_outflow_sums(conn: &Connection, issues: &mut Vec<Issue>) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, outflow_id, period_id, amount_due_cents, amount_paid_cents,
                amount_unpaid_cents, status
         FROM outflow_periods",
    )?;
    let rows: Vec<(i64, i64, String, i64, i64, i64, String)> = stmt
        .query_map([], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
            ))
        })?
        .collect::<Result<_, _>>()?;
    for (_, outflow_id, period_id, due, paid, unpaid, status) in rows {
        let subject = format!("outflow {outflow_id} period {period_id}");
        if paid + unpaid != due {
            issues.push(Issue {
                check: "outflow-conservation",
                subject: subject.clone(),
                detail: format!("paid {paid} + unpaid {unpaid} != due {due}"),
            });
        }
        let expected = if due > 0 && paid >= due {
            "PAID"
        } else if paid > 0 {
            "PARTIALLY_PAID"
        } else {
            "PENDING"
        };
        if status != expected {
            issues.push(Issue {
                check: "outflow-status",
                subject,
                detail: format!("status {status}, expected {expected} for paid {paid} of {due}"),
            });
        }
    }
    Ok(())
}

/// A split is on a budget or an outflow, never both, and a budget
/// assignment always names the period it was counted in.
fn check_split_assignments(conn: &Connection, issues: &mut Vec<Issue>) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id FROM transaction_splits
         WHERE budget_id IS NOT NULL AND outflow_id IS NOT NULL",
    )?;
    let both: Vec<i64> = stmt
        .query_map([], |r| r.get(0))?
        .collect::<Result<_, _>>()?;
    for id in both {
        issues.push(Issue {
            check: "split-exclusivity",
            subject: format!("split {id}"),
            detail: "assigned to both a budget and an outflow".to_string(),
        });
    }

    let mut stmt = conn.prepare(
        "SELECT id FROM transaction_splits
         WHERE (budget_id IS NULL) != (budget_period_id IS NULL)",
    )?;
    let half: Vec<i64> = stmt
        .query_map([], |r| r.get(0))?
        .collect::<Result<_, _>>()?;
    for id in half {
        issues.push(Issue {
            check: "split-period",
            subject: format!("split {id}"),
            detail: "budget assignment without a period, or the reverse".to_string(),
        });
    }

    let mut stmt = conn.prepare(
        "SELECT s.id, s.budget_id FROM transaction_splits s
         LEFT JOIN budgets b ON s.budget_id=b.id
         WHERE s.budget_id IS NOT NULL AND b.id IS NULL",
    )?;
    let dangling: Vec<(i64, i64)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;
    for (id, budget_id) in dangling {
        issues.push(Issue {
            check: "split-dangling",
            subject: format!("split {id}"),
            detail: format!("references deleted budget {budget_id}"),
        });
    }
    Ok(())
}
