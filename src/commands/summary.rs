// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{bail, Result};
use clap::ArgMatches;
use rusqlite::{params, Connection};

use crate::engine::summary::{rebuild_group_periods, rebuild_user_summaries};
use crate::engine::from_cents;
use crate::models::{GroupPeriod, UserSummary};
use crate::utils::{get_default_user, maybe_print_json, pretty_table};

pub fn handle(conn: &mut Connection, m: &ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("rebuild", sm)) => rebuild(conn, sm),
        Some(("show", sm)) => show(conn, sm),
        _ => bail!("Unknown summary subcommand"),
    }
}

fn rebuild(conn: &mut Connection, sm: &ArgMatches) -> Result<()> {
    #[derive(serde::Serialize)]
    struct RebuildResult {
        user_rows: usize,
        group_rows: usize,
    }
    let mut result = RebuildResult {
        user_rows: 0,
        group_rows: 0,
    };
    if let Some(group) = sm.get_one::<String>("group") {
        result.group_rows = rebuild_group_periods(conn, group)?;
    } else {
        let user = match sm.get_one::<String>("user") {
            Some(u) => u.clone(),
            None => get_default_user(conn)?,
        };
        result.user_rows = rebuild_user_summaries(conn, &user)?;
    }
    if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &result)? {
        return Ok(());
    }
    println!(
        "Rebuilt {} user summary rows, {} group period rows",
        result.user_rows, result.group_rows
    );
    Ok(())
}

fn show(conn: &Connection, sm: &ArgMatches) -> Result<()> {
    if let Some(group) = sm.get_one::<String>("group") {
        return show_group(conn, sm, group);
    }
    let user = match sm.get_one::<String>("user") {
        Some(u) => u.clone(),
        None => get_default_user(conn)?,
    };
    let mut stmt = conn.prepare(
        "SELECT user_id, period_id, spent_cents, budgeted_cents, due_cents, paid_cents, unpaid_cents
         FROM user_summaries WHERE user_id=?1 ORDER BY period_id",
    )?;
    let summaries: Vec<UserSummary> = stmt
        .query_map(params![user], |r| {
            Ok(UserSummary {
                user_id: r.get(0)?,
                period_id: r.get(1)?,
                spent: from_cents(r.get(2)?),
                budgeted: from_cents(r.get(3)?),
                due: from_cents(r.get(4)?),
                paid: from_cents(r.get(5)?),
                unpaid: from_cents(r.get(6)?),
            })
        })?
        .collect::<Result<_, _>>()?;
    if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &summaries)? {
        return Ok(());
    }
    let rows = summaries
        .iter()
        .map(|s| {
            vec![
                s.period_id.clone(),
                s.spent.to_string(),
                s.budgeted.to_string(),
                s.due.to_string(),
                s.paid.to_string(),
                s.unpaid.to_string(),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(
            &["Period", "Spent", "Budgeted", "Due", "Paid", "Unpaid"],
            rows
        )
    );
    Ok(())
}

fn show_group(conn: &Connection, sm: &ArgMatches, group: &str) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT group_id, period_id, total_spent_cents, total_budgeted_cents,
                total_due_cents, total_paid_cents
         FROM group_periods WHERE group_id=?1 ORDER BY period_id",
    )?;
    let periods: Vec<GroupPeriod> = stmt
        .query_map(params![group], |r| {
            Ok(GroupPeriod {
                group_id: r.get(0)?,
                period_id: r.get(1)?,
                total_spent: from_cents(r.get(2)?),
                total_budgeted: from_cents(r.get(3)?),
                total_due: from_cents(r.get(4)?),
                total_paid: from_cents(r.get(5)?),
            })
        })?
        .collect::<Result<_, _>>()?;
    if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &periods)? {
        return Ok(());
    }
    let rows = periods
        .iter()
        .map(|p| {
            vec![
                p.period_id.clone(),
                p.total_spent.to_string(),
                p.total_budgeted.to_string(),
                p.total_due.to_string(),
                p.total_paid.to_string(),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(&["Period", "Spent", "Budgeted", "Due", "Paid"], rows)
    );
    Ok(())
}
