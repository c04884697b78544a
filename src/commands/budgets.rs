// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use rusqlite::{params, Connection, OptionalExtension};

use crate::engine::events::{dispatch, Event};
use crate::engine::resolver;
use crate::models::Budget;
use crate::utils::{
    get_default_user, id_for_budget, id_for_category, maybe_print_json, parse_date, parse_decimal,
    pretty_table,
};

pub fn handle(conn: &mut Connection, m: &ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sm)) => add(conn, sm),
        Some(("list", sm)) => list(conn, sm),
        Some(("set-categories", sm)) => set_categories(conn, sm),
        Some(("delete", sm)) => delete(conn, sm),
        Some(("recalc", sm)) => recalc(conn, sm),
        _ => bail!("Unknown budget subcommand"),
    }
}

fn user_arg(conn: &Connection, sm: &ArgMatches) -> Result<String> {
    match sm.get_one::<String>("user") {
        Some(u) => Ok(u.clone()),
        None => get_default_user(conn),
    }
}

fn add(conn: &mut Connection, sm: &ArgMatches) -> Result<()> {
    let user = user_arg(conn, sm)?;
    let name = sm.get_one::<String>("name").unwrap();
    let amount = parse_decimal(sm.get_one::<String>("amount").unwrap())?;
    let start = parse_date(sm.get_one::<String>("start").unwrap())?;
    let end = match sm.get_one::<String>("end") {
        Some(s) => Some(parse_date(s)?),
        None => None,
    };
    let category_ids: Vec<i64> = match sm.get_many::<String>("category") {
        Some(vals) => vals
            .map(|c| id_for_category(conn, c))
            .collect::<Result<_>>()?,
        None => Vec::new(),
    };

    let budget_id = {
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO budgets(user_id, name, amount, start_date, end_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user,
                name,
                amount.to_string(),
                start.to_string(),
                end.map(|d| d.to_string())
            ],
        )
        .with_context(|| format!("Failed to add budget '{}'", name))?;
        let budget_id = tx.last_insert_rowid();
        for cid in &category_ids {
            tx.execute(
                "INSERT INTO budget_categories(budget_id, category_id) VALUES (?1, ?2)",
                params![budget_id, cid],
            )?;
        }
        tx.commit()?;
        budget_id
    };

    // Every user gets the system fallback budget alongside their first one.
    resolver::ensure_everything_else(conn, &user)?;

    let budget = load_budget(conn, budget_id)?;
    let outcome = dispatch(conn, Event::BudgetCreated(budget));
    if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &outcome)? {
        return Ok(());
    }
    println!("Added budget '{}' (id {})", name, budget_id);
    Ok(())
}

fn list(conn: &Connection, sm: &ArgMatches) -> Result<()> {
    let user = user_arg(conn, sm)?;
    let mut stmt = conn.prepare(
        "SELECT id FROM budgets WHERE user_id=?1 ORDER BY created_at, id",
    )?;
    let ids: Vec<i64> = stmt
        .query_map(params![user], |r| r.get(0))?
        .collect::<Result<_, _>>()?;
    let mut budgets = Vec::with_capacity(ids.len());
    for id in ids {
        budgets.push(load_budget(conn, id)?);
    }
    if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &budgets)? {
        return Ok(());
    }
    let rows = budgets
        .iter()
        .map(|b| {
            let kind = if b.is_everything_else {
                "fallback"
            } else if b.category_ids.is_empty() {
                "catch-all"
            } else {
                "specific"
            };
            vec![
                b.id.to_string(),
                b.name.clone(),
                b.amount.to_string(),
                b.start_date.to_string(),
                b.end_date.map(|d| d.to_string()).unwrap_or_default(),
                kind.to_string(),
                b.category_ids.len().to_string(),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(
            &["ID", "Name", "Amount", "Start", "End", "Kind", "Categories"],
            rows
        )
    );
    Ok(())
}

fn set_categories(conn: &mut Connection, sm: &ArgMatches) -> Result<()> {
    let user = user_arg(conn, sm)?;
    let name = sm.get_one::<String>("name").unwrap();
    let budget_id = id_for_budget(conn, &user, name)?;
    let before = load_budget(conn, budget_id)?;
    if before.is_everything_else {
        bail!("The fallback budget matches everything; it has no category set");
    }

    let category_ids: Vec<i64> = match sm.get_many::<String>("category") {
        Some(vals) => vals
            .map(|c| id_for_category(conn, c))
            .collect::<Result<_>>()?,
        None => Vec::new(),
    };
    {
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM budget_categories WHERE budget_id=?1",
            params![budget_id],
        )?;
        for cid in &category_ids {
            tx.execute(
                "INSERT INTO budget_categories(budget_id, category_id) VALUES (?1, ?2)",
                params![budget_id, cid],
            )?;
        }
        tx.commit()?;
    }

    let after = load_budget(conn, budget_id)?;
    let outcome = dispatch(conn, Event::BudgetUpdated { before, after });
    if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &outcome)? {
        return Ok(());
    }
    match &outcome.reassign {
        Some(r) => println!(
            "Updated categories for '{}': {} splits reassigned, {} unassigned",
            name, r.splits_reassigned, r.splits_unassigned
        ),
        None => println!("Updated categories for '{}'", name),
    }
    Ok(())
}

fn delete(conn: &mut Connection, sm: &ArgMatches) -> Result<()> {
    let user = user_arg(conn, sm)?;
    let name = sm.get_one::<String>("name").unwrap();
    let budget_id = id_for_budget(conn, &user, name)?;
    let budget = load_budget(conn, budget_id)?;
    if budget.is_everything_else {
        bail!("The fallback budget cannot be deleted");
    }

    conn.execute("DELETE FROM budgets WHERE id=?1", params![budget_id])?;
    // Splits still pointing at the deleted budget are re-resolved now.
    let outcome = dispatch(conn, Event::BudgetDeleted(budget));
    if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &outcome)? {
        return Ok(());
    }
    match &outcome.reassign {
        Some(r) => println!(
            "Deleted budget '{}': {} splits reassigned, {} unassigned",
            name, r.splits_reassigned, r.splits_unassigned
        ),
        None => println!("Deleted budget '{}'", name),
    }
    Ok(())
}

fn recalc(conn: &mut Connection, sm: &ArgMatches) -> Result<()> {
    let user = user_arg(conn, sm)?;
    let name = sm.get_one::<String>("name").unwrap();
    let budget_id = id_for_budget(conn, &user, name)?;
    let category_ids: Vec<i64> = sm
        .get_many::<String>("category")
        .unwrap()
        .map(|c| id_for_category(conn, c))
        .collect::<Result<_>>()?;
    let start = parse_date(sm.get_one::<String>("start").unwrap())?;
    let end = parse_date(sm.get_one::<String>("end").unwrap())?;

    let stats =
        resolver::recalculate_historical(conn, budget_id, &user, &category_ids, start, end)?;
    if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &stats)? {
        return Ok(());
    }
    println!(
        "Recalculated '{}': {} splits re-resolved, {} periods rebuilt{}",
        name,
        stats.transactions_updated,
        stats.spending_updated,
        if stats.errors.is_empty() {
            String::new()
        } else {
            format!(", {} errors", stats.errors.len())
        }
    );
    Ok(())
}

pub fn load_budget(conn: &Connection, id: i64) -> Result<Budget> {
    let row = conn
        .query_row(
            "SELECT id, user_id, name, amount, start_date, end_date, is_active, is_everything_else
             FROM budgets WHERE id=?1",
            params![id],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, Option<String>>(5)?,
                    r.get::<_, i64>(6)?,
                    r.get::<_, i64>(7)?,
                ))
            },
        )
        .optional()?
        .with_context(|| format!("Budget {} not found", id))?;
    let (bid, user_id, name, amount_s, start_s, end_s, is_active, is_ee) = row;

    let mut stmt =
        conn.prepare("SELECT category_id FROM budget_categories WHERE budget_id=?1 ORDER BY category_id")?;
    let category_ids: Vec<i64> = stmt
        .query_map(params![id], |r| r.get(0))?
        .collect::<Result<_, _>>()?;

    Ok(Budget {
        id: bid,
        user_id,
        name,
        amount: parse_decimal(&amount_s)?,
        start_date: parse_date(&start_s)?,
        end_date: match end_s {
            Some(s) => Some(parse_date(&s)?),
            None => None,
        },
        is_active: is_active != 0,
        is_everything_else: is_ee != 0,
        category_ids,
    })
}
