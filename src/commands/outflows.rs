// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use rusqlite::{params, Connection, OptionalExtension};

use crate::engine::events::{dispatch, Event};
use crate::engine::outflow;
use crate::models::{Outflow, OutflowStatus, PaymentType, PeriodType};
use crate::utils::{
    get_default_user, id_for_category, id_for_outflow, maybe_print_json, parse_date,
    parse_decimal, pretty_table,
};

pub fn handle(conn: &mut Connection, m: &ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sm)) => add(conn, sm),
        Some(("list", sm)) => list(conn, sm),
        Some(("assign", sm)) => assign(conn, sm),
        _ => bail!("Unknown outflow subcommand"),
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
    let amount_due = parse_decimal(sm.get_one::<String>("amount-due").unwrap())?;
    let due_date = parse_date(sm.get_one::<String>("due-date").unwrap())?;
    let category_id = match sm.get_one::<String>("category") {
        Some(c) => Some(id_for_category(conn, c)?),
        None => None,
    };

    conn.execute(
        "INSERT INTO outflows(user_id, name, amount_due, due_date, category_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user,
            name,
            amount_due.to_string(),
            due_date.to_string(),
            category_id
        ],
    )
    .with_context(|| format!("Failed to add outflow '{}'", name))?;
    let outflow_id = conn.last_insert_rowid();

    let doc = load_outflow(conn, outflow_id)?;
    let outcome = dispatch(conn, Event::OutflowCreated(doc));
    if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &outcome)? {
        return Ok(());
    }
    println!(
        "Added outflow '{}' (id {}, {} due periods seeded)",
        name, outflow_id, outcome.periods_seeded
    );
    Ok(())
}

fn list(conn: &Connection, sm: &ArgMatches) -> Result<()> {
    let user = user_arg(conn, sm)?;

    #[derive(serde::Serialize)]
    struct OutflowRow {
        #[serde(flatten)]
        outflow: Outflow,
        monthly_status: Option<String>,
    }

    let mut stmt = conn.prepare("SELECT id FROM outflows WHERE user_id=?1 ORDER BY name")?;
    let ids: Vec<i64> = stmt
        .query_map(params![user], |r| r.get(0))?
        .collect::<Result<_, _>>()?;
    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        let outflow = load_outflow(conn, id)?;
        // Status of the monthly due period, when its mirrors exist.
        let monthly_status: Option<String> = conn
            .query_row(
                "SELECT status FROM outflow_periods
                 WHERE outflow_id=?1 AND period_type=?2 AND is_due_period=1",
                params![id, PeriodType::Monthly.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        rows.push(OutflowRow {
            outflow,
            monthly_status,
        });
    }
    if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &rows)? {
        return Ok(());
    }
    let table_rows = rows
        .iter()
        .map(|r| {
            vec![
                r.outflow.id.to_string(),
                r.outflow.name.clone(),
                r.outflow.amount_due.to_string(),
                r.outflow.due_date.to_string(),
                r.monthly_status
                    .clone()
                    .unwrap_or_else(|| OutflowStatus::Pending.as_str().to_string()),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(&["ID", "Name", "Due", "Due date", "Status"], table_rows)
    );
    Ok(())
}

fn assign(conn: &mut Connection, sm: &ArgMatches) -> Result<()> {
    let user = user_arg(conn, sm)?;
    let transaction_id: i64 = sm
        .get_one::<String>("tx")
        .unwrap()
        .parse()
        .context("Invalid transaction id")?;
    let split_id: i64 = sm
        .get_one::<String>("split")
        .unwrap()
        .parse()
        .context("Invalid split id")?;
    let name = sm.get_one::<String>("name").unwrap();
    let outflow_id = id_for_outflow(conn, &user, name)?;
    let payment_type_s = sm.get_one::<String>("payment-type").unwrap();
    let payment_type = PaymentType::parse(payment_type_s)
        .with_context(|| format!("Unknown payment type '{}'", payment_type_s))?;
    let target = sm.get_one::<String>("target-period").map(String::as_str);

    let assignment = outflow::assign_split(
        conn,
        transaction_id,
        split_id,
        outflow_id,
        payment_type,
        target,
    )?;
    if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &assignment)? {
        return Ok(());
    }
    let rows = [
        &assignment.monthly_period,
        &assignment.weekly_period,
        &assignment.bi_monthly_period,
    ]
    .iter()
    .map(|p| {
        vec![
            p.period_id.clone(),
            p.period_type.as_str().to_string(),
            p.amount_due.to_string(),
            p.amount_paid.to_string(),
            p.amount_unpaid.to_string(),
            p.extra_principal.to_string(),
            p.status.as_str().to_string(),
        ]
    })
    .collect();
    println!(
        "Assigned split {} to '{}' as {}",
        split_id,
        name,
        payment_type.as_str()
    );
    println!(
        "{}",
        pretty_table(
            &["Period", "Type", "Due", "Paid", "Unpaid", "Extra", "Status"],
            rows
        )
    );
    Ok(())
}

pub fn load_outflow(conn: &Connection, id: i64) -> Result<Outflow> {
    let row = conn
        .query_row(
            "SELECT id, user_id, name, amount_due, due_date, category_id
             FROM outflows WHERE id=?1",
            params![id],
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
        .optional()?
        .with_context(|| format!("Outflow {} not found", id))?;
    let (oid, user_id, name, amount_s, due_s, category_id) = row;
    Ok(Outflow {
        id: oid,
        user_id,
        name,
        amount_due: parse_decimal(&amount_s)?,
        due_date: parse_date(&due_s)?,
        category_id,
    })
}
