// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::ArgMatches;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::engine::cache::CategoryCache;
use crate::engine::events::{dispatch, DispatchOutcome, Event};
use crate::models::{PaymentType, Split, Transaction, TransactionDoc};
use crate::utils::{
    get_default_user, id_for_category, maybe_print_json, parse_date, parse_decimal, pretty_table,
};

pub fn handle(conn: &mut Connection, m: &ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sm)) => add(conn, sm),
        Some(("update", sm)) => update(conn, sm),
        Some(("delete", sm)) => delete(conn, sm),
        Some(("list", sm)) => list(conn, sm),
        _ => bail!("Unknown tx subcommand"),
    }
}

/// An `AMOUNT:CATEGORY` pair from the command line. Category may be empty
/// for an uncategorized split (`12.50:`).
fn parse_split_arg(conn: &Connection, s: &str) -> Result<(Decimal, Option<i64>)> {
    let (amount_s, category_s) = s
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid split '{}', expected AMOUNT:CATEGORY", s))?;
    let amount = parse_decimal(amount_s)?;
    let category_id = if category_s.is_empty() {
        None
    } else {
        Some(id_for_category(conn, category_s)?)
    };
    Ok((amount, category_id))
}

fn add(conn: &mut Connection, sm: &ArgMatches) -> Result<()> {
    let user = match sm.get_one::<String>("user") {
        Some(u) => u.clone(),
        None => get_default_user(conn)?,
    };
    let group = sm.get_one::<String>("group");
    let date = parse_date(sm.get_one::<String>("date").unwrap())?;
    let payee = sm.get_one::<String>("payee").unwrap();
    let amount = parse_decimal(sm.get_one::<String>("amount").unwrap())?;
    let note = sm.get_one::<String>("note");

    let mut splits: Vec<(Decimal, Option<i64>)> = Vec::new();
    if let Some(vals) = sm.get_many::<String>("split") {
        for v in vals {
            splits.push(parse_split_arg(conn, v)?);
        }
        let total: Decimal = splits.iter().map(|(a, _)| *a).sum();
        if total != amount {
            bail!("Splits sum to {} but transaction amount is {}", total, amount);
        }
    } else {
        let category_id = match sm.get_one::<String>("category") {
            Some(c) => Some(id_for_category(conn, c)?),
            None => None,
        };
        splits.push((amount, category_id));
    }

    let txn_id = {
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO transactions(user_id, group_id, date, payee, amount, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user,
                group,
                date.to_string(),
                payee,
                amount.to_string(),
                note
            ],
        )?;
        let txn_id = tx.last_insert_rowid();
        for (split_amount, category_id) in &splits {
            tx.execute(
                "INSERT INTO transaction_splits(transaction_id, amount, category_id)
                 VALUES (?1, ?2, ?3)",
                params![txn_id, split_amount.to_string(), category_id],
            )?;
        }
        tx.commit()?;
        txn_id
    };

    let doc = load_transaction_doc(conn, txn_id)?;
    let outcome = dispatch(conn, Event::TransactionCreated(doc));
    print_outcome(sm, txn_id, "Added", &outcome)
}

fn update(conn: &mut Connection, sm: &ArgMatches) -> Result<()> {
    let id: i64 = sm
        .get_one::<String>("id")
        .unwrap()
        .parse()
        .context("Invalid transaction id")?;
    let before = load_transaction_doc(conn, id)?;

    if let Some(d) = sm.get_one::<String>("date") {
        let date = parse_date(d)?;
        conn.execute(
            "UPDATE transactions SET date=?1 WHERE id=?2",
            params![date.to_string(), id],
        )?;
    }
    if let Some(p) = sm.get_one::<String>("payee") {
        conn.execute(
            "UPDATE transactions SET payee=?1 WHERE id=?2",
            params![p, id],
        )?;
    }
    if let Some(n) = sm.get_one::<String>("note") {
        conn.execute(
            "UPDATE transactions SET note=?1 WHERE id=?2",
            params![n, id],
        )?;
    }

    // Replacement splits are inserted before reconciliation and the old
    // rows deleted after it: reversal of the old assignments needs the old
    // rows still present, assignment of the new ones needs them inserted.
    let mut replaced_ids: Vec<i64> = Vec::new();
    if let Some(vals) = sm.get_many::<String>("split") {
        let parsed: Vec<(Decimal, Option<i64>)> = vals
            .map(|v| parse_split_arg(conn, v))
            .collect::<Result<_>>()?;
        let total: Decimal = parsed.iter().map(|(a, _)| *a).sum();
        conn.execute(
            "UPDATE transactions SET amount=?1 WHERE id=?2",
            params![total.to_string(), id],
        )?;
        for (split_amount, category_id) in &parsed {
            conn.execute(
                "INSERT INTO transaction_splits(transaction_id, amount, category_id)
                 VALUES (?1, ?2, ?3)",
                params![id, split_amount.to_string(), category_id],
            )?;
        }
        replaced_ids = before.splits.iter().map(|s| s.id).collect();
    }

    let mut after = load_transaction_doc(conn, id)?;
    if !replaced_ids.is_empty() {
        after.splits.retain(|s| !replaced_ids.contains(&s.id));
    }

    let outcome = dispatch(
        conn,
        Event::TransactionUpdated {
            before,
            after,
        },
    );

    for old_id in &replaced_ids {
        conn.execute(
            "DELETE FROM transaction_splits WHERE id=?1",
            params![old_id],
        )?;
    }
    print_outcome(sm, id, "Updated", &outcome)
}

fn delete(conn: &mut Connection, sm: &ArgMatches) -> Result<()> {
    let id: i64 = sm
        .get_one::<String>("id")
        .unwrap()
        .parse()
        .context("Invalid transaction id")?;
    let doc = load_transaction_doc(conn, id)?;

    // Reconcile first: reversal reads the stored split assignments, which
    // the row deletion below destroys.
    let outcome = dispatch(conn, Event::TransactionDeleted(doc));
    conn.execute("DELETE FROM transactions WHERE id=?1", params![id])?;
    print_outcome(sm, id, "Deleted", &outcome)
}

fn list(conn: &Connection, sm: &ArgMatches) -> Result<()> {
    let user = match sm.get_one::<String>("user") {
        Some(u) => u.clone(),
        None => get_default_user(conn)?,
    };
    let mut stmt = conn.prepare(
        "SELECT id, user_id, group_id, date, payee, amount, note FROM transactions
         WHERE user_id=?1 ORDER BY date, id",
    )?;
    let ids: Vec<i64> = stmt
        .query_map(params![user], |r| r.get(0))?
        .collect::<Result<_, _>>()?;
    let mut docs = Vec::with_capacity(ids.len());
    for id in ids {
        docs.push(load_transaction_doc(conn, id)?);
    }
    if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &docs)? {
        return Ok(());
    }
    let mut cache = CategoryCache::with_system_clock(Duration::from_secs(60));
    let mut rows = Vec::with_capacity(docs.len());
    for d in &docs {
        let mut names = Vec::new();
        for s in &d.splits {
            if let Some(cid) = s.category_id {
                if let Some(name) = cache.get(conn, cid)? {
                    names.push(name);
                }
            }
        }
        rows.push(vec![
            d.transaction.id.to_string(),
            d.transaction.date.to_string(),
            d.transaction.payee.clone(),
            d.transaction.amount.to_string(),
            names.join(", "),
            d.transaction.group_id.clone().unwrap_or_default(),
        ]);
    }
    println!(
        "{}",
        pretty_table(
            &["ID", "Date", "Payee", "Amount", "Categories", "Group"],
            rows
        )
    );
    Ok(())
}

fn print_outcome(sm: &ArgMatches, id: i64, verb: &str, outcome: &DispatchOutcome) -> Result<()> {
    if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), outcome)? {
        return Ok(());
    }
    if outcome.success {
        println!("{} transaction {}", verb, id);
    } else {
        println!(
            "{} transaction {} (aggregates stale: {})",
            verb,
            id,
            outcome.errors.join("; ")
        );
    }
    Ok(())
}

pub fn load_transaction_doc(conn: &Connection, id: i64) -> Result<TransactionDoc> {
    let transaction = conn
        .query_row(
            "SELECT id, user_id, group_id, date, payee, amount, note
             FROM transactions WHERE id=?1",
            params![id],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, Option<String>>(6)?,
                ))
            },
        )
        .optional()?
        .with_context(|| format!("Transaction {} not found", id))?;
    let (tid, user_id, group_id, date_s, payee, amount_s, note) = transaction;
    let transaction = Transaction {
        id: tid,
        user_id,
        group_id,
        date: parse_date(&date_s)?,
        payee,
        amount: parse_decimal(&amount_s)?,
        note,
    };

    let mut stmt = conn.prepare(
        "SELECT id, transaction_id, amount, category_id, budget_id, budget_period_id,
                outflow_id, payment_type
         FROM transaction_splits WHERE transaction_id=?1 ORDER BY id",
    )?;
    let raw: Vec<(i64, i64, String, Option<i64>, Option<i64>, Option<String>, Option<i64>, Option<String>)> =
        stmt.query_map(params![id], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
                r.get(7)?,
            ))
        })?
        .collect::<Result<_, _>>()?;
    let mut splits = Vec::with_capacity(raw.len());
    for (sid, txn_id, amount_s, category_id, budget_id, budget_period_id, outflow_id, pt) in raw {
        splits.push(Split {
            id: sid,
            transaction_id: txn_id,
            amount: parse_decimal(&amount_s)?,
            category_id,
            budget_id,
            budget_period_id,
            outflow_id,
            payment_type: pt.as_deref().and_then(PaymentType::parse),
        });
    }
    Ok(TransactionDoc {
        transaction,
        splits,
    })
}
