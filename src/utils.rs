// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))
}

pub fn parse_decimal(s: &str) -> Result<Decimal> {
    s.parse::<Decimal>()
        .with_context(|| format!("Invalid decimal '{}'", s))
}

pub fn pretty_table(headers: &[&str], rows: Vec<Vec<String>>) -> Table {
    let mut t = Table::new();
    t.load_preset(UTF8_FULL);
    t.set_header(headers.iter().map(|h| Cell::new(*h)));
    for r in rows {
        t.add_row(r.into_iter().map(Cell::new));
    }
    t
}

pub fn id_for_category(conn: &Connection, name: &str) -> Result<i64> {
    let mut stmt = conn.prepare("SELECT id FROM categories WHERE name=?1")?;
    let id: i64 = stmt
        .query_row(params![name], |r| r.get(0))
        .with_context(|| format!("Category '{}' not found", name))?;
    Ok(id)
}

pub fn id_for_budget(conn: &Connection, user_id: &str, name: &str) -> Result<i64> {
    let mut stmt = conn.prepare("SELECT id FROM budgets WHERE user_id=?1 AND name=?2")?;
    let id: i64 = stmt
        .query_row(params![user_id, name], |r| r.get(0))
        .with_context(|| format!("Budget '{}' not found for user '{}'", name, user_id))?;
    Ok(id)
}

pub fn id_for_outflow(conn: &Connection, user_id: &str, name: &str) -> Result<i64> {
    let mut stmt = conn.prepare("SELECT id FROM outflows WHERE user_id=?1 AND name=?2")?;
    let id: i64 = stmt
        .query_row(params![user_id, name], |r| r.get(0))
        .with_context(|| format!("Outflow '{}' not found for user '{}'", name, user_id))?;
    Ok(id)
}

// Settings
pub fn get_default_user(conn: &Connection) -> Result<String> {
    let v: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key='default_user'",
            [],
            |r| r.get(0),
        )
        .optional()?;
    Ok(v.unwrap_or_else(|| "default".to_string()))
}

pub fn set_default_user(conn: &Connection, user: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES('default_user', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        params![user],
    )?;
    Ok(())
}

/// Forward horizon for pre-generated periods, in months.
pub fn get_horizon_months(conn: &Connection) -> Result<u32> {
    let v: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key='horizon_months'",
            [],
            |r| r.get(0),
        )
        .optional()?;
    match v {
        Some(s) => s
            .parse::<u32>()
            .with_context(|| format!("Invalid horizon_months '{}'", s)),
        None => Ok(12),
    }
}

pub fn maybe_print_json<T: serde::Serialize>(
    json_flag: bool,
    jsonl_flag: bool,
    v: &T,
) -> Result<bool> {
    if json_flag {
        println!("{}", serde_json::to_string_pretty(v)?);
        return Ok(true);
    }
    if jsonl_flag {
        // If v is an array, stream each element; else stream single line
        let val = serde_json::to_value(v)?;
        if let Some(arr) = val.as_array() {
            for item in arr {
                println!("{}", serde_json::to_string(item)?);
            }
        } else {
            println!("{}", serde_json::to_string(&val)?);
        }
        return Ok(true);
    }
    Ok(false)
}
