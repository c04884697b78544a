// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use rusqlite::{params, Connection};

use crate::engine::periods::{current_period, ensure_periods};
use crate::models::{PeriodType, SourcePeriod};
use crate::utils::{get_horizon_months, maybe_print_json, parse_date, pretty_table};

pub fn handle(conn: &Connection, m: &ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("generate", sm)) => {
            let from = match sm.get_one::<String>("from") {
                Some(s) => parse_date(s)?,
                None => chrono::Local::now().date_naive(),
            };
            let months = match sm.get_one::<String>("months") {
                Some(s) => s
                    .parse::<u32>()
                    .with_context(|| format!("Invalid months '{}'", s))?,
                None => get_horizon_months(conn)?,
            };
            let created = ensure_periods(conn, from, months)?;
            println!("Generated {} new periods ({} month horizon)", created, months);
        }
        Some(("current", sm)) => {
            let as_of = match sm.get_one::<String>("as-of") {
                Some(s) => parse_date(s)?,
                None => chrono::Local::now().date_naive(),
            };
            let types: Vec<PeriodType> = match sm.get_one::<String>("type") {
                Some(s) => match PeriodType::parse(s) {
                    Some(t) => vec![t],
                    None => bail!("Unknown period type '{}'", s),
                },
                None => vec![
                    PeriodType::Weekly,
                    PeriodType::BiMonthly,
                    PeriodType::Monthly,
                    PeriodType::Annual,
                ],
            };
            let mut found = Vec::with_capacity(types.len());
            for t in types {
                found.push(current_period(conn, t, as_of)?);
            }
            if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &found)? {
                return Ok(());
            }
            let rows = found
                .iter()
                .map(|p| {
                    vec![
                        p.id.clone(),
                        p.period_type.as_str().to_string(),
                        p.start_date.to_string(),
                        p.end_date.to_string(),
                    ]
                })
                .collect();
            println!("{}", pretty_table(&["ID", "Type", "Start", "End"], rows));
        }
        Some(("list", sm)) => {
            let type_filter = match sm.get_one::<String>("type") {
                Some(s) => match PeriodType::parse(s) {
                    Some(t) => Some(t),
                    None => bail!("Unknown period type '{}'", s),
                },
                None => None,
            };
            let periods = list_periods(conn, type_filter)?;
            if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &periods)? {
                return Ok(());
            }
            let rows = periods
                .iter()
                .map(|p| {
                    vec![
                        p.id.clone(),
                        p.period_type.as_str().to_string(),
                        p.start_date.to_string(),
                        p.end_date.to_string(),
                    ]
                })
                .collect();
            println!("{}", pretty_table(&["ID", "Type", "Start", "End"], rows));
        }
        _ => bail!("Unknown period subcommand"),
    }
    Ok(())
}

fn list_periods(conn: &Connection, filter: Option<PeriodType>) -> Result<Vec<SourcePeriod>> {
    let sql = match filter {
        Some(_) => {
            "SELECT id, period_type, start_date, end_date FROM source_periods
             WHERE period_type=?1 ORDER BY start_date, period_type"
        }
        None => {
            "SELECT id, period_type, start_date, end_date FROM source_periods
             ORDER BY start_date, period_type"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, String, String)> {
        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
    };
    let raw: Vec<(String, String, String, String)> = match filter {
        Some(t) => stmt
            .query_map(params![t.as_str()], map_row)?
            .collect::<Result<_, _>>()?,
        None => stmt.query_map([], map_row)?.collect::<Result<_, _>>()?,
    };
    let mut out = Vec::with_capacity(raw.len());
    for (id, t, s, e) in raw {
        let period_type = PeriodType::parse(&t)
            .with_context(|| format!("Unknown stored period type '{}'", t))?;
        out.push(SourcePeriod {
            id,
            period_type,
            start_date: parse_date(&s)?,
            end_date: parse_date(&e)?,
        });
    }
    Ok(out)
}
