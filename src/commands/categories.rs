// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use rusqlite::{params, Connection};

use crate::models::Category;
use crate::utils::{maybe_print_json, pretty_table};

pub fn handle(conn: &Connection, m: &ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sm)) => {
            let name = sm.get_one::<String>("name").unwrap();
            conn.execute("INSERT INTO categories(name) VALUES(?1)", params![name])
                .with_context(|| format!("Failed to add category '{}'", name))?;
            println!("Added category '{}'", name);
        }
        Some(("list", sm)) => {
            let mut stmt = conn.prepare("SELECT id, name FROM categories ORDER BY name")?;
            let cats: Vec<Category> = stmt
                .query_map([], |r| {
                    Ok(Category {
                        id: r.get(0)?,
                        name: r.get(1)?,
                    })
                })?
                .collect::<Result<_, _>>()?;
            if maybe_print_json(sm.get_flag("json"), sm.get_flag("jsonl"), &cats)? {
                return Ok(());
            }
            let rows = cats
                .iter()
                .map(|c| vec![c.id.to_string(), c.name.clone()])
                .collect();
            println!("{}", pretty_table(&["ID", "Name"], rows));
        }
        _ => bail!("Unknown category subcommand"),
    }
    Ok(())
}
