// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use clap::{Arg, ArgAction, Command};

fn json_flags(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("json")
            .long("json")
            .action(ArgAction::SetTrue)
            .help("Print result as pretty JSON"),
    )
    .arg(
        Arg::new("jsonl")
            .long("jsonl")
            .action(ArgAction::SetTrue)
            .help("Print result as JSON lines"),
    )
}

pub fn build_cli() -> Command {
    Command::new("tally")
        .about("Period-based budget and bill aggregation with delta reconciliation")
        .version(clap::crate_version!())
        .subcommand(Command::new("init").about("Initialize the database"))
        .subcommand(
            Command::new("category")
                .about("Manage categories")
                .subcommand(
                    Command::new("add")
                        .about("Add a category")
                        .arg(Arg::new("name").required(true)),
                )
                .subcommand(json_flags(Command::new("list").about("List categories"))),
        )
        .subcommand(
            Command::new("period")
                .about("Manage source periods")
                .subcommand(
                    Command::new("generate")
                        .about("Pre-generate periods for the forward horizon")
                        .arg(Arg::new("from").long("from").help("Start date, YYYY-MM-DD"))
                        .arg(
                            Arg::new("months")
                                .long("months")
                                .help("Horizon length in months"),
                        ),
                )
                .subcommand(json_flags(
                    Command::new("list")
                        .about("List stored periods")
                        .arg(
                            Arg::new("type")
                                .long("type")
                                .help("weekly | bi_monthly | monthly | annual"),
                        ),
                ))
                .subcommand(json_flags(
                    Command::new("current")
                        .about("Show the period containing a date, per type")
                        .arg(Arg::new("type").long("type"))
                        .arg(Arg::new("as-of").long("as-of").help("Date, default today")),
                )),
        )
        .subcommand(
            Command::new("tx")
                .about("Manage transactions")
                .subcommand(json_flags(
                    Command::new("add")
                        .about("Add a transaction")
                        .arg(Arg::new("user").long("user"))
                        .arg(Arg::new("group").long("group"))
                        .arg(Arg::new("date").long("date").required(true))
                        .arg(Arg::new("payee").long("payee").required(true))
                        .arg(Arg::new("amount").long("amount").required(true))
                        .arg(Arg::new("note").long("note"))
                        .arg(
                            Arg::new("split")
                                .long("split")
                                .action(ArgAction::Append)
                                .help("Split as AMOUNT:CATEGORY, repeatable"),
                        )
                        .arg(
                            Arg::new("category")
                                .long("category")
                                .help("Category for the single implicit split"),
                        ),
                ))
                .subcommand(json_flags(
                    Command::new("update")
                        .about("Update a transaction; splits given here replace the old set")
                        .arg(Arg::new("id").long("id").required(true))
                        .arg(Arg::new("date").long("date"))
                        .arg(Arg::new("payee").long("payee"))
                        .arg(Arg::new("note").long("note"))
                        .arg(
                            Arg::new("split")
                                .long("split")
                                .action(ArgAction::Append)
                                .help("Split as AMOUNT:CATEGORY, repeatable"),
                        ),
                ))
                .subcommand(json_flags(
                    Command::new("delete")
                        .about("Delete a transaction and reverse its aggregates")
                        .arg(Arg::new("id").long("id").required(true)),
                ))
                .subcommand(json_flags(
                    Command::new("list")
                        .about("List transactions")
                        .arg(Arg::new("user").long("user")),
                )),
        )
        .subcommand(
            Command::new("budget")
                .about("Manage budgets")
                .subcommand(json_flags(
                    Command::new("add")
                        .about("Add a budget")
                        .arg(Arg::new("user").long("user"))
                        .arg(Arg::new("name").long("name").required(true))
                        .arg(Arg::new("amount").long("amount").required(true))
                        .arg(Arg::new("start").long("start").required(true))
                        .arg(Arg::new("end").long("end"))
                        .arg(
                            Arg::new("category")
                                .long("category")
                                .action(ArgAction::Append)
                                .help("Category name, repeatable; none = catch-all"),
                        ),
                ))
                .subcommand(json_flags(Command::new("list").about("List budgets").arg(
                    Arg::new("user").long("user"),
                )))
                .subcommand(json_flags(
                    Command::new("set-categories")
                        .about("Replace a budget's category set and reassign splits")
                        .arg(Arg::new("user").long("user"))
                        .arg(Arg::new("name").long("name").required(true))
                        .arg(
                            Arg::new("category")
                                .long("category")
                                .action(ArgAction::Append),
                        ),
                ))
                .subcommand(json_flags(
                    Command::new("delete")
                        .about("Delete a budget and re-resolve its splits")
                        .arg(Arg::new("user").long("user"))
                        .arg(Arg::new("name").long("name").required(true)),
                ))
                .subcommand(json_flags(
                    Command::new("recalc")
                        .about("Recalculate historical assignments for a budget")
                        .arg(Arg::new("user").long("user"))
                        .arg(Arg::new("name").long("name").required(true))
                        .arg(
                            Arg::new("category")
                                .long("category")
                                .action(ArgAction::Append)
                                .required(true),
                        )
                        .arg(Arg::new("start").long("start").required(true))
                        .arg(Arg::new("end").long("end").required(true)),
                )),
        )
        .subcommand(
            Command::new("outflow")
                .about("Manage recurring bills")
                .subcommand(json_flags(
                    Command::new("add")
                        .about("Add an outflow")
                        .arg(Arg::new("user").long("user"))
                        .arg(Arg::new("name").long("name").required(true))
                        .arg(Arg::new("amount-due").long("amount-due").required(true))
                        .arg(Arg::new("due-date").long("due-date").required(true))
                        .arg(Arg::new("category").long("category")),
                ))
                .subcommand(json_flags(Command::new("list").about("List outflows").arg(
                    Arg::new("user").long("user"),
                )))
                .subcommand(json_flags(
                    Command::new("assign")
                        .about("Assign a split to an outflow across all period granularities")
                        .arg(Arg::new("user").long("user"))
                        .arg(Arg::new("tx").long("tx").required(true))
                        .arg(Arg::new("split").long("split").required(true))
                        .arg(Arg::new("name").long("name").required(true))
                        .arg(
                            Arg::new("payment-type")
                                .long("payment-type")
                                .default_value("regular")
                                .help("regular | catch_up | advance | extra_principal"),
                        )
                        .arg(
                            Arg::new("target-period")
                                .long("target-period")
                                .help("Period id for advance payments, e.g. 2026-M04"),
                        ),
                )),
        )
        .subcommand(
            Command::new("summary")
                .about("Rebuild and show rollups")
                .subcommand(json_flags(
                    Command::new("rebuild")
                        .about("Rebuild summaries from base state")
                        .arg(Arg::new("user").long("user"))
                        .arg(Arg::new("group").long("group")),
                ))
                .subcommand(json_flags(
                    Command::new("show")
                        .about("Show user summaries or group rollups")
                        .arg(Arg::new("user").long("user"))
                        .arg(Arg::new("group").long("group")),
                )),
        )
        .subcommand(json_flags(
            Command::new("doctor")
                .about("Verify aggregate invariants")
                .arg(Arg::new("year").long("year").help("Year to check, default current")),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_json_flag(cmd: &Command, path: &str) {
        let mut leaf = true;
        for sub in cmd.get_subcommands() {
            leaf = false;
            assert_json_flag(sub, &format!("{} {}", path, sub.get_name()));
        }
        if leaf {
            assert!(
                cmd.get_arguments().any(|a| a.get_id() == "json"),
                "`{}` is missing the --json flag",
                path
            );
        }
    }

    #[test]
    fn every_leaf_subcommand_accepts_json() {
        let cli = build_cli();
        for sub in cli.get_subcommands() {
            assert_json_flag(sub, sub.get_name());
        }
    }
}
