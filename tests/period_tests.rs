// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use chrono::NaiveDate;
use rusqlite::{params, Connection};

use tally::engine::periods::{current_period, ensure_periods, period_for_date, periods_covering};
use tally::models::PeriodType;

fn setup() -> Connection {
    tally::db::open_in_memory().unwrap()
}

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

#[test]
fn generation_tiles_the_year_without_gap_or_overlap() {
    let conn = setup();
    ensure_periods(&conn, d("2026-01-01"), 12).unwrap();

    for period_type in [
        PeriodType::Weekly,
        PeriodType::BiMonthly,
        PeriodType::Monthly,
        PeriodType::Annual,
    ] {
        let periods =
            periods_covering(&conn, d("2026-01-01"), d("2027-01-01"), period_type).unwrap();
        assert!(!periods.is_empty(), "{:?} generated nothing", period_type);
        // Every date in the year falls in exactly one period.
        for pair in periods.windows(2) {
            assert_eq!(
                pair[0].end_date, pair[1].start_date,
                "{:?}: {} does not abut {}",
                period_type, pair[0].id, pair[1].id
            );
        }
        assert!(periods.first().unwrap().start_date <= d("2026-01-01"));
        assert!(periods.last().unwrap().end_date >= d("2027-01-01"));
    }
}

#[test]
fn generation_is_idempotent() {
    let conn = setup();
    let first = ensure_periods(&conn, d("2026-01-01"), 12).unwrap();
    assert!(first > 0);
    let second = ensure_periods(&conn, d("2026-01-01"), 12).unwrap();
    assert_eq!(second, 0);
    let total: i64 = conn
        .query_row("SELECT COUNT(*) FROM source_periods", [], |r| r.get(0))
        .unwrap();
    assert_eq!(total as usize, first);
}

#[test]
fn monthly_ids_are_deterministic() {
    let p = period_for_date(PeriodType::Monthly, d("2026-03-17"));
    assert_eq!(p.id, "2026-M03");
    assert_eq!(p.start_date, d("2026-03-01"));
    assert_eq!(p.end_date, d("2026-04-01"));
}

#[test]
fn bi_monthly_halves_split_on_the_fifteenth() {
    let first = period_for_date(PeriodType::BiMonthly, d("2026-03-14"));
    assert_eq!(first.id, "2026-B05");
    assert_eq!(first.start_date, d("2026-03-01"));
    assert_eq!(first.end_date, d("2026-03-15"));

    let second = period_for_date(PeriodType::BiMonthly, d("2026-03-15"));
    assert_eq!(second.id, "2026-B06");
    assert_eq!(second.start_date, d("2026-03-15"));
    assert_eq!(second.end_date, d("2026-04-01"));
}

#[test]
fn weekly_periods_are_monday_anchored() {
    // 2026-02-11 is a Wednesday; its week starts Monday 2026-02-09.
    let p = period_for_date(PeriodType::Weekly, d("2026-02-11"));
    assert_eq!(p.start_date, d("2026-02-09"));
    assert_eq!(p.end_date, d("2026-02-16"));
    // The Monday itself lands in the same week.
    assert_eq!(period_for_date(PeriodType::Weekly, d("2026-02-09")).id, p.id);
}

#[test]
fn annual_period_covers_the_calendar_year() {
    let p = period_for_date(PeriodType::Annual, d("2026-07-04"));
    assert_eq!(p.id, "2026-A01");
    assert_eq!(p.start_date, d("2026-01-01"));
    assert_eq!(p.end_date, d("2027-01-01"));
}

#[test]
fn current_period_requires_generated_rows() {
    let conn = setup();
    let err = current_period(&conn, PeriodType::Monthly, d("2026-03-10")).unwrap_err();
    assert!(err.to_string().contains("period generation"));

    ensure_periods(&conn, d("2026-01-01"), 12).unwrap();
    let p = current_period(&conn, PeriodType::Monthly, d("2026-03-10")).unwrap();
    assert_eq!(p.id, "2026-M03");
}

#[test]
fn stored_periods_match_computed_ones() {
    let conn = setup();
    ensure_periods(&conn, d("2026-01-01"), 3).unwrap();
    let stored: Vec<(String, String, String)> = {
        let mut stmt = conn
            .prepare(
                "SELECT id, start_date, end_date FROM source_periods
                 WHERE period_type=?1 ORDER BY start_date",
            )
            .unwrap();
        let rows = stmt
            .query_map(params![PeriodType::Monthly.as_str()], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        rows.collect::<Result<_, _>>().unwrap()
    };
    for (id, start, end) in stored {
        let p = period_for_date(PeriodType::Monthly, d(&start));
        assert_eq!(p.id, id);
        assert_eq!(p.end_date.to_string(), end);
    }
}
