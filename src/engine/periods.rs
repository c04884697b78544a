// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Period catalog: canonical weekly / bi-monthly / monthly / annual windows.
//!
//! Periods of a given type partition the calendar with no gaps or overlaps.
//! Ids are deterministic (`2026-M03`, `2026-W07`, ...) so generation is
//! idempotent: concurrent callers INSERT OR IGNORE the same rows.

use chrono::{Datelike, Days, Months, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};

use crate::engine::{EngineError, EngineResult};
use crate::models::{PeriodType, SourcePeriod};

/// Day of month where a bi-monthly window splits.
const BI_MONTHLY_SPLIT_DAY: u32 = 15;

fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap()
}

fn next_month_start(date: NaiveDate) -> NaiveDate {
    month_start(date) + Months::new(1)
}

/// Compute the period of `period_type` containing `date`. Pure; does not
/// touch the store.
pub fn period_for_date(period_type: PeriodType, date: NaiveDate) -> SourcePeriod {
    match period_type {
        PeriodType::Monthly => {
            let start = month_start(date);
            SourcePeriod {
                id: format!("{}-{}{:02}", date.year(), period_type.tag(), date.month()),
                period_type,
                start_date: start,
                end_date: start + Months::new(1),
            }
        }
        PeriodType::Annual => {
            let start = NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap();
            SourcePeriod {
                id: format!("{}-{}01", date.year(), period_type.tag()),
                period_type,
                start_date: start,
                end_date: NaiveDate::from_ymd_opt(date.year() + 1, 1, 1).unwrap(),
            }
        }
        PeriodType::BiMonthly => {
            let split =
                NaiveDate::from_ymd_opt(date.year(), date.month(), BI_MONTHLY_SPLIT_DAY).unwrap();
            let (start, end, half) = if date < split {
                (month_start(date), split, 1)
            } else {
                (split, next_month_start(date), 2)
            };
            let index = (date.month() - 1) * 2 + half;
            SourcePeriod {
                id: format!("{}-{}{:02}", date.year(), period_type.tag(), index),
                period_type,
                start_date: start,
                end_date: end,
            }
        }
        PeriodType::Weekly => {
            // Monday-anchored ISO weeks; a week's id carries its ISO year so
            // weeks crossing a year boundary stay unambiguous.
            let start = date - Days::new(date.weekday().num_days_from_monday() as u64);
            let iso = date.iso_week();
            SourcePeriod {
                id: format!("{}-{}{:02}", iso.year(), period_type.tag(), iso.week()),
                period_type,
                start_date: start,
                end_date: start + Days::new(7),
            }
        }
    }
}

/// Look up the stored period of `period_type` containing `date`, creating
/// it if absent. Check-then-create is keyed by the deterministic id, so
/// concurrent callers cannot produce duplicates.
pub fn ensure_period_for(
    conn: &Connection,
    period_type: PeriodType,
    date: NaiveDate,
) -> EngineResult<SourcePeriod> {
    let p = period_for_date(period_type, date);
    conn.execute(
        "INSERT OR IGNORE INTO source_periods(id, period_type, start_date, end_date)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            p.id,
            p.period_type.as_str(),
            p.start_date.to_string(),
            p.end_date.to_string()
        ],
    )?;
    Ok(p)
}

/// Pre-generate all period types covering `[from, from + horizon_months)`.
/// Idempotent; the scheduled maintenance path calls this to extend the
/// forward horizon.
pub fn ensure_periods(
    conn: &Connection,
    from: NaiveDate,
    horizon_months: u32,
) -> EngineResult<usize> {
    let until = month_start(from) + Months::new(horizon_months);
    let mut created = 0usize;
    for period_type in [
        PeriodType::Weekly,
        PeriodType::BiMonthly,
        PeriodType::Monthly,
        PeriodType::Annual,
    ] {
        let mut cursor = from;
        loop {
            let p = period_for_date(period_type, cursor);
            let n = conn.execute(
                "INSERT OR IGNORE INTO source_periods(id, period_type, start_date, end_date)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    p.id,
                    p.period_type.as_str(),
                    p.start_date.to_string(),
                    p.end_date.to_string()
                ],
            )?;
            created += n;
            if p.end_date >= until {
                break;
            }
            cursor = p.end_date;
        }
    }
    tracing::debug!(%from, horizon_months, created, "ensured source periods");
    Ok(created)
}

fn row_to_period(r: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String)> {
    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
}

fn parse_period(
    id: String,
    type_s: String,
    start: String,
    end: String,
) -> EngineResult<SourcePeriod> {
    let period_type = PeriodType::parse(&type_s)
        .ok_or_else(|| EngineError::Invariant(format!("unknown period type '{type_s}'")))?;
    let start_date = NaiveDate::parse_from_str(&start, "%Y-%m-%d")
        .map_err(|e| EngineError::Invariant(format!("bad period start '{start}': {e}")))?;
    let end_date = NaiveDate::parse_from_str(&end, "%Y-%m-%d")
        .map_err(|e| EngineError::Invariant(format!("bad period end '{end}': {e}")))?;
    Ok(SourcePeriod {
        id,
        period_type,
        start_date,
        end_date,
    })
}

/// Stored periods of `period_type` overlapping `[from, to)`, ordered by start.
pub fn periods_covering(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
    period_type: PeriodType,
) -> EngineResult<Vec<SourcePeriod>> {
    let mut stmt = conn.prepare(
        "SELECT id, period_type, start_date, end_date FROM source_periods
         WHERE period_type=?1 AND start_date < ?2 AND end_date > ?3
         ORDER BY start_date",
    )?;
    let rows = stmt.query_map(
        params![period_type.as_str(), to.to_string(), from.to_string()],
        row_to_period,
    )?;
    let mut out = Vec::new();
    for row in rows {
        let (id, t, s, e) = row?;
        out.push(parse_period(id, t, s, e)?);
    }
    Ok(out)
}

/// The stored period of `period_type` containing `as_of`.
pub fn current_period(
    conn: &Connection,
    period_type: PeriodType,
    as_of: NaiveDate,
) -> EngineResult<SourcePeriod> {
    let row = conn
        .query_row(
            "SELECT id, period_type, start_date, end_date FROM source_periods
             WHERE period_type=?1 AND start_date <= ?2 AND end_date > ?2",
            params![period_type.as_str(), as_of.to_string()],
            row_to_period,
        )
        .optional()?;
    match row {
        Some((id, t, s, e)) => parse_period(id, t, s, e),
        None => Err(EngineError::NotFound(format!(
            "no {} period covering {as_of}; run period generation",
            period_type.as_str()
        ))),
    }
}

/// Fetch a stored period by id.
pub fn period_by_id(conn: &Connection, id: &str) -> EngineResult<SourcePeriod> {
    let row = conn
        .query_row(
            "SELECT id, period_type, start_date, end_date FROM source_periods WHERE id=?1",
            params![id],
            row_to_period,
        )
        .optional()?;
    match row {
        Some((id, t, s, e)) => parse_period(id, t, s, e),
        None => Err(EngineError::NotFound(format!("period '{id}' not found"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monthly_id_is_deterministic() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let p = period_for_date(PeriodType::Monthly, d);
        assert_eq!(p.id, "2026-M03");
        assert_eq!(p.start_date, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(p.end_date, NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
    }

    #[test]
    fn bi_monthly_splits_at_fifteenth() {
        let first = period_for_date(
            PeriodType::BiMonthly,
            NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        );
        let second = period_for_date(
            PeriodType::BiMonthly,
            NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
        );
        assert_eq!(first.id, "2026-B05");
        assert_eq!(second.id, "2026-B06");
        assert_eq!(first.end_date, second.start_date);
        assert_eq!(
            second.end_date,
            NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()
        );
    }

    #[test]
    fn weekly_is_monday_anchored() {
        // 2026-03-14 is a Saturday; its week starts Monday 2026-03-09.
        let p = period_for_date(
            PeriodType::Weekly,
            NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        );
        assert_eq!(p.start_date, NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        assert_eq!(p.end_date, NaiveDate::from_ymd_opt(2026, 3, 16).unwrap());
        // Every date in the window maps to the same id.
        for off in 0..7 {
            let q = period_for_date(PeriodType::Weekly, p.start_date + Days::new(off));
            assert_eq!(q.id, p.id);
        }
    }
}
