//! Outstanding lesson debt per teacher.
//!
//! Debt is never stored as a balance. It is recomputed on every query as
//! missed lessons (emergency absences, plus absences from makeup sessions)
//! minus lessons credited by makeup sessions the teacher attended, grouped by
//! (teacher, subject, class) and clipped at zero. Credit is aggregate within a
//! group, not matched to specific absences. The date range selects absences only;
//! a makeup held after the window still repays debt inside it.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::CoreResult;
use crate::model::{parse_iso_date, DebtOrigin, DebtUnit};
use crate::store::{self, NameBook};

/// Inclusive date window; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map(|s| date >= s).unwrap_or(true) && self.end.map(|e| date <= e).unwrap_or(true)
    }
}

/// One makeup lesson a teacher actually delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credit {
    pub teacher_id: String,
    pub subject_id: String,
    pub class_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerOptions {
    pub range: DateRange,
    /// When false, debt created by skipping a makeup session is left out.
    pub include_accumulated: bool,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            range: DateRange::default(),
            include_accumulated: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtLine {
    pub subject_id: String,
    pub subject_name: String,
    pub class_id: String,
    pub class_name: String,
    pub missed_lessons: u32,
    /// Part of `missed_lessons` that comes from skipped makeup sessions.
    pub accumulated_lessons: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherDebt {
    pub teacher_id: String,
    pub teacher_name: String,
    pub lines: Vec<DebtLine>,
    pub total_debts: u32,
}

#[derive(Default)]
struct Tally {
    original: u32,
    accumulated: u32,
    credited: u32,
}

/// Group-by-sum over debt units and credits.
///
/// Output is ordered by teacher id, then subject id and class id. Teachers whose net
/// total is zero are left out.
pub fn compute_debts(
    units: &[DebtUnit],
    credits: &[Credit],
    opts: &LedgerOptions,
    names: &NameBook,
) -> Vec<TeacherDebt> {
    let mut groups: BTreeMap<(&str, &str, &str), Tally> = BTreeMap::new();
    for u in units {
        if !opts.range.contains(u.date) {
            continue;
        }
        if u.origin == DebtOrigin::MakeupAbsence && !opts.include_accumulated {
            continue;
        }
        let tally = groups
            .entry((u.teacher_id.as_str(), u.subject_id.as_str(), u.class_id.as_str()))
            .or_default();
        match u.origin {
            DebtOrigin::Absence => tally.original += 1,
            DebtOrigin::MakeupAbsence => tally.accumulated += 1,
        }
    }
    for c in credits {
        // credit without a matching debt has nothing to offset
        if let Some(tally) = groups.get_mut(&(c.teacher_id.as_str(), c.subject_id.as_str(), c.class_id.as_str())) {
            tally.credited += 1;
        }
    }

    let mut out: Vec<TeacherDebt> = Vec::new();
    for ((teacher_id, subject_id, class_id), tally) in groups {
        let net = (tally.original + tally.accumulated).saturating_sub(tally.credited);
        if net == 0 {
            continue;
        }
        let line = DebtLine {
            subject_id: subject_id.to_string(),
            subject_name: names.subject(subject_id),
            class_id: class_id.to_string(),
            class_name: names.class(class_id),
            missed_lessons: net,
            accumulated_lessons: tally.accumulated.min(net),
        };
        match out.last_mut() {
            Some(last) if last.teacher_id == teacher_id => {
                last.total_debts += net;
                last.lines.push(line);
            }
            _ => out.push(TeacherDebt {
                teacher_id: teacher_id.to_string(),
                teacher_name: names.teacher(teacher_id),
                total_debts: net,
                lines: vec![line],
            }),
        }
    }
    out
}

pub fn load_debt_units(conn: &Connection, owner_id: &str) -> CoreResult<Vec<DebtUnit>> {
    let mut stmt = conn.prepare(
        "SELECT teacher_id, subject_id, class_id, date, origin
         FROM emergency_absences
         WHERE owner_id = ?",
    )?;
    let rows = stmt
        .query_map([owner_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for (teacher_id, subject_id, class_id, date, origin) in rows {
        let (Some(date), Some(origin)) = (parse_iso_date(&date), DebtOrigin::parse(&origin)) else {
            warn!(owner_id, %teacher_id, %date, %origin, "skipping malformed absence row");
            continue;
        };
        out.push(DebtUnit {
            teacher_id,
            subject_id,
            class_id,
            date,
            origin,
        });
    }
    Ok(out)
}

/// One credit per makeup slot whose teacher attended a session that was not cancelled.
pub fn load_credits(conn: &Connection, owner_id: &str) -> CoreResult<Vec<Credit>> {
    let mut stmt = conn.prepare(
        "SELECT s.teacher_id, s.subject_id, s.class_id
         FROM makeup_slots s
         JOIN makeup_sessions m ON m.id = s.session_id
         JOIN makeup_attendance a ON a.session_id = s.session_id AND a.teacher_id = s.teacher_id
         WHERE m.owner_id = ? AND m.status != 'cancelled'",
    )?;
    let rows = stmt
        .query_map([owner_id], |r| {
            Ok(Credit {
                teacher_id: r.get(0)?,
                subject_id: r.get(1)?,
                class_id: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn teacher_debts(conn: &Connection, owner_id: &str, opts: &LedgerOptions) -> CoreResult<Vec<TeacherDebt>> {
    let units = load_debt_units(conn, owner_id)?;
    let credits = load_credits(conn, owner_id)?;
    let names = store::name_book(conn, owner_id)?;
    Ok(compute_debts(&units, &credits, opts, &names))
}
