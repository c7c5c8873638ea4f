//! Emergency absences turned into per-lesson debt rows.

use chrono::{Datelike, NaiveDate, Weekday};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::ledger::DateRange;
use crate::model::{parse_iso_date, AffectedLesson, DebtOrigin, ScheduleSlot, MAX_PERIODS_PER_DAY};
use crate::store::{self, Entity};

/// Grid day for a calendar date: Monday = 0 .. Saturday = 5. Sunday has no lessons.
pub fn weekday_index(date: NaiveDate) -> Option<u8> {
    match date.weekday() {
        Weekday::Sun => None,
        other => Some(other.num_days_from_monday() as u8),
    }
}

/// Lessons a teacher holds on `day` in the weekly schedule, ordered by period.
pub fn derive_affected(schedule: &[ScheduleSlot], teacher_id: &str, day: u8) -> Vec<AffectedLesson> {
    let mut out: Vec<AffectedLesson> = schedule
        .iter()
        .filter(|s| s.day == day && s.teacher_id == teacher_id)
        .map(|s| AffectedLesson {
            class_id: s.class_id.clone(),
            subject_id: s.subject_id.clone(),
            period: s.period,
            teacher_id: None,
        })
        .collect();
    out.sort_by(|a, b| (a.period, &a.class_id).cmp(&(b.period, &b.class_id)));
    out
}

#[derive(Debug, Clone)]
pub struct AbsenceRequest {
    pub date: NaiveDate,
    pub teacher_ids: Vec<String>,
    pub reason: String,
    /// Overrides derivation from the weekly schedule when present.
    pub affected: Option<Vec<AffectedLesson>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherAbsence {
    pub teacher_id: String,
    pub absence_id: String,
    pub lessons: Vec<AffectedLesson>,
    pub recorded: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceReceipt {
    pub date: NaiveDate,
    pub teachers: Vec<TeacherAbsence>,
    pub recorded: usize,
    pub duplicates: usize,
}

fn validate_request(conn: &Connection, owner_id: &str, req: &AbsenceRequest) -> CoreResult<()> {
    if req.teacher_ids.is_empty() {
        return Err(CoreError::validation("teacherIds must not be empty"));
    }
    for tid in &req.teacher_ids {
        store::ensure_exists(conn, owner_id, Entity::Teacher, tid)?;
    }
    if let Some(lessons) = &req.affected {
        for l in lessons {
            if l.period == 0 || l.period > MAX_PERIODS_PER_DAY {
                return Err(CoreError::validation(format!(
                    "period must be between 1 and {}",
                    MAX_PERIODS_PER_DAY
                )));
            }
            store::ensure_exists(conn, owner_id, Entity::Class, &l.class_id)?;
            store::ensure_exists(conn, owner_id, Entity::Subject, &l.subject_id)?;
            if let Some(tid) = &l.teacher_id {
                if !req.teacher_ids.contains(tid) {
                    return Err(CoreError::validation(format!(
                        "affected lesson names teacher {} who is not in teacherIds",
                        tid
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Records one absence per teacher and one debt row per affected lesson.
///
/// Re-recording the same (teacher, date, class, subject, period) is a no-op counted in
/// `duplicates`.
pub fn record_absence(conn: &Connection, owner_id: &str, req: &AbsenceRequest) -> CoreResult<AbsenceReceipt> {
    validate_request(conn, owner_id, req)?;

    let schedule = match (&req.affected, weekday_index(req.date)) {
        (None, Some(_)) => store::load_schedule(conn, owner_id)?,
        _ => Vec::new(),
    };
    let date = req.date.format("%Y-%m-%d").to_string();
    let created_at = db::now_ts();

    let tx = conn.unchecked_transaction()?;
    let mut teachers = Vec::with_capacity(req.teacher_ids.len());
    for teacher_id in &req.teacher_ids {
        let lessons: Vec<AffectedLesson> = match &req.affected {
            Some(explicit) => explicit
                .iter()
                .filter(|l| l.teacher_id.as_deref().map(|t| t == teacher_id.as_str()).unwrap_or(true))
                .map(|l| AffectedLesson {
                    teacher_id: None,
                    ..l.clone()
                })
                .collect(),
            None => match weekday_index(req.date) {
                Some(day) => derive_affected(&schedule, teacher_id, day),
                None => Vec::new(),
            },
        };

        let absence_id = Uuid::new_v4().to_string();
        let mut recorded = 0;
        let mut duplicates = 0;
        for l in &lessons {
            let changed = tx.execute(
                "INSERT INTO emergency_absences(
                    id, absence_id, owner_id, teacher_id, date, class_id, subject_id,
                    period, reason, origin, session_id, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)
                 ON CONFLICT(owner_id, teacher_id, date, class_id, subject_id, period)
                 WHERE origin = 'absence' DO NOTHING",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    &absence_id,
                    owner_id,
                    teacher_id,
                    &date,
                    &l.class_id,
                    &l.subject_id,
                    l.period as i64,
                    &req.reason,
                    DebtOrigin::Absence.as_str(),
                    &created_at,
                ],
            )?;
            if changed == 0 {
                duplicates += 1;
            } else {
                recorded += 1;
            }
        }
        teachers.push(TeacherAbsence {
            teacher_id: teacher_id.clone(),
            absence_id,
            lessons,
            recorded,
            duplicates,
        });
    }
    tx.commit()?;

    let recorded = teachers.iter().map(|t| t.recorded).sum();
    let duplicates = teachers.iter().map(|t| t.duplicates).sum();
    info!(owner_id, %date, teachers = teachers.len(), recorded, duplicates, "absence recorded");
    Ok(AbsenceReceipt {
        date: req.date,
        teachers,
        recorded,
        duplicates,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceRecord {
    pub absence_id: String,
    pub teacher_id: String,
    pub teacher_name: String,
    pub date: String,
    pub reason: String,
    pub origin: DebtOrigin,
    pub session_id: Option<String>,
    pub lessons: Vec<AffectedLesson>,
}

/// Absences grouped by absence id, ordered by date then teacher name.
pub fn list_absences(conn: &Connection, owner_id: &str, range: &DateRange) -> CoreResult<Vec<AbsenceRecord>> {
    let names = store::name_book(conn, owner_id)?;
    let mut stmt = conn.prepare(
        "SELECT absence_id, teacher_id, date, reason, origin, session_id, class_id, subject_id, period
         FROM emergency_absences
         WHERE owner_id = ?
         ORDER BY date, absence_id, period, class_id",
    )?;
    let rows = stmt
        .query_map([owner_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, String>(7)?,
                r.get::<_, i64>(8)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut grouped: BTreeMap<String, AbsenceRecord> = BTreeMap::new();
    for (absence_id, teacher_id, date, reason, origin, session_id, class_id, subject_id, period) in rows {
        let (Some(day), Some(origin)) = (parse_iso_date(&date), DebtOrigin::parse(&origin)) else {
            warn!(owner_id, %absence_id, %date, %origin, "skipping malformed absence row");
            continue;
        };
        if !range.contains(day) {
            continue;
        }
        let record = grouped.entry(absence_id.clone()).or_insert_with(|| AbsenceRecord {
            absence_id,
            teacher_name: names.teacher(&teacher_id),
            teacher_id,
            date,
            reason,
            origin,
            session_id,
            lessons: Vec::new(),
        });
        record.lessons.push(AffectedLesson {
            class_id,
            subject_id,
            period: period.clamp(0, u8::MAX as i64) as u8,
            teacher_id: None,
        });
    }

    let mut out: Vec<AbsenceRecord> = grouped.into_values().collect();
    out.sort_by(|a, b| {
        (&a.date, &a.teacher_name, &a.absence_id).cmp(&(&b.date, &b.teacher_name, &b.absence_id))
    });
    Ok(out)
}

/// Removes an emergency absence and every debt row it created. Rows produced by makeup
/// sessions are owned by the session and cannot be removed here.
pub fn delete_absence(conn: &Connection, owner_id: &str, absence_id: &str) -> CoreResult<usize> {
    let removed = conn.execute(
        "DELETE FROM emergency_absences WHERE owner_id = ? AND absence_id = ? AND origin = ?",
        (owner_id, absence_id, DebtOrigin::Absence.as_str()),
    )?;
    if removed == 0 {
        return Err(CoreError::not_found("absence"));
    }
    info!(owner_id, absence_id, removed, "absence deleted");
    Ok(removed)
}
