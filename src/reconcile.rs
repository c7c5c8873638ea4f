//! Attendance at makeup sessions and the one-way `planned -> realized` transition.
//!
//! Credit for attended slots is not written anywhere: the ledger derives it from the
//! attendance set. Processing only adds debt, for teachers who were scheduled but stayed
//! away.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::makeup;
use crate::model::{DebtOrigin, MakeupSession, MakeupSlot, SessionStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub total_realized_hours: u32,
    pub attended_teachers: Vec<String>,
    pub absent_teachers: Vec<String>,
    /// Slots of absent teachers; each becomes one accumulated debt unit.
    #[serde(skip)]
    pub accrued: Vec<MakeupSlot>,
    pub accrued_lessons: u32,
}

/// Splits a session's slots by attendance.
pub fn settle(session: &MakeupSession) -> Settlement {
    let scheduled = session.scheduled_teachers();
    let (attended, absent): (Vec<String>, Vec<String>) = scheduled
        .into_iter()
        .partition(|t| session.attended_teacher_ids.contains(t));

    let mut total_realized_hours = 0;
    let mut accrued = Vec::new();
    for slot in session.slots() {
        if session.attended_teacher_ids.contains(&slot.teacher_id) {
            total_realized_hours += 1;
        } else {
            accrued.push(slot.clone());
        }
    }
    accrued.sort();
    Settlement {
        total_realized_hours,
        attended_teachers: attended,
        absent_teachers: absent,
        accrued_lessons: accrued.len() as u32,
        accrued,
    }
}

fn planned_session(conn: &Connection, owner_id: &str, session_id: &str) -> CoreResult<MakeupSession> {
    let Some(session) = makeup::load_session(conn, owner_id, session_id)? else {
        return Err(CoreError::invalid_state(format!(
            "makeup session {} does not exist",
            session_id
        )));
    };
    if session.status != SessionStatus::Planned {
        warn!(owner_id, session_id, status = session.status.as_str(), "session is not planned");
        return Err(CoreError::invalid_state(format!(
            "session is {}, only planned sessions accept changes",
            session.status.as_str()
        )));
    }
    Ok(session)
}

/// Marks or unmarks one scheduled teacher as present. Repeating a call changes nothing.
pub fn set_attendance(
    conn: &Connection,
    owner_id: &str,
    session_id: &str,
    teacher_id: &str,
    attended: bool,
) -> CoreResult<MakeupSession> {
    let session = planned_session(conn, owner_id, session_id)?;
    if !session.scheduled_teachers().contains(teacher_id) {
        return Err(CoreError::validation(format!(
            "teacher {} is not scheduled in this session",
            teacher_id
        )));
    }
    if attended {
        conn.execute(
            "INSERT INTO makeup_attendance(session_id, teacher_id) VALUES(?, ?)
             ON CONFLICT(session_id, teacher_id) DO NOTHING",
            (session_id, teacher_id),
        )?;
    } else {
        conn.execute(
            "DELETE FROM makeup_attendance WHERE session_id = ? AND teacher_id = ?",
            (session_id, teacher_id),
        )?;
    }
    info!(owner_id, session_id, teacher_id, attended, "attendance updated");
    makeup::load_session(conn, owner_id, session_id)?
        .ok_or_else(|| CoreError::not_found("makeup session"))
}

/// Finalizes a planned session.
///
/// The status flip is a conditional update inside the same transaction as the debt
/// inserts, so a second call (or a racing one) changes zero rows and writes nothing.
pub fn process_session(
    conn: &Connection,
    owner_id: &str,
    session_id: &str,
    confirm_no_attendance: bool,
) -> CoreResult<Settlement> {
    let tx = conn.unchecked_transaction()?;
    let session = planned_session(&tx, owner_id, session_id)?;
    if session.attended_teacher_ids.is_empty() && !confirm_no_attendance {
        return Err(CoreError::validation(
            "no teacher is marked as attended; pass confirmNoAttendance to process anyway",
        ));
    }

    let processed_at = db::now_ts();
    let changed = tx.execute(
        "UPDATE makeup_sessions SET status = 'realized', processed_at = ?
         WHERE id = ? AND owner_id = ? AND status = 'planned'",
        (&processed_at, session_id, owner_id),
    )?;
    if changed == 0 {
        warn!(owner_id, session_id, "session was processed concurrently");
        return Err(CoreError::invalid_state("session was already processed"));
    }

    let mut settlement = settle(&session);
    let date = session.date.format("%Y-%m-%d").to_string();
    let mut absence_ids: HashMap<&str, String> = HashMap::new();
    let mut inserted = 0usize;
    for slot in &settlement.accrued {
        let absence_id = absence_ids
            .entry(slot.teacher_id.as_str())
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        inserted += tx.execute(
            "INSERT INTO emergency_absences(
                id, absence_id, owner_id, teacher_id, date, class_id, subject_id,
                period, reason, origin, session_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id, teacher_id, class_id, period)
             WHERE origin = 'makeup_absence' DO NOTHING",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                absence_id,
                owner_id,
                &slot.teacher_id,
                &date,
                &slot.class_id,
                &slot.subject_id,
                slot.period as i64,
                "absent from makeup session",
                DebtOrigin::MakeupAbsence.as_str(),
                session_id,
                &processed_at,
            ],
        )?;
    }
    tx.commit()?;
    settlement.accrued_lessons = inserted as u32;

    info!(
        owner_id,
        session_id,
        realized = settlement.total_realized_hours,
        absent = settlement.absent_teachers.len(),
        accrued = settlement.accrued_lessons,
        "makeup session processed"
    );
    Ok(settlement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn slot(teacher: &str, class: &str, period: u8) -> MakeupSlot {
        MakeupSlot {
            teacher_id: teacher.into(),
            subject_id: "S".into(),
            class_id: class.into(),
            period,
        }
    }

    fn session(slots: Vec<MakeupSlot>, attended: &[&str]) -> MakeupSession {
        let mut schedule: BTreeMap<String, Vec<MakeupSlot>> = BTreeMap::new();
        for s in slots {
            schedule.entry(s.class_id.clone()).or_default().push(s);
        }
        MakeupSession {
            id: "sess".into(),
            date: NaiveDate::from_ymd_opt(2025, 3, 8).expect("date"),
            max_periods: 4,
            mode: crate::model::MakeupMode::Auto,
            status: SessionStatus::Planned,
            schedule,
            attended_teacher_ids: attended.iter().map(|s| s.to_string()).collect(),
            processed_at: None,
        }
    }

    #[test]
    fn settle_splits_attended_and_absent() {
        let s = session(
            vec![slot("T1", "A", 1), slot("T1", "A", 2), slot("T2", "B", 1)],
            &["T1"],
        );
        let out = settle(&s);
        assert_eq!(out.total_realized_hours, 2);
        assert_eq!(out.attended_teachers, vec!["T1".to_string()]);
        assert_eq!(out.absent_teachers, vec!["T2".to_string()]);
        assert_eq!(out.accrued_lessons, 1);
        assert_eq!(out.accrued[0].class_id, "B");
    }

    #[test]
    fn nobody_attending_turns_every_slot_into_debt() {
        let s = session(vec![slot("T1", "A", 1), slot("T2", "A", 2)], &[]);
        let out = settle(&s);
        assert_eq!(out.total_realized_hours, 0);
        assert!(out.attended_teachers.is_empty());
        assert_eq!(out.accrued_lessons, 2);
    }
}
