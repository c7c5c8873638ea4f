//! # Makeup sessions
//!
//! A makeup session is a short block of periods (usually a Saturday) in which teachers
//! deliver lessons they owe.
//!
//! ## Algorithm
//!
//! Teachers are visited in ledger order. For each teacher, each debt line places up to
//! `missed_lessons` slots in the line's class, always at the earliest period that is free
//! for both the class and the teacher. A line stops when it is exhausted or the class has
//! `max_periods` slots. Whatever does not fit stays in the ledger and is reported as
//! unresolved.

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::ledger::{self, DateRange, LedgerOptions, TeacherDebt};
use crate::model::{
    parse_iso_date, DebtOrigin, MakeupMode, MakeupSession, MakeupSlot, SessionStatus,
    MAX_PERIODS_PER_DAY,
};

pub const DEFAULT_MAKEUP_PERIODS: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedDebt {
    pub teacher_id: String,
    pub subject_id: String,
    pub class_id: String,
    pub lessons: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MakeupPlan {
    pub schedule: BTreeMap<String, Vec<MakeupSlot>>,
    pub unresolved: Vec<UnresolvedDebt>,
    pub assigned: u32,
}

impl MakeupPlan {
    pub fn unresolved_lessons(&self) -> u32 {
        self.unresolved.iter().map(|u| u.lessons).sum()
    }
}

/// Places ledger debt into a `max_periods`-long grid.
pub fn plan_makeup(debts: &[TeacherDebt], max_periods: u8) -> MakeupPlan {
    let mut plan = MakeupPlan::default();
    let mut teacher_busy: HashMap<&str, BTreeSet<u8>> = HashMap::new();
    let mut class_busy: HashMap<&str, BTreeSet<u8>> = HashMap::new();

    for debt in debts {
        for line in &debt.lines {
            let mut remaining = line.missed_lessons;
            while remaining > 0 {
                let class_periods = class_busy.entry(line.class_id.as_str()).or_default();
                if class_periods.len() >= max_periods as usize {
                    break;
                }
                let teacher_periods = teacher_busy.entry(debt.teacher_id.as_str()).or_default();
                let free = (1..=max_periods)
                    .find(|p| !class_periods.contains(p) && !teacher_periods.contains(p));
                let Some(period) = free else {
                    break;
                };
                class_periods.insert(period);
                teacher_periods.insert(period);
                plan.schedule
                    .entry(line.class_id.clone())
                    .or_default()
                    .push(MakeupSlot {
                        teacher_id: debt.teacher_id.clone(),
                        subject_id: line.subject_id.clone(),
                        class_id: line.class_id.clone(),
                        period,
                    });
                plan.assigned += 1;
                remaining -= 1;
            }
            if remaining > 0 {
                plan.unresolved.push(UnresolvedDebt {
                    teacher_id: debt.teacher_id.clone(),
                    subject_id: line.subject_id.clone(),
                    class_id: line.class_id.clone(),
                    lessons: remaining,
                });
            }
        }
    }
    for slots in plan.schedule.values_mut() {
        slots.sort_by_key(|s| s.period);
    }
    plan
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub date: NaiveDate,
    pub max_periods: u8,
    pub mode: MakeupMode,
    /// Debt window for manual mode. Auto mode always uses everything up to `date`.
    pub window: DateRange,
    /// Plan only; nothing is written.
    pub preview: bool,
}

impl GenerateRequest {
    fn ledger_options(&self) -> CoreResult<LedgerOptions> {
        match self.mode {
            MakeupMode::Auto => Ok(LedgerOptions {
                range: DateRange::new(None, Some(self.date)),
                include_accumulated: true,
            }),
            MakeupMode::Manual => {
                let (Some(start), Some(end)) = (self.window.start, self.window.end) else {
                    return Err(CoreError::validation(
                        "manual generation needs startDate and endDate",
                    ));
                };
                if start > end {
                    return Err(CoreError::validation("startDate must not be after endDate"));
                }
                Ok(LedgerOptions {
                    range: DateRange::new(Some(start), Some(end)),
                    include_accumulated: false,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOutcome {
    /// `None` for previews.
    pub session: Option<MakeupSession>,
    pub plan: MakeupPlan,
}

pub fn generate_session(conn: &Connection, owner_id: &str, req: &GenerateRequest) -> CoreResult<GenerateOutcome> {
    if req.max_periods == 0 || req.max_periods > MAX_PERIODS_PER_DAY {
        return Err(CoreError::validation(format!(
            "maxPeriods must be between 1 and {}",
            MAX_PERIODS_PER_DAY
        )));
    }
    let opts = req.ledger_options()?;
    let debts = ledger::teacher_debts(conn, owner_id, &opts)?;
    let plan = plan_makeup(&debts, req.max_periods);

    if req.preview {
        return Ok(GenerateOutcome { session: None, plan });
    }

    let session = MakeupSession {
        id: Uuid::new_v4().to_string(),
        date: req.date,
        max_periods: req.max_periods,
        mode: req.mode,
        status: SessionStatus::Planned,
        schedule: plan.schedule.clone(),
        attended_teacher_ids: BTreeSet::new(),
        processed_at: None,
    };
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO makeup_sessions(id, owner_id, date, max_periods, mode, status, created_at, processed_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, NULL)",
        (
            &session.id,
            owner_id,
            session.date.format("%Y-%m-%d").to_string(),
            session.max_periods as i64,
            session.mode.as_str(),
            session.status.as_str(),
            db::now_ts(),
        ),
    )?;
    for slot in session.slots() {
        tx.execute(
            "INSERT INTO makeup_slots(session_id, class_id, period, teacher_id, subject_id)
             VALUES(?, ?, ?, ?, ?)",
            (
                &session.id,
                &slot.class_id,
                slot.period as i64,
                &slot.teacher_id,
                &slot.subject_id,
            ),
        )?;
    }
    tx.commit()?;

    info!(
        owner_id,
        session_id = %session.id,
        mode = session.mode.as_str(),
        assigned = plan.assigned,
        unresolved = plan.unresolved_lessons(),
        "makeup session generated"
    );
    Ok(GenerateOutcome {
        session: Some(session),
        plan,
    })
}

struct SessionRow {
    id: String,
    date: String,
    max_periods: i64,
    mode: String,
    status: String,
    processed_at: Option<String>,
}

fn hydrate(conn: &Connection, row: SessionRow) -> CoreResult<MakeupSession> {
    let date = parse_iso_date(&row.date)
        .ok_or_else(|| CoreError::invalid_state(format!("session {} has a malformed date", row.id)))?;
    let (Some(mode), Some(status)) = (MakeupMode::parse(&row.mode), SessionStatus::parse(&row.status)) else {
        warn!(session_id = %row.id, mode = %row.mode, status = %row.status, "malformed makeup session row");
        return Err(CoreError::invalid_state(format!(
            "session {} has unknown mode or status",
            row.id
        )));
    };

    let mut slot_stmt = conn.prepare(
        "SELECT teacher_id, subject_id, class_id, period
         FROM makeup_slots
         WHERE session_id = ?
         ORDER BY class_id, period",
    )?;
    let slots = slot_stmt
        .query_map([&row.id], |r| {
            Ok(MakeupSlot {
                teacher_id: r.get(0)?,
                subject_id: r.get(1)?,
                class_id: r.get(2)?,
                period: r.get::<_, i64>(3)? as u8,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut schedule: BTreeMap<String, Vec<MakeupSlot>> = BTreeMap::new();
    for s in slots {
        schedule.entry(s.class_id.clone()).or_default().push(s);
    }

    let mut att_stmt = conn.prepare(
        "SELECT teacher_id FROM makeup_attendance WHERE session_id = ? ORDER BY teacher_id",
    )?;
    let attended_teacher_ids = att_stmt
        .query_map([&row.id], |r| r.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;

    Ok(MakeupSession {
        id: row.id,
        date,
        max_periods: row.max_periods.clamp(0, u8::MAX as i64) as u8,
        mode,
        status,
        schedule,
        attended_teacher_ids,
        processed_at: row.processed_at,
    })
}

pub fn load_session(conn: &Connection, owner_id: &str, session_id: &str) -> CoreResult<Option<MakeupSession>> {
    let row = conn
        .query_row(
            "SELECT id, date, max_periods, mode, status, processed_at
             FROM makeup_sessions
             WHERE id = ? AND owner_id = ?",
            (session_id, owner_id),
            |r| {
                Ok(SessionRow {
                    id: r.get(0)?,
                    date: r.get(1)?,
                    max_periods: r.get(2)?,
                    mode: r.get(3)?,
                    status: r.get(4)?,
                    processed_at: r.get(5)?,
                })
            },
        )
        .optional()?;
    match row {
        Some(row) => Ok(Some(hydrate(conn, row)?)),
        None => Ok(None),
    }
}

/// Sessions newest first.
pub fn list_sessions(
    conn: &Connection,
    owner_id: &str,
    status: Option<SessionStatus>,
) -> CoreResult<Vec<MakeupSession>> {
    let mut stmt = conn.prepare(
        "SELECT id, date, max_periods, mode, status, processed_at
         FROM makeup_sessions
         WHERE owner_id = ? AND (? IS NULL OR status = ?)
         ORDER BY date DESC, created_at DESC, id",
    )?;
    let status = status.map(|s| s.as_str());
    let rows = stmt
        .query_map((owner_id, status, status), |r| {
            Ok(SessionRow {
                id: r.get(0)?,
                date: r.get(1)?,
                max_periods: r.get(2)?,
                mode: r.get(3)?,
                status: r.get(4)?,
                processed_at: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(|row| hydrate(conn, row)).collect()
}

/// planned -> cancelled. Attendance recorded so far stops counting as credit.
pub fn cancel_session(conn: &Connection, owner_id: &str, session_id: &str) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE makeup_sessions SET status = 'cancelled'
         WHERE id = ? AND owner_id = ? AND status = 'planned'",
        (session_id, owner_id),
    )?;
    if changed == 0 {
        let current = load_session(conn, owner_id, session_id)?
            .ok_or_else(|| CoreError::not_found("makeup session"))?;
        warn!(owner_id, session_id, status = current.status.as_str(), "cancel rejected");
        return Err(CoreError::invalid_state(format!(
            "only planned sessions can be cancelled (status is {})",
            current.status.as_str()
        )));
    }
    info!(owner_id, session_id, "makeup session cancelled");
    Ok(())
}

/// Removes a session in any status, together with the debt its absentees accrued.
pub fn delete_session(conn: &Connection, owner_id: &str, session_id: &str) -> CoreResult<()> {
    let tx = conn.unchecked_transaction()?;
    let found: Option<String> = tx
        .query_row(
            "SELECT id FROM makeup_sessions WHERE id = ? AND owner_id = ?",
            (session_id, owner_id),
            |r| r.get(0),
        )
        .optional()?;
    if found.is_none() {
        return Err(CoreError::not_found("makeup session"));
    }
    let accrued = tx.execute(
        "DELETE FROM emergency_absences WHERE owner_id = ? AND session_id = ? AND origin = ?",
        (owner_id, session_id, DebtOrigin::MakeupAbsence.as_str()),
    )?;
    tx.execute("DELETE FROM makeup_attendance WHERE session_id = ?", [session_id])?;
    tx.execute("DELETE FROM makeup_slots WHERE session_id = ?", [session_id])?;
    tx.execute(
        "DELETE FROM makeup_sessions WHERE id = ? AND owner_id = ?",
        (session_id, owner_id),
    )?;
    tx.commit()?;
    info!(owner_id, session_id, accrued_removed = accrued, "makeup session deleted");
    Ok(())
}
