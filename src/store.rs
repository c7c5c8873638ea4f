//! Tenant-scoped entity store over the workspace database.
//!
//! Every read and write here takes the owner id and filters on it; callers never see
//! another tenant's rows.

use rusqlite::{Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::availability::Availability;
use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::model::{Cell, Class, CurriculumEntry, Grade, ScheduleSlot, Shift, Subject, Teacher};

const RULE_BLOCKED: &str = "blocked";
const RULE_PREFERRED: &str = "preferred";

#[derive(Debug, Clone, Copy)]
pub enum Entity {
    Grade,
    Subject,
    Teacher,
    Class,
}

impl Entity {
    fn table(self) -> &'static str {
        match self {
            Self::Grade => "grades",
            Self::Subject => "subjects",
            Self::Teacher => "teachers",
            Self::Class => "classes",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Grade => "grade",
            Self::Subject => "subject",
            Self::Teacher => "teacher",
            Self::Class => "class",
        }
    }
}

pub fn exists(conn: &Connection, owner_id: &str, entity: Entity, id: &str) -> CoreResult<bool> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE id = ? AND owner_id = ?",
        entity.table()
    );
    let found = conn
        .query_row(&sql, (id, owner_id), |r| r.get::<_, i64>(0))
        .optional()?;
    Ok(found.is_some())
}

pub fn ensure_exists(conn: &Connection, owner_id: &str, entity: Entity, id: &str) -> CoreResult<()> {
    if exists(conn, owner_id, entity, id)? {
        Ok(())
    } else {
        Err(CoreError::validation(format!(
            "unknown {} id: {}",
            entity.label(),
            id
        )))
    }
}

// ---- grades ----

pub fn list_grades(conn: &Connection, owner_id: &str) -> CoreResult<Vec<Grade>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, sort_order FROM grades
         WHERE owner_id = ?
         ORDER BY sort_order, name, id",
    )?;
    let rows = stmt
        .query_map([owner_id], |r| {
            Ok(Grade {
                id: r.get(0)?,
                name: r.get(1)?,
                sort_order: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_grade(
    conn: &Connection,
    owner_id: &str,
    name: &str,
    sort_order: Option<i64>,
) -> CoreResult<Grade> {
    let sort_order = match sort_order {
        Some(v) => v,
        None => conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM grades WHERE owner_id = ?",
            [owner_id],
            |r| r.get(0),
        )?,
    };
    let grade = Grade {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        sort_order,
    };
    conn.execute(
        "INSERT INTO grades(id, owner_id, name, sort_order) VALUES(?, ?, ?, ?)",
        (&grade.id, owner_id, &grade.name, grade.sort_order),
    )?;
    Ok(grade)
}

// ---- subjects ----

pub fn list_subjects(conn: &Connection, owner_id: &str) -> CoreResult<Vec<Subject>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, color, weekly_hours FROM subjects
         WHERE owner_id = ?
         ORDER BY name, id",
    )?;
    let rows = stmt
        .query_map([owner_id], |r| {
            Ok(Subject {
                id: r.get(0)?,
                name: r.get(1)?,
                color: r.get(2)?,
                weekly_hours: r.get::<_, i64>(3)?.max(0) as u32,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_subject(
    conn: &Connection,
    owner_id: &str,
    name: &str,
    color: Option<String>,
    weekly_hours: u32,
) -> CoreResult<Subject> {
    if weekly_hours == 0 {
        return Err(CoreError::validation("weeklyHours must be >= 1"));
    }
    let subject = Subject {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        color,
        weekly_hours,
    };
    conn.execute(
        "INSERT INTO subjects(id, owner_id, name, color, weekly_hours) VALUES(?, ?, ?, ?, ?)",
        (
            &subject.id,
            owner_id,
            &subject.name,
            &subject.color,
            subject.weekly_hours as i64,
        ),
    )?;
    Ok(subject)
}

// ---- teachers ----

#[derive(Debug, Clone)]
pub struct NewTeacher {
    pub name: String,
    pub credential_id: Option<String>,
    pub max_weekly_lessons: u32,
    pub subject_ids: BTreeSet<String>,
    pub availability: Availability,
}

#[derive(Debug, Clone, Default)]
pub struct TeacherPatch {
    pub name: Option<String>,
    pub credential_id: Option<Option<String>>,
    pub max_weekly_lessons: Option<u32>,
    pub subject_ids: Option<BTreeSet<String>>,
    pub availability: Option<Availability>,
}

pub fn list_teachers(conn: &Connection, owner_id: &str, active_only: bool) -> CoreResult<Vec<Teacher>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, credential_id, max_weekly_lessons, active FROM teachers
         WHERE owner_id = ? AND (? = 0 OR active = 1)
         ORDER BY name, id",
    )?;
    let mut teachers = stmt
        .query_map((owner_id, active_only as i64), |r| {
            Ok(Teacher {
                id: r.get(0)?,
                name: r.get(1)?,
                credential_id: r.get(2)?,
                max_weekly_lessons: r.get::<_, i64>(3)?.max(0) as u32,
                subject_ids: BTreeSet::new(),
                availability: Availability::default(),
                active: r.get::<_, i64>(4)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_id: HashMap<String, usize> = HashMap::new();
    for (i, t) in teachers.iter().enumerate() {
        by_id.insert(t.id.clone(), i);
    }

    let mut subj_stmt = conn.prepare(
        "SELECT ts.teacher_id, ts.subject_id
         FROM teacher_subjects ts
         JOIN teachers t ON t.id = ts.teacher_id
         WHERE t.owner_id = ?",
    )?;
    let pairs = subj_stmt
        .query_map([owner_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (teacher_id, subject_id) in pairs {
        if let Some(&i) = by_id.get(&teacher_id) {
            teachers[i].subject_ids.insert(subject_id);
        }
    }

    let mut rule_stmt = conn.prepare(
        "SELECT r.teacher_id, r.day, r.period, r.kind
         FROM teacher_slot_rules r
         JOIN teachers t ON t.id = r.teacher_id
         WHERE t.owner_id = ?",
    )?;
    let rules = rule_stmt
        .query_map([owner_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (teacher_id, day, period, kind) in rules {
        let Some(&i) = by_id.get(&teacher_id) else {
            continue;
        };
        let cell = Cell::new(day as u8, period as u8);
        match kind.as_str() {
            RULE_BLOCKED => {
                teachers[i].availability.blocked.insert(cell);
            }
            RULE_PREFERRED => {
                teachers[i].availability.preferred.insert(cell);
            }
            _ => {}
        }
    }

    Ok(teachers)
}

pub fn get_teacher(conn: &Connection, owner_id: &str, teacher_id: &str) -> CoreResult<Option<Teacher>> {
    Ok(list_teachers(conn, owner_id, false)?
        .into_iter()
        .find(|t| t.id == teacher_id))
}

fn write_teacher_links(
    conn: &Connection,
    owner_id: &str,
    teacher_id: &str,
    subject_ids: Option<&BTreeSet<String>>,
    availability: Option<&Availability>,
) -> CoreResult<()> {
    if let Some(subject_ids) = subject_ids {
        for sid in subject_ids {
            ensure_exists(conn, owner_id, Entity::Subject, sid)?;
        }
        conn.execute("DELETE FROM teacher_subjects WHERE teacher_id = ?", [teacher_id])?;
        for sid in subject_ids {
            conn.execute(
                "INSERT INTO teacher_subjects(teacher_id, subject_id) VALUES(?, ?)",
                (teacher_id, sid),
            )?;
        }
    }
    if let Some(availability) = availability {
        conn.execute("DELETE FROM teacher_slot_rules WHERE teacher_id = ?", [teacher_id])?;
        let rules = availability
            .blocked
            .iter()
            .map(|c| (c, RULE_BLOCKED))
            .chain(availability.preferred.iter().map(|c| (c, RULE_PREFERRED)));
        for (cell, kind) in rules {
            conn.execute(
                "INSERT INTO teacher_slot_rules(teacher_id, day, period, kind) VALUES(?, ?, ?, ?)",
                (teacher_id, cell.day as i64, cell.period as i64, kind),
            )?;
        }
    }
    Ok(())
}

pub fn create_teacher(conn: &Connection, owner_id: &str, new: NewTeacher) -> CoreResult<Teacher> {
    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO teachers(id, owner_id, name, credential_id, max_weekly_lessons, active, updated_at)
         VALUES(?, ?, ?, ?, ?, 1, ?)",
        (
            &id,
            owner_id,
            &new.name,
            &new.credential_id,
            new.max_weekly_lessons as i64,
            db::now_ts(),
        ),
    )?;
    write_teacher_links(
        &tx,
        owner_id,
        &id,
        Some(&new.subject_ids),
        Some(&new.availability),
    )?;
    tx.commit()?;
    Ok(Teacher {
        id,
        name: new.name,
        credential_id: new.credential_id,
        max_weekly_lessons: new.max_weekly_lessons,
        subject_ids: new.subject_ids,
        availability: new.availability,
        active: true,
    })
}

pub fn update_teacher(
    conn: &Connection,
    owner_id: &str,
    teacher_id: &str,
    patch: TeacherPatch,
) -> CoreResult<Teacher> {
    if !exists(conn, owner_id, Entity::Teacher, teacher_id)? {
        return Err(CoreError::not_found("teacher"));
    }
    let tx = conn.unchecked_transaction()?;
    if let Some(name) = &patch.name {
        tx.execute(
            "UPDATE teachers SET name = ? WHERE id = ? AND owner_id = ?",
            (name, teacher_id, owner_id),
        )?;
    }
    if let Some(credential_id) = &patch.credential_id {
        tx.execute(
            "UPDATE teachers SET credential_id = ? WHERE id = ? AND owner_id = ?",
            (credential_id, teacher_id, owner_id),
        )?;
    }
    if let Some(max) = patch.max_weekly_lessons {
        tx.execute(
            "UPDATE teachers SET max_weekly_lessons = ? WHERE id = ? AND owner_id = ?",
            (max as i64, teacher_id, owner_id),
        )?;
    }
    write_teacher_links(
        &tx,
        owner_id,
        teacher_id,
        patch.subject_ids.as_ref(),
        patch.availability.as_ref(),
    )?;
    tx.execute(
        "UPDATE teachers SET updated_at = ? WHERE id = ? AND owner_id = ?",
        (db::now_ts(), teacher_id, owner_id),
    )?;
    tx.commit()?;
    get_teacher(conn, owner_id, teacher_id)?.ok_or_else(|| CoreError::not_found("teacher"))
}

/// Teachers are referenced by schedules and debts, so they are only ever deactivated.
pub fn deactivate_teacher(conn: &Connection, owner_id: &str, teacher_id: &str) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE teachers SET active = 0, updated_at = ? WHERE id = ? AND owner_id = ?",
        (db::now_ts(), teacher_id, owner_id),
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("teacher"));
    }
    Ok(())
}

// ---- classes ----

/// Curriculum entry as submitted; `None` hours take the subject's default.
#[derive(Debug, Clone)]
pub struct CurriculumInput {
    pub subject_id: String,
    pub weekly_hours: Option<u32>,
}

pub fn list_classes(conn: &Connection, owner_id: &str) -> CoreResult<Vec<Class>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.grade_id, c.name, c.shift
         FROM classes c
         WHERE c.owner_id = ?
         ORDER BY c.name, c.id",
    )?;
    let raw = stmt
        .query_map([owner_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut cur_stmt = conn.prepare(
        "SELECT cs.class_id, cs.subject_id, COALESCE(cs.weekly_hours, s.weekly_hours)
         FROM class_subjects cs
         JOIN classes c ON c.id = cs.class_id
         JOIN subjects s ON s.id = cs.subject_id
         WHERE c.owner_id = ?
         ORDER BY cs.class_id, cs.subject_id",
    )?;
    let entries = cur_stmt
        .query_map([owner_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                CurriculumEntry {
                    subject_id: r.get(1)?,
                    weekly_hours: r.get::<_, i64>(2)?.max(0) as u32,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut curricula: HashMap<String, Vec<CurriculumEntry>> = HashMap::new();
    for (class_id, entry) in entries {
        curricula.entry(class_id).or_default().push(entry);
    }

    let mut out = Vec::with_capacity(raw.len());
    for (id, grade_id, name, shift) in raw {
        let shift = Shift::parse(&shift).unwrap_or(Shift::Full);
        let curriculum = curricula.remove(&id).unwrap_or_default();
        out.push(Class {
            id,
            grade_id,
            name,
            shift,
            curriculum,
        });
    }
    Ok(out)
}

pub fn get_class(conn: &Connection, owner_id: &str, class_id: &str) -> CoreResult<Option<Class>> {
    Ok(list_classes(conn, owner_id)?
        .into_iter()
        .find(|c| c.id == class_id))
}

fn write_curriculum(
    conn: &Connection,
    owner_id: &str,
    class_id: &str,
    curriculum: &[CurriculumInput],
) -> CoreResult<()> {
    let mut seen = BTreeSet::new();
    for entry in curriculum {
        if !seen.insert(entry.subject_id.as_str()) {
            return Err(CoreError::validation(format!(
                "duplicate subject in curriculum: {}",
                entry.subject_id
            )));
        }
        if entry.weekly_hours == Some(0) {
            return Err(CoreError::validation("weeklyHours must be >= 1"));
        }
        ensure_exists(conn, owner_id, Entity::Subject, &entry.subject_id)?;
    }
    conn.execute("DELETE FROM class_subjects WHERE class_id = ?", [class_id])?;
    for entry in curriculum {
        conn.execute(
            "INSERT INTO class_subjects(class_id, subject_id, weekly_hours) VALUES(?, ?, ?)",
            (
                class_id,
                &entry.subject_id,
                entry.weekly_hours.map(|h| h as i64),
            ),
        )?;
    }
    Ok(())
}

pub fn create_class(
    conn: &Connection,
    owner_id: &str,
    grade_id: &str,
    name: &str,
    shift: Shift,
    curriculum: &[CurriculumInput],
) -> CoreResult<Class> {
    ensure_exists(conn, owner_id, Entity::Grade, grade_id)?;
    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO classes(id, owner_id, grade_id, name, shift) VALUES(?, ?, ?, ?, ?)",
        (&id, owner_id, grade_id, name, shift.as_str()),
    )?;
    write_curriculum(&tx, owner_id, &id, curriculum)?;
    tx.commit()?;
    get_class(conn, owner_id, &id)?.ok_or_else(|| CoreError::not_found("class"))
}

pub fn set_class_subjects(
    conn: &Connection,
    owner_id: &str,
    class_id: &str,
    curriculum: &[CurriculumInput],
) -> CoreResult<Class> {
    if !exists(conn, owner_id, Entity::Class, class_id)? {
        return Err(CoreError::not_found("class"));
    }
    let tx = conn.unchecked_transaction()?;
    write_curriculum(&tx, owner_id, class_id, curriculum)?;
    tx.commit()?;
    get_class(conn, owner_id, class_id)?.ok_or_else(|| CoreError::not_found("class"))
}

// ---- weekly schedule ----

pub fn load_schedule(conn: &Connection, owner_id: &str) -> CoreResult<Vec<ScheduleSlot>> {
    let mut stmt = conn.prepare(
        "SELECT day, period, teacher_id, subject_id, class_id
         FROM schedule_slots
         WHERE owner_id = ?
         ORDER BY day, period, class_id",
    )?;
    let rows = stmt
        .query_map([owner_id], |r| {
            Ok(ScheduleSlot {
                day: r.get::<_, i64>(0)? as u8,
                period: r.get::<_, i64>(1)? as u8,
                teacher_id: r.get(2)?,
                subject_id: r.get(3)?,
                class_id: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Replaces the owner's whole weekly schedule in one transaction.
pub fn replace_schedule(conn: &Connection, owner_id: &str, slots: &[ScheduleSlot]) -> CoreResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM schedule_slots WHERE owner_id = ?", [owner_id])?;
    for s in slots {
        tx.execute(
            "INSERT INTO schedule_slots(owner_id, day, period, teacher_id, subject_id, class_id)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                owner_id,
                s.day as i64,
                s.period as i64,
                &s.teacher_id,
                &s.subject_id,
                &s.class_id,
            ),
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Display names for ids, used to decorate ledger and schedule output.
#[derive(Debug, Clone, Default)]
pub struct NameBook {
    pub teachers: HashMap<String, String>,
    pub subjects: HashMap<String, String>,
    pub classes: HashMap<String, String>,
}

impl NameBook {
    pub fn teacher(&self, id: &str) -> String {
        self.teachers.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    pub fn subject(&self, id: &str) -> String {
        self.subjects.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    pub fn class(&self, id: &str) -> String {
        self.classes.get(id).cloned().unwrap_or_else(|| id.to_string())
    }
}

pub fn name_book(conn: &Connection, owner_id: &str) -> CoreResult<NameBook> {
    let load = |table: &str| -> CoreResult<HashMap<String, String>> {
        let sql = format!("SELECT id, name FROM {} WHERE owner_id = ?", table);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([owner_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    };
    Ok(NameBook {
        teachers: load("teachers")?,
        subjects: load("subjects")?,
        classes: load("classes")?,
    })
}
