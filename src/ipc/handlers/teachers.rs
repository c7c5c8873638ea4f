use crate::availability::{self, Availability};
use crate::ipc::error::ok;
use crate::ipc::helpers::{self, finish, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::model::{GridShape, MAX_DAYS_PER_WEEK, MAX_PERIODS_PER_DAY};
use crate::settings;
use crate::store::{self, NewTeacher, TeacherPatch};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::info;

const DEFAULT_MAX_WEEKLY_LESSONS: i64 = 30;
const MAX_WEEKLY_LESSONS: i64 = MAX_DAYS_PER_WEEK as i64 * MAX_PERIODS_PER_DAY as i64;

fn grid_for(conn: &Connection, owner_id: &str, req: &Request) -> Result<GridShape, Value> {
    settings::load_timetable_settings(conn, owner_id)
        .map(|s| s.grid)
        .map_err(helpers::db_failed(req))
}

/// Structured `availability` wins; free-text `notes` is parsed only when it is absent.
fn availability_param(req: &Request, grid: &GridShape) -> Result<Option<Availability>, Value> {
    if let Some(a) = helpers::optional_json::<Availability>(req, "availability")? {
        return Ok(Some(a.normalized(grid)));
    }
    Ok(helpers::optional_str(req, "notes")?.map(|notes| availability::parse_notes(notes, grid)))
}

fn subject_ids_param(req: &Request) -> Result<Option<BTreeSet<String>>, Value> {
    Ok(helpers::string_list(req, "subjectIds")?.map(|v| v.into_iter().collect()))
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let include_inactive = helpers::optional_bool(req, "includeInactive")?.unwrap_or(false);
    let teachers = store::list_teachers(conn, owner_id, !include_inactive).map_err(helpers::core(req))?;
    Ok(ok(&req.id, json!({ "teachers": teachers })))
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let name = helpers::required_str(req, "name")?;
    let grid = grid_for(conn, owner_id, req)?;
    let new = NewTeacher {
        name: name.to_string(),
        credential_id: helpers::optional_str(req, "credentialId")?.map(str::to_string),
        max_weekly_lessons: helpers::optional_int_range(req, "maxWeeklyLessons", 0, MAX_WEEKLY_LESSONS)?
            .unwrap_or(DEFAULT_MAX_WEEKLY_LESSONS) as u32,
        subject_ids: subject_ids_param(req)?.unwrap_or_default(),
        availability: availability_param(req, &grid)?.unwrap_or_default(),
    };
    let teacher = store::create_teacher(conn, owner_id, new).map_err(helpers::core(req))?;
    info!(owner_id, teacher_id = %teacher.id, "teacher created");
    Ok(ok(&req.id, json!({ "teacherId": teacher.id, "teacher": teacher })))
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let teacher_id = helpers::required_str(req, "teacherId")?;
    let grid = grid_for(conn, owner_id, req)?;
    let credential_id = match req.params.get("credentialId") {
        None => None,
        Some(Value::Null) => Some(None),
        Some(_) => Some(helpers::optional_str(req, "credentialId")?.map(str::to_string)),
    };
    let patch = TeacherPatch {
        name: helpers::optional_str(req, "name")?.map(str::to_string),
        credential_id,
        max_weekly_lessons: helpers::optional_int_range(req, "maxWeeklyLessons", 0, MAX_WEEKLY_LESSONS)?
            .map(|n| n as u32),
        subject_ids: subject_ids_param(req)?,
        availability: availability_param(req, &grid)?,
    };
    let teacher = store::update_teacher(conn, owner_id, teacher_id, patch).map_err(helpers::core(req))?;
    info!(owner_id, teacher_id, "teacher updated");
    Ok(ok(&req.id, json!({ "teacher": teacher })))
}

fn handle_teachers_deactivate(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let teacher_id = helpers::required_str(req, "teacherId")?;
    store::deactivate_teacher(conn, owner_id, teacher_id).map_err(helpers::core(req))?;
    info!(owner_id, teacher_id, "teacher deactivated");
    Ok(ok(&req.id, json!({ "ok": true })))
}

/// Preview of what a free-text note would become; nothing is saved.
fn handle_parse_notes(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let notes = helpers::required_str(req, "notes")?;
    let grid = grid_for(conn, owner_id, req)?;
    let parsed = availability::parse_notes(notes, &grid);
    Ok(ok(&req.id, json!({ "availability": parsed, "grid": grid })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(finish(handle_teachers_list(state, req))),
        "teachers.create" => Some(finish(handle_teachers_create(state, req))),
        "teachers.update" => Some(finish(handle_teachers_update(state, req))),
        "teachers.deactivate" => Some(finish(handle_teachers_deactivate(state, req))),
        "availability.parseNotes" => Some(finish(handle_parse_notes(state, req))),
        _ => None,
    }
}
