use crate::ipc::error::ok;
use crate::ipc::helpers::{self, finish, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;
use tracing::info;

fn handle_grades_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let grades = store::list_grades(conn, owner_id).map_err(helpers::core(req))?;
    Ok(ok(&req.id, json!({ "grades": grades })))
}

fn handle_grades_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let name = helpers::required_str(req, "name")?;
    let sort_order = helpers::optional_int_range(req, "sortOrder", i64::MIN, i64::MAX)?;
    let grade = store::create_grade(conn, owner_id, name, sort_order).map_err(helpers::core(req))?;
    info!(owner_id, grade_id = %grade.id, "grade created");
    Ok(ok(&req.id, json!({ "gradeId": grade.id, "grade": grade })))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let subjects = store::list_subjects(conn, owner_id).map_err(helpers::core(req))?;
    Ok(ok(&req.id, json!({ "subjects": subjects })))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let name = helpers::required_str(req, "name")?;
    let color = helpers::optional_str(req, "color")?.map(str::to_string);
    let weekly_hours = helpers::optional_int_range(req, "weeklyHours", 1, 72)?.unwrap_or(1) as u32;
    let subject =
        store::create_subject(conn, owner_id, name, color, weekly_hours).map_err(helpers::core(req))?;
    info!(owner_id, subject_id = %subject.id, "subject created");
    Ok(ok(&req.id, json!({ "subjectId": subject.id, "subject": subject })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(finish(handle_grades_list(state, req))),
        "grades.create" => Some(finish(handle_grades_create(state, req))),
        "subjects.list" => Some(finish(handle_subjects_list(state, req))),
        "subjects.create" => Some(finish(handle_subjects_create(state, req))),
        _ => None,
    }
}
