use crate::absence::{self, AbsenceRequest};
use crate::ipc::error::ok;
use crate::ipc::helpers::{self, finish, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::model::AffectedLesson;
use serde_json::json;

fn handle_record(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let date = helpers::required_date(req, "date")?;
    let teacher_ids = match helpers::string_list(req, "teacherIds")? {
        Some(ids) => ids,
        None => vec![helpers::required_str(req, "teacherId")?.to_string()],
    };
    let reason = helpers::optional_str(req, "reason")?.unwrap_or("").trim().to_string();
    let affected = helpers::optional_json::<Vec<AffectedLesson>>(req, "lessons")?;

    let receipt = absence::record_absence(
        conn,
        owner_id,
        &AbsenceRequest {
            date,
            teacher_ids,
            reason,
            affected,
        },
    )
    .map_err(helpers::core(req))?;
    Ok(ok(&req.id, json!(receipt)))
}

fn handle_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let range = helpers::date_range(req)?;
    let absences = absence::list_absences(conn, owner_id, &range).map_err(helpers::core(req))?;
    Ok(ok(&req.id, json!({ "absences": absences })))
}

fn handle_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let absence_id = helpers::required_str(req, "absenceId")?;
    let removed = absence::delete_absence(conn, owner_id, absence_id).map_err(helpers::core(req))?;
    Ok(ok(&req.id, json!({ "removedLessons": removed })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "absences.record" => Some(finish(handle_record(state, req))),
        "absences.list" => Some(finish(handle_list(state, req))),
        "absences.delete" => Some(finish(handle_delete(state, req))),
        _ => None,
    }
}
