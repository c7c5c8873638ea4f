use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{self, finish, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::makeup::{self, GenerateRequest};
use crate::model::{MakeupMode, SessionStatus, MAX_PERIODS_PER_DAY};
use crate::reconcile;
use crate::settings;
use serde_json::json;

fn handle_generate(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let date = helpers::required_date(req, "date")?;
    let mode = match helpers::optional_str(req, "mode")? {
        None => MakeupMode::Auto,
        Some(raw) => MakeupMode::parse(raw)
            .ok_or_else(|| helpers::bad_params(req, "mode must be one of: auto, manual"))?,
    };
    let max_periods = match helpers::optional_int_range(req, "maxPeriods", 1, MAX_PERIODS_PER_DAY as i64)? {
        Some(n) => n as u8,
        None => settings::load_makeup_periods(conn, owner_id).map_err(helpers::db_failed(req))?,
    };
    let window = helpers::date_range(req)?;
    let preview = helpers::optional_bool(req, "preview")?.unwrap_or(false);

    let outcome = makeup::generate_session(
        conn,
        owner_id,
        &GenerateRequest {
            date,
            max_periods,
            mode,
            window,
            preview,
        },
    )
    .map_err(helpers::core(req))?;
    Ok(ok(
        &req.id,
        json!({
            "session": outcome.session,
            "schedule": outcome.plan.schedule,
            "assigned": outcome.plan.assigned,
            "unresolved": outcome.plan.unresolved,
            "unresolvedLessons": outcome.plan.unresolved_lessons(),
            "preview": preview
        }),
    ))
}

fn handle_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let status = match helpers::optional_str(req, "status")? {
        None => None,
        Some(raw) => Some(SessionStatus::parse(raw).ok_or_else(|| {
            helpers::bad_params(req, "status must be one of: planned, realized, cancelled")
        })?),
    };
    let sessions = makeup::list_sessions(conn, owner_id, status).map_err(helpers::core(req))?;
    Ok(ok(&req.id, json!({ "sessions": sessions })))
}

fn handle_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let session_id = helpers::required_str(req, "sessionId")?;
    let Some(session) = makeup::load_session(conn, owner_id, session_id).map_err(helpers::core(req))? else {
        return Err(err(&req.id, "not_found", "makeup session not found", None));
    };
    Ok(ok(&req.id, json!({ "session": session })))
}

fn handle_cancel(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let session_id = helpers::required_str(req, "sessionId")?;
    makeup::cancel_session(conn, owner_id, session_id).map_err(helpers::core(req))?;
    Ok(ok(&req.id, json!({ "ok": true })))
}

fn handle_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let session_id = helpers::required_str(req, "sessionId")?;
    makeup::delete_session(conn, owner_id, session_id).map_err(helpers::core(req))?;
    Ok(ok(&req.id, json!({ "ok": true })))
}

fn handle_set_attendance(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let session_id = helpers::required_str(req, "sessionId")?;
    let teacher_id = helpers::required_str(req, "teacherId")?;
    let attended = helpers::required_bool(req, "attended")?;
    let session = reconcile::set_attendance(conn, owner_id, session_id, teacher_id, attended)
        .map_err(helpers::core(req))?;
    Ok(ok(&req.id, json!({ "session": session })))
}

fn handle_process(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let session_id = helpers::required_str(req, "sessionId")?;
    let confirm = helpers::optional_bool(req, "confirmNoAttendance")?.unwrap_or(false);
    let settlement =
        reconcile::process_session(conn, owner_id, session_id, confirm).map_err(helpers::core(req))?;
    Ok(ok(&req.id, json!(settlement)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "makeup.generate" => Some(finish(handle_generate(state, req))),
        "makeup.list" => Some(finish(handle_list(state, req))),
        "makeup.get" => Some(finish(handle_get(state, req))),
        "makeup.cancel" => Some(finish(handle_cancel(state, req))),
        "makeup.delete" => Some(finish(handle_delete(state, req))),
        "makeup.setAttendance" => Some(finish(handle_set_attendance(state, req))),
        "makeup.process" => Some(finish(handle_process(state, req))),
        _ => None,
    }
}
