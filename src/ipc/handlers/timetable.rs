use crate::ipc::error::ok;
use crate::ipc::helpers::{self, finish, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::settings;
use crate::store;
use crate::timetable::{self, BuildInput};
use serde_json::json;
use tracing::{info, warn};

fn handle_generate(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let persist = helpers::optional_bool(req, "persist")?.unwrap_or(true);
    let cfg = settings::load_timetable_settings(conn, owner_id).map_err(helpers::db_failed(req))?;

    let grades = store::list_grades(conn, owner_id).map_err(helpers::core(req))?;
    let subjects = store::list_subjects(conn, owner_id).map_err(helpers::core(req))?;
    let classes = store::list_classes(conn, owner_id).map_err(helpers::core(req))?;
    let teachers = store::list_teachers(conn, owner_id, false).map_err(helpers::core(req))?;

    let outcome = timetable::build_weekly_schedule(&BuildInput {
        grid: cfg.grid,
        grades: &grades,
        subjects: &subjects,
        classes: &classes,
        teachers: &teachers,
        repair_budget: cfg.repair_budget,
    });
    if persist {
        store::replace_schedule(conn, owner_id, &outcome.slots).map_err(helpers::core(req))?;
    }
    let total_shortfall = outcome.total_shortfall();
    if total_shortfall > 0 {
        warn!(owner_id, total_shortfall, "timetable has unplaced lessons");
    }
    info!(
        owner_id,
        slots = outcome.slots.len(),
        repairs = outcome.repairs_used,
        persist,
        "timetable generated"
    );
    Ok(ok(
        &req.id,
        json!({
            "grid": cfg.grid,
            "slots": outcome.slots,
            "shortfalls": outcome.shortfalls,
            "totalShortfall": total_shortfall,
            "repairsUsed": outcome.repairs_used,
            "fingerprint": outcome.fingerprint(),
            "persisted": persist
        }),
    ))
}

fn handle_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let mut slots = store::load_schedule(conn, owner_id).map_err(helpers::core(req))?;
    slots.sort_by(|a, b| (a.cell(), &a.class_id).cmp(&(b.cell(), &b.class_id)));
    let conflicts = timetable::find_conflicts(&slots);
    let names = store::name_book(conn, owner_id).map_err(helpers::core(req))?;
    let rows: Vec<serde_json::Value> = slots
        .iter()
        .map(|s| {
            json!({
                "day": s.day,
                "period": s.period,
                "teacherId": s.teacher_id,
                "teacherName": names.teacher(&s.teacher_id),
                "subjectId": s.subject_id,
                "subjectName": names.subject(&s.subject_id),
                "classId": s.class_id,
                "className": names.class(&s.class_id),
            })
        })
        .collect();
    Ok(ok(
        &req.id,
        json!({
            "slots": rows,
            "fingerprint": timetable::fingerprint(&slots),
            "conflicts": conflicts
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "timetable.generate" => Some(finish(handle_generate(state, req))),
        "timetable.get" => Some(finish(handle_get(state, req))),
        _ => None,
    }
}
