use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{self, finish, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::model::Shift;
use crate::store::{self, CurriculumInput};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurriculumParam {
    subject_id: String,
    #[serde(default)]
    weekly_hours: Option<u32>,
}

fn curriculum_param(req: &Request) -> Result<Option<Vec<CurriculumInput>>, Value> {
    Ok(helpers::optional_json::<Vec<CurriculumParam>>(req, "subjects")?.map(|entries| {
        entries
            .into_iter()
            .map(|e| CurriculumInput {
                subject_id: e.subject_id,
                weekly_hours: e.weekly_hours,
            })
            .collect()
    }))
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let classes = store::list_classes(conn, owner_id).map_err(helpers::core(req))?;
    Ok(ok(&req.id, json!({ "classes": classes })))
}

fn handle_classes_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let class_id = helpers::required_str(req, "classId")?;
    let Some(class) = store::get_class(conn, owner_id, class_id).map_err(helpers::core(req))? else {
        return Err(err(&req.id, "not_found", "class not found", None));
    };
    Ok(ok(&req.id, json!({ "class": class })))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let grade_id = helpers::required_str(req, "gradeId")?;
    let name = helpers::required_str(req, "name")?;
    let shift = match helpers::optional_str(req, "shift")? {
        None => Shift::Full,
        Some(raw) => Shift::parse(raw).ok_or_else(|| {
            helpers::bad_params(req, "shift must be one of: morning, afternoon, evening, full")
        })?,
    };
    let curriculum = curriculum_param(req)?.unwrap_or_default();
    let class = store::create_class(conn, owner_id, grade_id, name, shift, &curriculum)
        .map_err(helpers::core(req))?;
    info!(owner_id, class_id = %class.id, subjects = class.curriculum.len(), "class created");
    Ok(ok(&req.id, json!({ "classId": class.id, "class": class })))
}

fn handle_classes_set_subjects(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let class_id = helpers::required_str(req, "classId")?;
    let Some(curriculum) = curriculum_param(req)? else {
        return Err(helpers::bad_params(req, "missing params.subjects"));
    };
    let class = store::set_class_subjects(conn, owner_id, class_id, &curriculum)
        .map_err(helpers::core(req))?;
    info!(owner_id, class_id, subjects = class.curriculum.len(), "class curriculum replaced");
    Ok(ok(&req.id, json!({ "class": class })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(finish(handle_classes_list(state, req))),
        "classes.get" => Some(finish(handle_classes_get(state, req))),
        "classes.create" => Some(finish(handle_classes_create(state, req))),
        "classes.setSubjects" => Some(finish(handle_classes_set_subjects(state, req))),
        _ => None,
    }
}
