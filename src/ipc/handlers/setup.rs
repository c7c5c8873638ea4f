use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{self, finish, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::settings::{self, SetupSection};
use serde_json::{Map, Value};
use tracing::info;

fn handle_setup_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let mut out = Map::new();
    for section in SetupSection::ALL {
        let value = settings::load_section(conn, owner_id, section).map_err(helpers::db_failed(req))?;
        out.insert(section.name().to_string(), value);
    }
    Ok(ok(&req.id, Value::Object(out)))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return Err(err(&req.id, "bad_params", "missing section", None));
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return Err(err(&req.id, "bad_params", "unknown section", None));
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "patch must be an object", None));
    };

    let mut current = settings::load_section(conn, owner_id, section).map_err(helpers::db_failed(req))?;
    if let Err(msg) = settings::merge_section_patch(section, &mut current, patch_obj) {
        return Err(err(&req.id, "bad_params", msg, None));
    }
    if let Err(e) = settings::save_section(conn, owner_id, section, &current) {
        return Err(err(&req.id, "db_update_failed", e.to_string(), None));
    }
    info!(owner_id, section = section.name(), "settings updated");
    Ok(ok(&req.id, current))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(finish(handle_setup_get(state, req))),
        "setup.update" => Some(finish(handle_setup_update(state, req))),
        _ => None,
    }
}
