use crate::ipc::error::ok;
use crate::ipc::helpers::{self, finish, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, LedgerOptions};
use serde_json::json;

fn handle_debts_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = helpers::require_db(state, req)?;
    let owner_id = helpers::owner_id(req)?;
    let opts = LedgerOptions {
        range: helpers::date_range(req)?,
        include_accumulated: helpers::optional_bool(req, "includeAccumulated")?.unwrap_or(true),
    };
    let teachers = ledger::teacher_debts(conn, owner_id, &opts).map_err(helpers::core(req))?;
    let total: u32 = teachers.iter().map(|t| t.total_debts).sum();
    Ok(ok(
        &req.id,
        json!({
            "range": opts.range,
            "teachers": teachers,
            "totalDebts": total
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "debts.get" => Some(finish(handle_debts_get(state, req))),
        _ => None,
    }
}
