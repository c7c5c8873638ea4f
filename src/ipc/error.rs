use serde_json::json;
use tracing::warn;

use crate::error::CoreError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Error envelope for a core failure, keyed by the error's wire code.
pub fn core_err(id: &str, e: CoreError) -> serde_json::Value {
    if let CoreError::Database(db) = &e {
        warn!(request_id = id, error = %db, "database error");
    }
    err(id, e.code(), e.to_string(), None)
}
