use chrono::NaiveDate;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::{core_err, err};
use super::types::{AppState, Request};
use crate::error::CoreError;
use crate::ledger::DateRange;
use crate::model::parse_iso_date;

/// Handlers return either a success envelope or a ready-made error envelope.
pub type HandlerResult = Result<Value, Value>;

pub fn finish(res: HandlerResult) -> Value {
    res.unwrap_or_else(|e| e)
}

pub fn require_db<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn bad_params(req: &Request, message: impl Into<String>) -> Value {
    err(&req.id, "bad_params", message, None)
}

pub fn core(req: &Request) -> impl FnOnce(CoreError) -> Value + '_ {
    move |e| core_err(&req.id, e)
}

pub fn db_failed(req: &Request) -> impl FnOnce(anyhow::Error) -> Value + '_ {
    move |e| err(&req.id, "db_query_failed", format!("{e:#}"), None)
}

pub fn required_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim()),
        _ => Err(bad_params(req, format!("missing params.{}", key))),
    }
}

pub fn optional_str<'a>(req: &'a Request, key: &str) -> Result<Option<&'a str>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(bad_params(req, format!("params.{} must be a string", key))),
    }
}

/// Every tenant-scoped method carries the owner id.
pub fn owner_id(req: &Request) -> Result<&str, Value> {
    required_str(req, "ownerId")
}

pub fn optional_bool(req: &Request, key: &str) -> Result<Option<bool>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(bad_params(req, format!("params.{} must be boolean", key))),
    }
}

pub fn required_bool(req: &Request, key: &str) -> Result<bool, Value> {
    optional_bool(req, key)?.ok_or_else(|| bad_params(req, format!("missing params.{}", key)))
}

pub fn optional_int_range(req: &Request, key: &str, min: i64, max: i64) -> Result<Option<i64>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_i64() {
            Some(n) if (min..=max).contains(&n) => Ok(Some(n)),
            _ => Err(bad_params(
                req,
                format!("params.{} must be an integer in {}..={}", key, min, max),
            )),
        },
    }
}

pub fn optional_date(req: &Request, key: &str) -> Result<Option<NaiveDate>, Value> {
    match optional_str(req, key)? {
        None => Ok(None),
        Some(raw) => parse_iso_date(raw)
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("params.{} must be a YYYY-MM-DD date", key))),
    }
}

pub fn required_date(req: &Request, key: &str) -> Result<NaiveDate, Value> {
    optional_date(req, key)?.ok_or_else(|| bad_params(req, format!("missing params.{}", key)))
}

/// Deserializes a structured parameter; absent or null gives `None`.
pub fn optional_json<T: DeserializeOwned>(req: &Request, key: &str) -> Result<Option<T>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| bad_params(req, format!("params.{} is malformed: {}", key, e))),
    }
}

pub fn string_list(req: &Request, key: &str) -> Result<Option<Vec<String>>, Value> {
    optional_json::<Vec<String>>(req, key)
}

/// Optional `startDate` / `endDate` pair; an inverted window is rejected.
pub fn date_range(req: &Request) -> Result<DateRange, Value> {
    let range = DateRange::new(optional_date(req, "startDate")?, optional_date(req, "endDate")?);
    if let (Some(s), Some(e)) = (range.start, range.end) {
        if s > e {
            return Err(bad_params(req, "startDate must not be after endDate"));
        }
    }
    Ok(range)
}
