//! Per-owner scheduling settings stored as JSON sections in the `settings` table.

use rusqlite::Connection;
use serde_json::{json, Map, Value};

use crate::db;
use crate::makeup::DEFAULT_MAKEUP_PERIODS;
use crate::model::{GridShape, MAX_DAYS_PER_WEEK, MAX_PERIODS_PER_DAY};

pub const DEFAULT_REPAIR_BUDGET: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupSection {
    Timetable,
    Makeup,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Timetable, SetupSection::Makeup];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "timetable" => Some(Self::Timetable),
            "makeup" => Some(Self::Makeup),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Timetable => "timetable",
            Self::Makeup => "makeup",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Timetable => "setup.timetable",
            Self::Makeup => "setup.makeup",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Timetable => json!({
            "daysPerWeek": 5,
            "periodsPerDay": 6,
            "repairBudget": DEFAULT_REPAIR_BUDGET
        }),
        SetupSection::Makeup => json!({
            "defaultPeriods": DEFAULT_MAKEUP_PERIODS
        }),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

/// Validates every field of `patch` before touching `current`.
pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let mut accepted: Vec<(String, Value)> = Vec::with_capacity(patch.len());
    for (k, v) in patch {
        let value = match section {
            SetupSection::Timetable => match k.as_str() {
                "daysPerWeek" => {
                    let n = parse_i64_range(v, k, 5, MAX_DAYS_PER_WEEK as i64)?;
                    Value::from(n)
                }
                "periodsPerDay" => Value::from(parse_i64_range(v, k, 1, MAX_PERIODS_PER_DAY as i64)?),
                "repairBudget" => Value::from(parse_i64_range(v, k, 0, 10_000)?),
                _ => return Err(format!("unknown timetable field: {}", k)),
            },
            SetupSection::Makeup => match k.as_str() {
                "defaultPeriods" => Value::from(parse_i64_range(v, k, 1, MAX_PERIODS_PER_DAY as i64)?),
                _ => return Err(format!("unknown makeup field: {}", k)),
            },
        };
        accepted.push((k.clone(), value));
    }
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in accepted {
        obj.insert(k, v);
    }
    Ok(())
}

/// Stored section layered over the defaults, so fields added later still get a value.
pub fn load_section(conn: &Connection, owner_id: &str, section: SetupSection) -> anyhow::Result<Value> {
    let mut out = default_section(section);
    if let Some(Value::Object(saved)) = db::settings_get_json(conn, owner_id, section.key())? {
        if let Some(obj) = out.as_object_mut() {
            for (k, v) in saved {
                obj.insert(k, v);
            }
        }
    }
    Ok(out)
}

pub fn save_section(conn: &Connection, owner_id: &str, section: SetupSection, value: &Value) -> anyhow::Result<()> {
    db::settings_set_json(conn, owner_id, section.key(), value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimetableSettings {
    pub grid: GridShape,
    pub repair_budget: u32,
}

fn field_in(value: &Value, key: &str, min: i64, max: i64, fallback: i64) -> i64 {
    value
        .get(key)
        .and_then(|v| v.as_i64())
        .filter(|n| (min..=max).contains(n))
        .unwrap_or(fallback)
}

pub fn load_timetable_settings(conn: &Connection, owner_id: &str) -> anyhow::Result<TimetableSettings> {
    let v = load_section(conn, owner_id, SetupSection::Timetable)?;
    Ok(TimetableSettings {
        grid: GridShape {
            days_per_week: field_in(&v, "daysPerWeek", 5, MAX_DAYS_PER_WEEK as i64, 5) as u8,
            periods_per_day: field_in(&v, "periodsPerDay", 1, MAX_PERIODS_PER_DAY as i64, 6) as u8,
        },
        repair_budget: field_in(&v, "repairBudget", 0, 10_000, DEFAULT_REPAIR_BUDGET as i64) as u32,
    })
}

pub fn load_makeup_periods(conn: &Connection, owner_id: &str) -> anyhow::Result<u8> {
    let v = load_section(conn, owner_id, SetupSection::Makeup)?;
    Ok(field_in(
        &v,
        "defaultPeriods",
        1,
        MAX_PERIODS_PER_DAY as i64,
        DEFAULT_MAKEUP_PERIODS as i64,
    ) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn merge_accepts_valid_fields() {
        let mut cur = default_section(SetupSection::Timetable);
        merge_section_patch(
            SetupSection::Timetable,
            &mut cur,
            &patch(json!({ "daysPerWeek": 6, "periodsPerDay": 8 })),
        )
        .expect("merge");
        assert_eq!(cur["daysPerWeek"], 6);
        assert_eq!(cur["periodsPerDay"], 8);
        assert_eq!(cur["repairBudget"], 200);
    }

    #[test]
    fn merge_rejects_out_of_range_without_partial_write() {
        let mut cur = default_section(SetupSection::Timetable);
        let e = merge_section_patch(
            SetupSection::Timetable,
            &mut cur,
            &patch(json!({ "periodsPerDay": 7, "daysPerWeek": 7 })),
        )
        .expect_err("daysPerWeek 7 is out of range");
        assert!(e.contains("daysPerWeek"));
        assert_eq!(cur["periodsPerDay"], 6);
    }

    #[test]
    fn merge_rejects_unknown_fields() {
        let mut cur = default_section(SetupSection::Makeup);
        assert!(merge_section_patch(
            SetupSection::Makeup,
            &mut cur,
            &patch(json!({ "colour": "red" }))
        )
        .is_err());
        assert!(merge_section_patch(
            SetupSection::Makeup,
            &mut cur,
            &patch(json!({ "defaultPeriods": 0 }))
        )
        .is_err());
    }
}
