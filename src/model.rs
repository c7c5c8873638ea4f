use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::availability::Availability;

pub const MAX_DAYS_PER_WEEK: u8 = 6;
pub const MAX_PERIODS_PER_DAY: u8 = 12;

/// One (day, period) cell of the weekly grid. `day` is 0 = Monday .. 5 = Saturday,
/// `period` starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub day: u8,
    pub period: u8,
}

impl Cell {
    pub fn new(day: u8, period: u8) -> Self {
        Self { day, period }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridShape {
    pub days_per_week: u8,
    pub periods_per_day: u8,
}

impl GridShape {
    pub fn contains(&self, cell: Cell) -> bool {
        cell.day < self.days_per_week && cell.period >= 1 && cell.period <= self.periods_per_day
    }

    pub fn cell_count(&self) -> usize {
        self.days_per_week as usize * self.periods_per_day as usize
    }

    pub fn cell_index(&self, cell: Cell) -> usize {
        cell.day as usize * self.periods_per_day as usize + (cell.period as usize - 1)
    }

    /// Day-major order: Monday period 1, Monday period 2, ...
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (0..self.days_per_week)
            .flat_map(move |d| (1..=self.periods_per_day).map(move |p| Cell::new(d, p)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shift {
    Morning,
    Afternoon,
    Evening,
    Full,
}

impl Shift {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "morning" => Some(Self::Morning),
            "afternoon" => Some(Self::Afternoon),
            "evening" => Some(Self::Evening),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: String,
    pub name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
    pub weekly_hours: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: String,
    pub name: String,
    pub credential_id: Option<String>,
    pub max_weekly_lessons: u32,
    pub subject_ids: BTreeSet<String>,
    pub availability: Availability,
    pub active: bool,
}

impl Teacher {
    pub fn teaches(&self, subject_id: &str) -> bool {
        self.subject_ids.contains(subject_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumEntry {
    pub subject_id: String,
    pub weekly_hours: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub grade_id: String,
    pub name: String,
    pub shift: Shift,
    pub curriculum: Vec<CurriculumEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSlot {
    pub day: u8,
    pub period: u8,
    pub teacher_id: String,
    pub subject_id: String,
    pub class_id: String,
}

impl ScheduleSlot {
    pub fn cell(&self) -> Cell {
        Cell::new(self.day, self.period)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedLesson {
    pub class_id: String,
    pub subject_id: String,
    pub period: u8,
    /// Restricts the lesson to one of the absent teachers; otherwise it applies to all of them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebtOrigin {
    Absence,
    MakeupAbsence,
}

impl DebtOrigin {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "absence" => Some(Self::Absence),
            "makeup_absence" => Some(Self::MakeupAbsence),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absence => "absence",
            Self::MakeupAbsence => "makeup_absence",
        }
    }
}

/// One missed lesson owed by a teacher to a class for a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebtUnit {
    pub teacher_id: String,
    pub subject_id: String,
    pub class_id: String,
    pub date: NaiveDate,
    pub origin: DebtOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MakeupSlot {
    pub teacher_id: String,
    pub subject_id: String,
    pub class_id: String,
    pub period: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Planned,
    Realized,
    Cancelled,
}

impl SessionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planned" => Some(Self::Planned),
            "realized" => Some(Self::Realized),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Realized => "realized",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MakeupMode {
    /// Whole outstanding ledger up to the session date, carried-over debt included.
    Auto,
    /// Only the debts of an explicit date window, carried-over debt excluded.
    Manual,
}

impl MakeupMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MakeupSession {
    pub id: String,
    pub date: NaiveDate,
    pub max_periods: u8,
    pub mode: MakeupMode,
    pub status: SessionStatus,
    /// class id -> slots ordered by period
    pub schedule: BTreeMap<String, Vec<MakeupSlot>>,
    pub attended_teacher_ids: BTreeSet<String>,
    pub processed_at: Option<String>,
}

impl MakeupSession {
    pub fn scheduled_teachers(&self) -> BTreeSet<String> {
        self.schedule
            .values()
            .flatten()
            .map(|s| s.teacher_id.clone())
            .collect()
    }

    pub fn slots(&self) -> impl Iterator<Item = &MakeupSlot> {
        self.schedule.values().flatten()
    }
}

pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_cells_are_day_major_and_indexed_densely() {
        let grid = GridShape {
            days_per_week: 2,
            periods_per_day: 3,
        };
        let cells: Vec<Cell> = grid.cells().collect();
        assert_eq!(cells.len(), grid.cell_count());
        assert_eq!(cells[0], Cell::new(0, 1));
        assert_eq!(cells[3], Cell::new(1, 1));
        for (i, c) in cells.iter().enumerate() {
            assert_eq!(grid.cell_index(*c), i);
        }
        assert!(!grid.contains(Cell::new(2, 1)));
        assert!(!grid.contains(Cell::new(0, 0)));
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in [
            SessionStatus::Planned,
            SessionStatus::Realized,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(SessionStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(SessionStatus::parse("done"), None);
    }
}
