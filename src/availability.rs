//! Teacher availability constraints.
//!
//! The scheduler only ever consumes the structured [`Availability`] form. The free-text
//! note parser below is a preprocessing helper for the notes schools type into teacher
//! records ("não pode às terças à tarde", "prefers mornings"); its output is reviewed and
//! saved as structured rules before any generation run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::{Cell, GridShape};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    #[serde(default)]
    pub blocked: BTreeSet<Cell>,
    #[serde(default)]
    pub preferred: BTreeSet<Cell>,
}

impl Availability {
    pub fn is_blocked(&self, cell: Cell) -> bool {
        self.blocked.contains(&cell)
    }

    pub fn is_preferred(&self, cell: Cell) -> bool {
        self.preferred.contains(&cell)
    }

    /// Drops cells outside the grid and preferences that are also blocked.
    pub fn normalized(mut self, grid: &GridShape) -> Self {
        self.blocked.retain(|c| grid.contains(*c));
        let blocked = &self.blocked;
        self.preferred
            .retain(|c| grid.contains(*c) && !blocked.contains(c));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClauseKind {
    Blocked,
    Preferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DayPart {
    Morning,
    Afternoon,
}

/// Parses Portuguese/English availability notes into structured rules.
///
/// Each sentence-like clause is read on its own. A clause must name at least one day,
/// day part or period to produce rules; negations win over preferences.
pub fn parse_notes(notes: &str, grid: &GridShape) -> Availability {
    let mut out = Availability::default();
    let folded = fold_accents(&notes.to_lowercase());
    for clause in split_clauses(&folded) {
        let tokens: Vec<&str> = clause
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let Some(kind) = clause_kind(&tokens) else {
            continue;
        };

        let mut days: BTreeSet<u8> = BTreeSet::new();
        let mut parts: BTreeSet<DayPart> = BTreeSet::new();
        let mut periods: BTreeSet<u8> = BTreeSet::new();
        let mentions_period = tokens.iter().any(|t| is_period_word(t));
        for t in &tokens {
            if let Some(d) = day_of(t) {
                if d < grid.days_per_week {
                    days.insert(d);
                }
            }
            if let Some(p) = day_part_of(t) {
                parts.insert(p);
            }
            if mentions_period {
                if let Some(n) = leading_number(t) {
                    if n >= 1 && n <= grid.periods_per_day as u32 {
                        periods.insert(n as u8);
                    }
                }
            }
        }
        if days.is_empty() && parts.is_empty() && periods.is_empty() {
            continue;
        }

        if days.is_empty() {
            days.extend(0..grid.days_per_week);
        }
        let mut cell_periods: BTreeSet<u8> = periods;
        for part in &parts {
            cell_periods.extend(part_periods(*part, grid.periods_per_day));
        }
        if cell_periods.is_empty() {
            cell_periods.extend(1..=grid.periods_per_day);
        }

        let target = match kind {
            ClauseKind::Blocked => &mut out.blocked,
            ClauseKind::Preferred => &mut out.preferred,
        };
        for d in &days {
            for p in &cell_periods {
                target.insert(Cell::new(*d, *p));
            }
        }
    }
    out.normalized(grid)
}

fn split_clauses(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for piece in text.split(['.', ';', ',', '\n']) {
        // "mas"/"but" usually flips the intent of the sentence
        let mut rest = piece;
        loop {
            let hit = [" mas ", " but ", " porem "]
                .iter()
                .filter_map(|sep| rest.find(sep).map(|i| (i, sep.len())))
                .min();
            match hit {
                Some((i, len)) => {
                    out.push(rest[..i].trim().to_string());
                    rest = &rest[i + len..];
                }
                None => {
                    out.push(rest.trim().to_string());
                    break;
                }
            }
        }
    }
    out.retain(|c| !c.is_empty());
    out
}

fn clause_kind(tokens: &[&str]) -> Option<ClauseKind> {
    let negative = tokens.iter().any(|t| {
        matches!(
            *t,
            "nao" | "not" | "cannot" | "cant" | "unavailable" | "indisponivel" | "nunca"
                | "never" | "sem" | "except" | "exceto" | "impossivel"
        )
    });
    if negative {
        return Some(ClauseKind::Blocked);
    }
    let preferred = tokens.iter().any(|t| {
        t.starts_with("prefer") || matches!(*t, "gostaria" | "melhor" | "ideally" | "idealmente")
    });
    preferred.then_some(ClauseKind::Preferred)
}

fn day_of(token: &str) -> Option<u8> {
    let t = token;
    if t.starts_with("segunda") || t == "seg" || t.starts_with("monday") || t == "mon" {
        Some(0)
    } else if t.starts_with("terca") || t.starts_with("tuesday") || t == "tue" {
        Some(1)
    } else if t.starts_with("quarta") || t == "qua" || t.starts_with("wednesday") || t == "wed" {
        Some(2)
    } else if t.starts_with("quinta") || t == "qui" || t.starts_with("thursday") || t == "thu" {
        Some(3)
    } else if t.starts_with("sexta") || t == "sex" || t.starts_with("friday") || t == "fri" {
        Some(4)
    } else if t.starts_with("sabado") || t == "sab" || t.starts_with("saturday") || t == "sat" {
        Some(5)
    } else {
        None
    }
}

fn day_part_of(token: &str) -> Option<DayPart> {
    if token.starts_with("manha") || token.starts_with("morning") {
        Some(DayPart::Morning)
    } else if token.starts_with("tarde") || token.starts_with("afternoon") {
        Some(DayPart::Afternoon)
    } else {
        None
    }
}

fn is_period_word(token: &str) -> bool {
    token.starts_with("aula")
        || token.starts_with("periodo")
        || token.starts_with("period")
        || token.starts_with("horario")
        || token.starts_with("lesson")
        || token.starts_with("tempo")
}

/// "3", "3a", "3o", "3rd" -> 3
fn leading_number(token: &str) -> Option<u32> {
    let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let suffix = &token[digits.len()..];
    if !matches!(suffix, "" | "a" | "o" | "st" | "nd" | "rd" | "th") {
        return None;
    }
    digits.parse().ok()
}

/// Morning is the first half of the day (rounded up), afternoon the rest.
fn part_periods(part: DayPart, periods_per_day: u8) -> Vec<u8> {
    let split = periods_per_day.div_ceil(2);
    match part {
        DayPart::Morning => (1..=split).collect(),
        DayPart::Afternoon => (split + 1..=periods_per_day).collect(),
    }
}

fn fold_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'ã' | 'â' | 'ä' => 'a',
            'é' | 'ê' | 'è' | 'ë' => 'e',
            'í' | 'î' | 'ì' | 'ï' => 'i',
            'ó' | 'ô' | 'õ' | 'ò' | 'ö' => 'o',
            'ú' | 'û' | 'ù' | 'ü' => 'u',
            'ç' => 'c',
            'º' => 'o',
            'ª' => 'a',
            other => other,
        })
        .collect()
}
