//! Weekly timetable generation.
//!
//! # Algorithm
//!
//! 1. Order classes by grade (sort order, name), then class name and id.
//! 2. For each class, walk its curriculum by subject name; for each required hour pick the
//!    best (cell, teacher) pair where the class cell is free, the teacher is qualified,
//!    active, free, not blocked and under the weekly cap.
//! 3. Ranking: keep the teacher already teaching this subject to this class, then
//!    preferred cells, then the teacher's lightest day, then spread the subject over
//!    days, then lightest total load, then earliest cell and teacher id.
//! 4. When nothing fits, spend repair budget: move one already placed lesson of the
//!    same class to another free cell so a qualified teacher's free cell opens up.
//!
//! Unplaceable hours are reported as shortfall, never as an error.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::model::{Cell, Class, Grade, GridShape, ScheduleSlot, Subject, Teacher};

#[derive(Debug, Clone)]
pub struct BuildInput<'a> {
    pub grid: GridShape,
    pub grades: &'a [Grade],
    pub subjects: &'a [Subject],
    pub classes: &'a [Class],
    pub teachers: &'a [Teacher],
    pub repair_budget: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Shortfall {
    pub class_id: String,
    pub class_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub required: u32,
    pub assigned: u32,
    pub shortfall: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    pub slots: Vec<ScheduleSlot>,
    pub shortfalls: Vec<Shortfall>,
    pub repairs_used: u32,
}

impl BuildOutcome {
    pub fn total_shortfall(&self) -> u32 {
        self.shortfalls.iter().map(|s| s.shortfall).sum()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.slots)
    }
}

/// SHA-256 over the slots in canonical (day, period, teacher) order, so a stored
/// schedule and the run that produced it hash the same.
pub fn fingerprint(slots: &[ScheduleSlot]) -> String {
    let mut ordered: Vec<&ScheduleSlot> = slots.iter().collect();
    ordered.sort();
    let mut hasher = Sha256::new();
    for s in ordered {
        hasher.update(
            format!(
                "{}|{}|{}|{}|{}\n",
                s.day, s.period, s.class_id, s.subject_id, s.teacher_id
            )
            .as_bytes(),
        );
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictKind {
    TeacherDoubleBooked,
    ClassDoubleBooked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub kind: ConflictKind,
    pub day: u8,
    pub period: u8,
    /// teacher id or class id, depending on `kind`
    pub id: String,
}

/// Lists every (day, period) where a teacher or a class appears more than once.
pub fn find_conflicts(slots: &[ScheduleSlot]) -> Vec<Conflict> {
    let mut teacher_seen: HashMap<(u8, u8, &str), usize> = HashMap::new();
    let mut class_seen: HashMap<(u8, u8, &str), usize> = HashMap::new();
    for s in slots {
        *teacher_seen
            .entry((s.day, s.period, s.teacher_id.as_str()))
            .or_insert(0) += 1;
        *class_seen
            .entry((s.day, s.period, s.class_id.as_str()))
            .or_insert(0) += 1;
    }
    let mut out: Vec<Conflict> = teacher_seen
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|((day, period, id), _)| Conflict {
            kind: ConflictKind::TeacherDoubleBooked,
            day,
            period,
            id: id.to_string(),
        })
        .chain(
            class_seen
                .into_iter()
                .filter(|(_, n)| *n > 1)
                .map(|((day, period, id), _)| Conflict {
                    kind: ConflictKind::ClassDoubleBooked,
                    day,
                    period,
                    id: id.to_string(),
                }),
        )
        .collect();
    out.sort_by(|a, b| {
        (a.day, a.period, &a.id)
            .cmp(&(b.day, b.period, &b.id))
            .then_with(|| (a.kind as u8).cmp(&(b.kind as u8)))
    });
    out
}

#[derive(Debug, Clone, Copy)]
struct Lesson {
    class: usize,
    subject: usize,
    teacher: usize,
    cell: Cell,
}

/// (continuity, preference, teacher day load, subject on that day, teacher load, cell, teacher)
type Score = (u8, u8, u32, u32, u32, usize, usize);

struct Builder<'a> {
    grid: GridShape,
    teachers: Vec<&'a Teacher>,
    class_cells: Vec<Vec<Option<usize>>>,
    teacher_cells: Vec<Vec<bool>>,
    teacher_load: Vec<u32>,
    teacher_day_load: Vec<Vec<u32>>,
    subject_day: HashMap<(usize, usize, u8), u32>,
    class_subject_teacher: HashMap<(usize, usize), usize>,
    lessons: Vec<Lesson>,
    repair_budget: u32,
    repairs_used: u32,
}

impl<'a> Builder<'a> {
    fn new(grid: GridShape, teachers: Vec<&'a Teacher>, class_count: usize, repair_budget: u32) -> Self {
        let cells = grid.cell_count();
        let teacher_count = teachers.len();
        Self {
            grid,
            teachers,
            class_cells: vec![vec![None; cells]; class_count],
            teacher_cells: vec![vec![false; cells]; teacher_count],
            teacher_load: vec![0; teacher_count],
            teacher_day_load: vec![vec![0; grid.days_per_week as usize]; teacher_count],
            subject_day: HashMap::new(),
            class_subject_teacher: HashMap::new(),
            lessons: Vec::new(),
            repair_budget,
            repairs_used: 0,
        }
    }

    fn teacher_can_take(&self, t: usize, cell: Cell) -> bool {
        let teacher = self.teachers[t];
        !self.teacher_cells[t][self.grid.cell_index(cell)]
            && !teacher.availability.is_blocked(cell)
            && self.teacher_load[t] < teacher.max_weekly_lessons
    }

    fn score(&self, class: usize, subject: usize, t: usize, cell: Cell) -> Score {
        let continuity = match self.class_subject_teacher.get(&(class, subject)) {
            Some(&current) if current != t => 1,
            _ => 0,
        };
        let preferred = if self.teachers[t].availability.is_preferred(cell) {
            0
        } else {
            1
        };
        (
            continuity,
            preferred,
            self.teacher_day_load[t][cell.day as usize],
            self.subject_day
                .get(&(class, subject, cell.day))
                .copied()
                .unwrap_or(0),
            self.teacher_load[t],
            self.grid.cell_index(cell),
            t,
        )
    }

    fn best_candidate(&self, class: usize, subject: usize, qualified: &[usize]) -> Option<(Cell, usize)> {
        let mut best: Option<(Score, Cell, usize)> = None;
        for cell in self.grid.cells() {
            if self.class_cells[class][self.grid.cell_index(cell)].is_some() {
                continue;
            }
            for &t in qualified {
                if !self.teacher_can_take(t, cell) {
                    continue;
                }
                let score = self.score(class, subject, t, cell);
                if best.as_ref().map(|(b, _, _)| score < *b).unwrap_or(true) {
                    best = Some((score, cell, t));
                }
            }
        }
        best.map(|(_, cell, t)| (cell, t))
    }

    fn place(&mut self, class: usize, subject: usize, t: usize, cell: Cell) {
        let ci = self.grid.cell_index(cell);
        let li = self.lessons.len();
        self.lessons.push(Lesson {
            class,
            subject,
            teacher: t,
            cell,
        });
        self.class_cells[class][ci] = Some(li);
        self.teacher_cells[t][ci] = true;
        self.teacher_load[t] += 1;
        self.teacher_day_load[t][cell.day as usize] += 1;
        *self.subject_day.entry((class, subject, cell.day)).or_insert(0) += 1;
        self.class_subject_teacher.entry((class, subject)).or_insert(t);
    }

    fn move_lesson(&mut self, li: usize, to: Cell) {
        let Lesson {
            class,
            subject,
            teacher,
            cell: from,
        } = self.lessons[li];
        let from_i = self.grid.cell_index(from);
        let to_i = self.grid.cell_index(to);
        self.class_cells[class][from_i] = None;
        self.class_cells[class][to_i] = Some(li);
        self.teacher_cells[teacher][from_i] = false;
        self.teacher_cells[teacher][to_i] = true;
        self.teacher_day_load[teacher][from.day as usize] -= 1;
        self.teacher_day_load[teacher][to.day as usize] += 1;
        if let Some(n) = self.subject_day.get_mut(&(class, subject, from.day)) {
            *n = n.saturating_sub(1);
        }
        *self.subject_day.entry((class, subject, to.day)).or_insert(0) += 1;
        self.lessons[li].cell = to;
    }

    /// One-level swap: free a cell where a qualified teacher is available by moving the
    /// class's lesson that occupies it. Each inspected cell costs one unit of budget.
    fn repair(&mut self, class: usize, subject: usize, qualified: &[usize]) -> bool {
        let cells: Vec<Cell> = self.grid.cells().collect();
        for &t in qualified {
            for &cell in &cells {
                if self.repair_budget == 0 {
                    return false;
                }
                if !self.teacher_can_take(t, cell) {
                    continue;
                }
                let Some(li) = self.class_cells[class][self.grid.cell_index(cell)] else {
                    continue;
                };
                self.repair_budget -= 1;
                let occupant = self.lessons[li].teacher;
                let target = cells.iter().copied().find(|&c2| {
                    let ci2 = self.grid.cell_index(c2);
                    c2 != cell
                        && self.class_cells[class][ci2].is_none()
                        && !self.teacher_cells[occupant][ci2]
                        && !self.teachers[occupant].availability.is_blocked(c2)
                });
                if let Some(to) = target {
                    self.move_lesson(li, to);
                    self.place(class, subject, t, cell);
                    self.repairs_used += 1;
                    return true;
                }
            }
        }
        false
    }
}

/// Builds a conflict-free weekly timetable, as complete as the constraints allow.
pub fn build_weekly_schedule(input: &BuildInput<'_>) -> BuildOutcome {
    let grade_key: HashMap<&str, (i64, &str)> = input
        .grades
        .iter()
        .map(|g| (g.id.as_str(), (g.sort_order, g.name.as_str())))
        .collect();
    let mut classes: Vec<&Class> = input.classes.iter().collect();
    classes.sort_by(|a, b| {
        let ka = grade_key
            .get(a.grade_id.as_str())
            .copied()
            .unwrap_or((i64::MAX, ""));
        let kb = grade_key
            .get(b.grade_id.as_str())
            .copied()
            .unwrap_or((i64::MAX, ""));
        ka.cmp(&kb)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });

    let subject_names: HashMap<&str, &str> = input
        .subjects
        .iter()
        .map(|s| (s.id.as_str(), s.name.as_str()))
        .collect();
    let mut subject_index: HashMap<&str, usize> = HashMap::new();

    let mut teachers: Vec<&Teacher> = input.teachers.iter().collect();
    teachers.sort_by(|a, b| a.id.cmp(&b.id));

    let mut builder = Builder::new(input.grid, teachers, classes.len(), input.repair_budget);
    let mut shortfalls = Vec::new();

    for (ci, class) in classes.iter().enumerate() {
        let mut curriculum: Vec<_> = class.curriculum.iter().collect();
        curriculum.sort_by(|a, b| {
            let na = subject_names.get(a.subject_id.as_str()).copied().unwrap_or("");
            let nb = subject_names.get(b.subject_id.as_str()).copied().unwrap_or("");
            na.cmp(nb).then_with(|| a.subject_id.cmp(&b.subject_id))
        });

        for entry in curriculum {
            let next = subject_index.len();
            let si = *subject_index.entry(entry.subject_id.as_str()).or_insert(next);
            let qualified: Vec<usize> = builder
                .teachers
                .iter()
                .enumerate()
                .filter(|(_, t)| t.active && t.teaches(&entry.subject_id) && t.max_weekly_lessons > 0)
                .map(|(i, _)| i)
                .collect();

            let mut assigned = 0u32;
            for _ in 0..entry.weekly_hours {
                if let Some((cell, t)) = builder.best_candidate(ci, si, &qualified) {
                    builder.place(ci, si, t, cell);
                    assigned += 1;
                } else if builder.repair(ci, si, &qualified) {
                    assigned += 1;
                } else {
                    break;
                }
            }

            if assigned < entry.weekly_hours {
                shortfalls.push(Shortfall {
                    class_id: class.id.clone(),
                    class_name: class.name.clone(),
                    subject_id: entry.subject_id.clone(),
                    subject_name: subject_names
                        .get(entry.subject_id.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| entry.subject_id.clone()),
                    required: entry.weekly_hours,
                    assigned,
                    shortfall: entry.weekly_hours - assigned,
                });
            }
        }
    }

    let subject_ids: Vec<&str> = {
        let mut v = vec![""; subject_index.len()];
        for (id, i) in &subject_index {
            v[*i] = *id;
        }
        v
    };
    let mut lessons = builder.lessons.clone();
    lessons.sort_by_key(|l| (l.class, l.cell));
    let slots = lessons
        .iter()
        .map(|l| ScheduleSlot {
            day: l.cell.day,
            period: l.cell.period,
            teacher_id: builder.teachers[l.teacher].id.clone(),
            subject_id: subject_ids[l.subject].to_string(),
            class_id: classes[l.class].id.clone(),
        })
        .collect();

    BuildOutcome {
        slots,
        shortfalls,
        repairs_used: builder.repairs_used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::Availability;
    use crate::model::{CurriculumEntry, Shift};
    use std::collections::{BTreeSet, HashSet};

    fn grid(days: u8, periods: u8) -> GridShape {
        GridShape {
            days_per_week: days,
            periods_per_day: periods,
        }
    }

    fn subject(id: &str) -> Subject {
        Subject {
            id: id.to_string(),
            name: id.to_string(),
            color: None,
            weekly_hours: 1,
        }
    }

    fn teacher(id: &str, subjects: &[&str], cap: u32) -> Teacher {
        Teacher {
            id: id.to_string(),
            name: id.to_string(),
            credential_id: None,
            max_weekly_lessons: cap,
            subject_ids: subjects.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            availability: Availability::default(),
            active: true,
        }
    }

    fn class(id: &str, grade: &str, load: &[(&str, u32)]) -> Class {
        Class {
            id: id.to_string(),
            grade_id: grade.to_string(),
            name: id.to_string(),
            shift: Shift::Morning,
            curriculum: load
                .iter()
                .map(|(s, h)| CurriculumEntry {
                    subject_id: s.to_string(),
                    weekly_hours: *h,
                })
                .collect(),
        }
    }

    fn grades() -> Vec<Grade> {
        vec![
            Grade {
                id: "g1".into(),
                name: "6th".into(),
                sort_order: 0,
            },
            Grade {
                id: "g2".into(),
                name: "7th".into(),
                sort_order: 1,
            },
        ]
    }

    #[test]
    fn single_teacher_single_class_gets_three_distinct_cells() {
        let subjects = vec![subject("S")];
        let teachers = vec![teacher("T1", &["S"], 30)];
        let classes = vec![class("C", "g1", &[("S", 3)])];
        let grades = grades();
        let out = build_weekly_schedule(&BuildInput {
            grid: grid(5, 6),
            grades: &grades,
            subjects: &subjects,
            classes: &classes,
            teachers: &teachers,
            repair_budget: 0,
        });
        assert_eq!(out.slots.len(), 3);
        assert_eq!(out.total_shortfall(), 0);
        let cells: HashSet<Cell> = out.slots.iter().map(|s| s.cell()).collect();
        assert_eq!(cells.len(), 3);
        assert!(out
            .slots
            .iter()
            .all(|s| s.teacher_id == "T1" && s.subject_id == "S" && s.class_id == "C"));
        // spread over days rather than stacked on Monday
        let days: HashSet<u8> = out.slots.iter().map(|s| s.day).collect();
        assert_eq!(days.len(), 3);
    }

    #[test]
    fn unqualified_subject_is_full_shortfall_not_error() {
        let subjects = vec![subject("S"), subject("Art")];
        let teachers = vec![teacher("T1", &["S"], 30)];
        let classes = vec![class("C", "g1", &[("S", 2), ("Art", 2)])];
        let grades = grades();
        let out = build_weekly_schedule(&BuildInput {
            grid: grid(5, 6),
            grades: &grades,
            subjects: &subjects,
            classes: &classes,
            teachers: &teachers,
            repair_budget: 50,
        });
        assert_eq!(out.slots.len(), 2);
        assert_eq!(out.shortfalls.len(), 1);
        let sf = &out.shortfalls[0];
        assert_eq!(sf.subject_id, "Art");
        assert_eq!((sf.required, sf.assigned, sf.shortfall), (2, 0, 2));
    }

    #[test]
    fn respects_blocked_cells_cap_and_inactive_teachers() {
        let subjects = vec![subject("S")];
        let mut t1 = teacher("T1", &["S"], 2);
        t1.availability.blocked.insert(Cell::new(0, 1));
        let mut t2 = teacher("T2", &["S"], 30);
        t2.active = false;
        let teachers = vec![t1, t2];
        let classes = vec![class("C", "g1", &[("S", 4)])];
        let grades = grades();
        let out = build_weekly_schedule(&BuildInput {
            grid: grid(5, 6),
            grades: &grades,
            subjects: &subjects,
            classes: &classes,
            teachers: &teachers,
            repair_budget: 10,
        });
        assert_eq!(out.slots.len(), 2);
        assert!(out.slots.iter().all(|s| s.teacher_id == "T1"));
        assert!(out.slots.iter().all(|s| s.cell() != Cell::new(0, 1)));
        assert_eq!(out.total_shortfall(), 2);
    }

    #[test]
    fn preferred_cells_win_over_earlier_cells() {
        let subjects = vec![subject("S")];
        let mut t1 = teacher("T1", &["S"], 30);
        t1.availability.preferred.insert(Cell::new(3, 4));
        let teachers = vec![t1];
        let classes = vec![class("C", "g1", &[("S", 1)])];
        let grades = grades();
        let out = build_weekly_schedule(&BuildInput {
            grid: grid(5, 6),
            grades: &grades,
            subjects: &subjects,
            classes: &classes,
            teachers: &teachers,
            repair_budget: 0,
        });
        assert_eq!(out.slots[0].cell(), Cell::new(3, 4));
    }

    #[test]
    fn repair_pass_moves_a_lesson_to_open_a_cell() {
        let subjects = vec![subject("Alpha"), subject("Beta")];
        let mut a = teacher("A", &["Alpha"], 30);
        a.availability.preferred.insert(Cell::new(0, 2));
        let mut b = teacher("B", &["Beta"], 30);
        b.availability.blocked.insert(Cell::new(0, 1));
        let teachers = vec![a, b];
        let classes = vec![class("C", "g1", &[("Alpha", 1), ("Beta", 1)])];
        let grades = grades();

        let mut input = BuildInput {
            grid: grid(1, 2),
            grades: &grades,
            subjects: &subjects,
            classes: &classes,
            teachers: &teachers,
            repair_budget: 0,
        };
        let greedy = build_weekly_schedule(&input);
        assert_eq!(greedy.total_shortfall(), 1);

        input.repair_budget = 10;
        let repaired = build_weekly_schedule(&input);
        assert_eq!(repaired.total_shortfall(), 0);
        assert_eq!(repaired.repairs_used, 1);
        let beta = repaired
            .slots
            .iter()
            .find(|s| s.subject_id == "Beta")
            .expect("beta placed");
        assert_eq!(beta.cell(), Cell::new(0, 2));
        assert!(find_conflicts(&repaired.slots).is_empty());
    }

    #[test]
    fn larger_run_has_no_double_booking_and_is_deterministic() {
        let subjects = vec![subject("Math"), subject("Port"), subject("Sci"), subject("Hist")];
        let mut teachers = vec![
            teacher("T1", &["Math", "Sci"], 20),
            teacher("T2", &["Port", "Hist"], 20),
            teacher("T3", &["Math"], 12),
            teacher("T4", &["Sci", "Hist", "Port"], 25),
        ];
        teachers[0].availability.blocked.insert(Cell::new(1, 3));
        teachers[1].availability.preferred.insert(Cell::new(0, 1));
        let classes = vec![
            class("7A", "g2", &[("Math", 5), ("Port", 5), ("Sci", 3), ("Hist", 2)]),
            class("6A", "g1", &[("Math", 5), ("Port", 4), ("Sci", 3), ("Hist", 2)]),
            class("6B", "g1", &[("Math", 4), ("Port", 4), ("Sci", 2), ("Hist", 2)]),
        ];
        let grades = grades();
        let input = BuildInput {
            grid: grid(5, 6),
            grades: &grades,
            subjects: &subjects,
            classes: &classes,
            teachers: &teachers,
            repair_budget: 200,
        };
        let first = build_weekly_schedule(&input);
        let second = build_weekly_schedule(&input);
        assert_eq!(first.slots, second.slots);
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert!(find_conflicts(&first.slots).is_empty());

        for t in &teachers {
            let load = first.slots.iter().filter(|s| s.teacher_id == t.id).count() as u32;
            assert!(load <= t.max_weekly_lessons, "{} over cap", t.id);
            for s in first.slots.iter().filter(|s| s.teacher_id == t.id) {
                assert!(!t.availability.is_blocked(s.cell()));
                assert!(t.teaches(&s.subject_id));
            }
        }

        let placed = first.slots.len() as u32;
        let required: u32 = classes
            .iter()
            .flat_map(|c| c.curriculum.iter())
            .map(|e| e.weekly_hours)
            .sum();
        assert_eq!(placed + first.total_shortfall(), required);

        // 6A and 6B (grade g1) come before 7A in the output
        assert_eq!(first.slots[0].class_id, "6A");
    }

    #[test]
    fn find_conflicts_reports_both_kinds() {
        let slot = |t: &str, c: &str| ScheduleSlot {
            day: 0,
            period: 1,
            teacher_id: t.to_string(),
            subject_id: "S".to_string(),
            class_id: c.to_string(),
        };
        let conflicts = find_conflicts(&[slot("T1", "A"), slot("T1", "B"), slot("T2", "B")]);
        assert_eq!(conflicts.len(), 2);
        assert!(conflicts
            .iter()
            .any(|c| c.kind == ConflictKind::TeacherDoubleBooked && c.id == "T1"));
        assert!(conflicts
            .iter()
            .any(|c| c.kind == ConflictKind::ClassDoubleBooked && c.id == "B"));
    }
}
