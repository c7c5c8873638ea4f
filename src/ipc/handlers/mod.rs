pub mod absences;
pub mod catalog;
pub mod classes;
pub mod core;
pub mod debts;
pub mod makeup;
pub mod setup;
pub mod teachers;
pub mod timetable;
