pub mod backup_exchange;
pub mod core;
pub mod enrollments;
pub mod exams;
pub mod reports;
pub mod setup;
pub mod students;
