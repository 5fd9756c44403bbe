pub mod attendance;
pub mod backup_exchange;
pub mod core;
pub mod grades;
pub mod notifications;
pub mod reports;
pub mod students;
pub mod subjects;
pub mod waitlist;
