pub mod error_report;
pub mod repair;
