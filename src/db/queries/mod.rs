//! Database queries

pub mod contact;
pub mod import_job;

pub use contact::PgContactStore;
pub use import_job::PgJobStore;
