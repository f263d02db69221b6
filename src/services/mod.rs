//! Business logic services

pub mod csv_ingest;
pub mod field_mapping;
pub mod import_engine;
pub mod import_processor;
pub mod matching;
pub mod progress;
pub mod row_mapping;
