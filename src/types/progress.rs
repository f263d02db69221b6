//! Progress snapshot returned to polling clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::import_job::JobStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: Uuid,
    /// Stored status; staleness is reported separately and never stored
    pub status: JobStatus,
    pub rows_processed: i64,
    pub rows_created: i64,
    pub rows_updated: i64,
    pub rows_skipped: i64,
    pub rows_errored: i64,
    pub total_rows: Option<i64>,
    pub percent_complete: f64,
    pub is_stale: bool,
    pub updated_at: DateTime<Utc>,
}
