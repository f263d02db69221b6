//! Import job types
//!
//! An import job tracks one uploaded voter file from upload through the
//! mapping wizard to background processing.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::mapping::{AnalysisResult, ContactField};
use super::matching::MatchingStrategy;

pub const VOTER_FILE_JOB_TYPE: &str = "voter_file";

// ==========================================================================
// Tests First (TDD)
// ==========================================================================


// ==========================================================================
// Job status
// ==========================================================================

/// Stored lifecycle state of an import job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Analyzing,
    Mapping,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Analyzing,
        JobStatus::Mapping,
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Mapping => "mapping",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Analyzing) => true,
            (Analyzing, Mapping) | (Analyzing, Failed) => true,
            (Mapping, Queued) => true,
            (Queued, Processing) => true,
            (Processing, Completed) | (Processing, Failed) => true,
            (Pending, _)
            | (Analyzing, _)
            | (Mapping, _)
            | (Queued, _)
            | (Processing, _)
            | (Completed, _)
            | (Failed, _) => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Jobs with a worker actively touching them cannot be deleted
    pub fn is_deletable(&self) -> bool {
        !matches!(self, JobStatus::Processing | JobStatus::Analyzing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown job status: {}", s))
    }
}

// ==========================================================================
// Row outcomes & counters
// ==========================================================================

/// Result of reconciling a single data row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOutcome {
    Created,
    Updated,
    Skipped,
    Errored,
}

/// Per-job outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowCounts {
    pub rows_processed: i64,
    pub rows_created: i64,
    pub rows_updated: i64,
    pub rows_skipped: i64,
    pub rows_errored: i64,
}

impl RowCounts {
    pub fn apply(&mut self, outcome: RowOutcome) {
        self.rows_processed += 1;
        match outcome {
            RowOutcome::Created => self.rows_created += 1,
            RowOutcome::Updated => self.rows_updated += 1,
            RowOutcome::Skipped => self.rows_skipped += 1,
            RowOutcome::Errored => self.rows_errored += 1,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.rows_processed
            == self.rows_created + self.rows_updated + self.rows_skipped + self.rows_errored
    }
}

/// One failed row, kept for operator review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowErrorDetail {
    /// 1-based data row number (header excluded)
    pub row: i64,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, String>>,
}

// ==========================================================================
// Import job
// ==========================================================================

/// Human-confirmed import settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedImport {
    /// header -> canonical field; `None` means the column is skipped
    pub mappings: HashMap<String, Option<ContactField>>,
    pub matching_strategy: MatchingStrategy,
    pub create_unmatched: bool,
    pub confirmed_at: DateTime<Utc>,
}

/// Import job record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub created_by: Uuid,
    pub job_type: String,
    pub status: JobStatus,
    pub original_filename: String,
    pub file_size_bytes: i64,
    pub file_sha256: String,
    pub total_rows: Option<i64>,
    #[serde(flatten)]
    pub counts: RowCounts,
    pub matching_strategy: Option<MatchingStrategy>,
    pub create_unmatched: bool,
    pub confirmed: Option<ConfirmedImport>,
    pub analysis: Option<AnalysisResult>,
    pub error_message: Option<String>,
    /// First page of row errors; the full list is paginated separately
    pub error_details: Vec<RowErrorDetail>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportJob {
    pub fn new(
        tenant_id: Uuid,
        created_by: Uuid,
        original_filename: String,
        file_size_bytes: i64,
        file_sha256: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            created_by,
            job_type: VOTER_FILE_JOB_TYPE.to_string(),
            status: JobStatus::Pending,
            original_filename,
            file_size_bytes,
            file_sha256,
            total_rows: None,
            counts: RowCounts::default(),
            matching_strategy: None,
            create_unmatched: false,
            confirmed: None,
            analysis: None,
            error_message: None,
            error_details: Vec::new(),
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status change written by the engine
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub from: JobStatus,
    pub to: JobStatus,
    pub error_message: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn new(from: JobStatus, to: JobStatus) -> Self {
        Self {
            from,
            to,
            error_message: None,
            at: Utc::now(),
        }
    }

    pub fn failed(from: JobStatus, message: impl Into<String>) -> Self {
        Self {
            from,
            to: JobStatus::Failed,
            error_message: Some(message.into()),
            at: Utc::now(),
        }
    }
}

// ==========================================================================
// Request / response payloads
// ==========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileRequest {
    pub filename: String,
    /// Base64-encoded file body
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobIdRequest {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmMappingsRequest {
    pub job_id: Uuid,
    pub confirmed_mappings: HashMap<String, Option<ContactField>>,
    pub matching_strategy: MatchingStrategy,
    #[serde(default)]
    pub create_unmatched: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobErrorsRequest {
    pub job_id: Uuid,
    #[serde(default = "default_error_page")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_error_page() -> i64 {
    crate::defaults::ERROR_DETAILS_DISPLAY_LIMIT as i64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    pub items: Vec<ImportJob>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobErrorsResponse {
    pub items: Vec<RowErrorDetail>,
    pub total: i64,
}

/// A job handed to the background queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedImportJob {
    pub job_id: Uuid,
    pub tenant_id: Uuid,
    pub submitted_by: Uuid,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartImportResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}
