//! Import job engine
//!
//! Drives a voter-file job through its lifecycle:
//! `pending → analyzing → mapping → queued → processing → completed | failed`.
//!
//! Request-path operations (upload, analyze, confirm, start, reads) return
//! typed `ImportError`s. `process_job` runs in the background worker; row
//! problems are recorded per row and never fail the job, infrastructure
//! failures fail it with the counts reached so far.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{ContactStore, DeleteOutcome, JobStore};
use crate::defaults::{ImportSettings, ERROR_DETAILS_DISPLAY_LIMIT};
use crate::error::{ImportError, ImportResult, RowError};
use crate::services::csv_ingest;
use crate::services::field_mapping::{ColumnSample, FieldMappingSuggester};
use crate::services::import_processor::ImportDispatcher;
use crate::services::matching::{self, MatchPlan};
use crate::services::row_mapping::RowMapper;
use crate::types::{
    AnalysisResult, ConfirmMappingsRequest, ConfirmedImport, ContactField, ContactResolution,
    ImportJob, JobErrorsResponse, JobListResponse, JobProgress, JobStatus,
    MatchingStrategiesResponse, QueuedImportJob, RowCounts, RowErrorDetail, RowOutcome,
    StartImportResponse, StatusChange, TenantContext,
};

const MAX_PAGE_SIZE: i64 = 500;

/// Ingest a file and suggest mappings and a strategy; no job state involved
pub async fn build_analysis(
    bytes: &[u8],
    suggester: &FieldMappingSuggester,
    settings: &ImportSettings,
) -> ImportResult<AnalysisResult> {
    let file = csv_ingest::ingest(bytes, settings)?;
    let columns = ColumnSample::from_file(&file);
    let mappings = suggester.suggest(&columns).await;

    let suggested: HashMap<String, Option<ContactField>> = mappings
        .iter()
        .map(|m| (m.header.clone(), m.field))
        .collect();
    let (strategy, reason) = matching::recommend(
        &suggested,
        &file.headers,
        &file.sample_rows,
        settings.coverage_threshold,
    );

    Ok(AnalysisResult {
        vote_history_columns: file
            .vote_history_columns
            .iter()
            .map(|c| c.header.clone())
            .collect(),
        suggested_mappings: mappings.into_iter().map(|m| (m.header.clone(), m)).collect(),
        headers: file.headers,
        suggested_matching_strategy: strategy,
        matching_strategy_reason: reason,
        total_rows: file.total_rows,
        delimiter: char::from(file.delimiter),
        sample_rows: file.sample_rows,
    })
}

pub struct ImportEngine {
    jobs: Arc<dyn JobStore>,
    contacts: Arc<dyn ContactStore>,
    suggester: FieldMappingSuggester,
    dispatcher: Arc<dyn ImportDispatcher>,
    settings: ImportSettings,
}

impl ImportEngine {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        contacts: Arc<dyn ContactStore>,
        suggester: FieldMappingSuggester,
        dispatcher: Arc<dyn ImportDispatcher>,
        settings: ImportSettings,
    ) -> Self {
        Self {
            jobs,
            contacts,
            suggester,
            dispatcher,
            settings,
        }
    }

    async fn load(&self, ctx: &TenantContext, job_id: Uuid) -> ImportResult<ImportJob> {
        self.jobs
            .get_job(ctx.tenant_id, job_id)
            .await?
            .ok_or(ImportError::JobNotFound(job_id))
    }

    /// Compare-and-set a status change, reporting the actual state on conflict
    async fn transition(&self, ctx: &TenantContext, job_id: Uuid, change: StatusChange) -> ImportResult<()> {
        if !change.from.can_transition_to(change.to) {
            return Err(ImportError::InvalidTransition {
                from: change.from,
                to: change.to,
            });
        }
        if self.jobs.transition(ctx.tenant_id, job_id, &change).await? {
            return Ok(());
        }
        let current = self.load(ctx, job_id).await?;
        Err(ImportError::InvalidTransition {
            from: current.status,
            to: change.to,
        })
    }

    // ======================================================================
    // Upload & analysis
    // ======================================================================

    /// Store an uploaded file as a new `pending` job
    pub async fn upload_file(
        &self,
        ctx: &TenantContext,
        filename: &str,
        bytes: &[u8],
    ) -> ImportResult<ImportJob> {
        csv_ingest::check_size(bytes.len() as u64, self.settings.max_file_bytes)?;

        let digest = hex::encode(Sha256::digest(bytes));
        let job = ImportJob::new(
            ctx.tenant_id,
            ctx.user_id,
            filename.to_string(),
            bytes.len() as i64,
            digest,
        );
        self.jobs.insert_job(&job, bytes).await?;

        info!(job_id = %job.id, tenant_id = %ctx.tenant_id, size = bytes.len(), "Voter file uploaded");
        Ok(job)
    }

    /// Run ingestion and mapping suggestion; moves the job to `mapping`.
    ///
    /// A job already past analysis returns its stored result.
    pub async fn analyze_job(&self, ctx: &TenantContext, job_id: Uuid) -> ImportResult<AnalysisResult> {
        let job = self.load(ctx, job_id).await?;
        if job.status != JobStatus::Pending {
            return job.analysis.ok_or(ImportError::InvalidTransition {
                from: job.status,
                to: JobStatus::Analyzing,
            });
        }

        self.transition(ctx, job_id, StatusChange::new(JobStatus::Pending, JobStatus::Analyzing))
            .await?;

        let analysis = match self.analyze_stored_file(ctx, job_id).await {
            Ok(analysis) => analysis,
            Err(e) => {
                if e.is_ingestion_error() {
                    warn!(job_id = %job_id, code = e.code(), "Voter file rejected: {}", e);
                } else {
                    error!(job_id = %job_id, "Analysis failed: {}", e);
                }
                let failed = StatusChange::failed(JobStatus::Analyzing, e.to_string());
                if let Err(mark_err) = self.jobs.transition(ctx.tenant_id, job_id, &failed).await {
                    error!(job_id = %job_id, "Failed to mark job failed: {}", mark_err);
                }
                return Err(e);
            }
        };

        if !self.jobs.complete_analysis(ctx.tenant_id, job_id, &analysis).await? {
            let current = self.load(ctx, job_id).await?;
            return Err(ImportError::InvalidTransition {
                from: current.status,
                to: JobStatus::Mapping,
            });
        }

        info!(
            job_id = %job_id,
            rows = analysis.total_rows,
            strategy = %analysis.suggested_matching_strategy,
            "Analysis complete"
        );
        Ok(analysis)
    }

    async fn analyze_stored_file(&self, ctx: &TenantContext, job_id: Uuid) -> ImportResult<AnalysisResult> {
        let bytes = self
            .jobs
            .load_file(ctx.tenant_id, job_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Uploaded file for job {} is missing", job_id))?;
        build_analysis(&bytes, &self.suggester, &self.settings).await
    }

    pub async fn get_analysis(&self, ctx: &TenantContext, job_id: Uuid) -> ImportResult<AnalysisResult> {
        let job = self.load(ctx, job_id).await?;
        job.analysis.ok_or(ImportError::NotAnalyzed(job.status))
    }

    // ======================================================================
    // Confirmation & queueing
    // ======================================================================

    /// Validate and record the operator's mappings and strategy.
    ///
    /// The job stays in `mapping`; it may be confirmed again until started.
    pub async fn confirm_mappings(
        &self,
        ctx: &TenantContext,
        request: ConfirmMappingsRequest,
    ) -> ImportResult<ImportJob> {
        let job = self.load(ctx, request.job_id).await?;
        if job.status != JobStatus::Mapping {
            return Err(ImportError::InvalidTransition {
                from: job.status,
                to: JobStatus::Queued,
            });
        }
        let analysis = job.analysis.as_ref().ok_or(ImportError::NotAnalyzed(job.status))?;

        matching::validate(request.matching_strategy, &request.confirmed_mappings)?;
        RowMapper::new(&analysis.headers, &request.confirmed_mappings)?;

        let confirmed = ConfirmedImport {
            mappings: request.confirmed_mappings,
            matching_strategy: request.matching_strategy,
            create_unmatched: request.create_unmatched,
            confirmed_at: Utc::now(),
        };

        if !self
            .jobs
            .save_confirmation(ctx.tenant_id, request.job_id, &confirmed)
            .await?
        {
            let current = self.load(ctx, request.job_id).await?;
            return Err(ImportError::InvalidTransition {
                from: current.status,
                to: JobStatus::Queued,
            });
        }

        info!(
            job_id = %request.job_id,
            strategy = %confirmed.matching_strategy,
            create_unmatched = confirmed.create_unmatched,
            "Mappings confirmed"
        );
        self.load(ctx, request.job_id).await
    }

    /// Queue a confirmed job for background processing
    pub async fn start_import(&self, ctx: &TenantContext, job_id: Uuid) -> ImportResult<StartImportResponse> {
        let job = self.load(ctx, job_id).await?;
        if job.status == JobStatus::Mapping && job.confirmed.is_none() {
            return Err(ImportError::InvalidMapping(
                "mappings must be confirmed before the import starts".to_string(),
            ));
        }

        self.transition(ctx, job_id, StatusChange::new(job.status, JobStatus::Queued))
            .await?;

        let queued = QueuedImportJob {
            job_id,
            tenant_id: ctx.tenant_id,
            submitted_by: ctx.user_id,
            submitted_at: Utc::now(),
        };
        if let Err(e) = self.dispatcher.dispatch(&queued).await {
            error!(job_id = %job_id, dispatcher = self.dispatcher.name(), "Failed to queue import: {}", e);
            // Nothing will ever pick the job up; hand it back so start can be retried
            let rollback = StatusChange::new(JobStatus::Queued, JobStatus::Mapping);
            match self.jobs.transition(ctx.tenant_id, job_id, &rollback).await {
                Ok(true) => {}
                Ok(false) => warn!(job_id = %job_id, "Import job left queued state before rollback"),
                Err(rollback_err) => {
                    error!(job_id = %job_id, "Failed to return import job to mapping: {:#}", rollback_err)
                }
            }
            return Err(ImportError::Storage(e.context("Import job could not be queued")));
        }

        Ok(StartImportResponse {
            job_id,
            status: JobStatus::Queued,
            message: "Import queued".to_string(),
        })
    }

    // ======================================================================
    // Background processing
    // ======================================================================

    /// Process a queued job to completion (worker side)
    pub async fn process_job(&self, queued: &QueuedImportJob) -> anyhow::Result<()> {
        let ctx = TenantContext::new(queued.tenant_id, queued.submitted_by);
        let job_id = queued.job_id;

        let Some(job) = self.jobs.get_job(ctx.tenant_id, job_id).await? else {
            warn!(job_id = %job_id, "Queued import job no longer exists, skipping");
            return Ok(());
        };
        if job.status != JobStatus::Queued {
            warn!(job_id = %job_id, status = %job.status, "Import job is not queued, skipping");
            return Ok(());
        }

        let started = StatusChange::new(JobStatus::Queued, JobStatus::Processing);
        if !self.jobs.transition(ctx.tenant_id, job_id, &started).await? {
            warn!(job_id = %job_id, "Import job was picked up elsewhere, skipping");
            return Ok(());
        }

        match self.run_rows(&ctx, &job).await {
            Ok(counts) => {
                let done = StatusChange::new(JobStatus::Processing, JobStatus::Completed);
                self.jobs.transition(ctx.tenant_id, job_id, &done).await?;
                info!(
                    job_id = %job_id,
                    processed = counts.rows_processed,
                    created = counts.rows_created,
                    updated = counts.rows_updated,
                    skipped = counts.rows_skipped,
                    errored = counts.rows_errored,
                    "Import completed"
                );
            }
            Err(e) => {
                warn!(job_id = %job_id, "Import failed: {:#}", e);
                let failed = StatusChange::failed(JobStatus::Processing, format!("{:#}", e));
                self.jobs.transition(ctx.tenant_id, job_id, &failed).await?;
            }
        }
        Ok(())
    }

    /// Row loop; an `Err` is fatal for the job
    async fn run_rows(&self, ctx: &TenantContext, job: &ImportJob) -> anyhow::Result<RowCounts> {
        let confirmed = job
            .confirmed
            .as_ref()
            .context("Job was queued without confirmed mappings")?;
        let bytes = self
            .jobs
            .load_file(ctx.tenant_id, job.id)
            .await?
            .context("Uploaded file is missing")?;
        let text = csv_ingest::decode(&bytes)?;
        let delimiter = csv_ingest::sniff_delimiter(text);

        let mut reader = csv_ingest::reader(text, delimiter);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mapper = RowMapper::new(&headers, &confirmed.mappings)?;

        let total_rows = reader
            .records()
            .filter(|r| r.as_ref().map_or(true, |rec| !csv_ingest::is_blank(rec)))
            .count() as i64;
        self.jobs.set_total_rows(ctx.tenant_id, job.id, total_rows).await?;

        let mut counts = RowCounts::default();
        let mut row_number: i64 = 0;
        let mut reader = csv_ingest::reader(text, delimiter);

        for record in reader.records() {
            if let Ok(rec) = &record {
                if csv_ingest::is_blank(rec) {
                    continue;
                }
            }
            row_number += 1;

            let (outcome, error) = match record {
                Ok(rec) => {
                    let cells = csv_ingest::record_cells(&rec, headers.len());
                    match self.process_row(ctx, &mapper, confirmed, &cells).await? {
                        Ok(resolution) => (outcome_of(resolution), None),
                        Err(row_error) => (
                            RowOutcome::Errored,
                            Some(RowErrorDetail {
                                row: row_number,
                                error: row_error.to_string(),
                                data: Some(mapper.raw_data(&cells)),
                            }),
                        ),
                    }
                }
                Err(e) => (
                    RowOutcome::Errored,
                    Some(RowErrorDetail {
                        row: row_number,
                        error: format!("Unreadable record: {}", e),
                        data: None,
                    }),
                ),
            };

            if let Some(detail) = &error {
                debug!(job_id = %job.id, row = row_number, "Row errored: {}", detail.error);
            }
            self.jobs
                .record_row_outcome(ctx.tenant_id, job.id, outcome, error.as_ref())
                .await
                .with_context(|| format!("Failed to record outcome of row {}", row_number))?;
            counts.apply(outcome);
        }

        Ok(counts)
    }

    /// Outer `Err` is an infrastructure failure, inner `Err` a bad row
    async fn process_row(
        &self,
        ctx: &TenantContext,
        mapper: &RowMapper,
        confirmed: &ConfirmedImport,
        cells: &[String],
    ) -> anyhow::Result<Result<ContactResolution, RowError>> {
        let row = match mapper.map_row(cells) {
            Ok(row) => row,
            Err(e) => return Ok(Err(e)),
        };
        for issue in &row.vote_issues {
            warn!("Ignoring vote-history cell: {}", issue);
        }
        let plan = match MatchPlan::for_row(confirmed.matching_strategy, &row.values) {
            Ok(plan) => plan,
            Err(e) => return Ok(Err(e)),
        };

        let resolution = self
            .contacts
            .resolve_and_apply(
                ctx.tenant_id,
                &plan,
                &row.values,
                &row.votes,
                confirmed.create_unmatched,
            )
            .await?;
        Ok(Ok(resolution))
    }

    // ======================================================================
    // Reads & housekeeping
    // ======================================================================

    /// Full job record with the first page of row errors
    pub async fn get_job(&self, ctx: &TenantContext, job_id: Uuid) -> ImportResult<ImportJob> {
        let mut job = self.load(ctx, job_id).await?;
        if job.counts.rows_errored > 0 {
            let (errors, _) = self
                .jobs
                .list_errors(ctx.tenant_id, job_id, ERROR_DETAILS_DISPLAY_LIMIT as i64, 0)
                .await?;
            job.error_details = errors;
        }
        Ok(job)
    }

    /// Cheap polling read; staleness is judged against `now`
    pub async fn get_job_progress(
        &self,
        ctx: &TenantContext,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> ImportResult<JobProgress> {
        let job = self.load(ctx, job_id).await?;
        Ok(JobProgress::from_job(&job, now, self.settings.stale_after))
    }

    pub async fn list_jobs(&self, ctx: &TenantContext, limit: i64, offset: i64) -> ImportResult<JobListResponse> {
        let (items, total) = self
            .jobs
            .list_jobs(ctx.tenant_id, limit.clamp(1, MAX_PAGE_SIZE), offset.max(0))
            .await?;
        Ok(JobListResponse { items, total })
    }

    pub async fn list_job_errors(
        &self,
        ctx: &TenantContext,
        job_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> ImportResult<JobErrorsResponse> {
        self.load(ctx, job_id).await?;
        let (items, total) = self
            .jobs
            .list_errors(ctx.tenant_id, job_id, limit.clamp(1, MAX_PAGE_SIZE), offset.max(0))
            .await?;
        Ok(JobErrorsResponse { items, total })
    }

    /// Delete a job and its file; refused while a worker is on it
    pub async fn delete_job(&self, ctx: &TenantContext, job_id: Uuid) -> ImportResult<()> {
        match self.jobs.delete_job(ctx.tenant_id, job_id).await? {
            DeleteOutcome::Deleted => {
                info!(job_id = %job_id, "Import job deleted");
                Ok(())
            }
            DeleteOutcome::NotFound => Err(ImportError::JobNotFound(job_id)),
            DeleteOutcome::Busy(status) => Err(ImportError::JobBusy(status)),
        }
    }

    pub fn list_matching_strategies(&self) -> MatchingStrategiesResponse {
        matching::describe_all()
    }
}

fn outcome_of(resolution: ContactResolution) -> RowOutcome {
    match resolution {
        ContactResolution::Updated { .. } => RowOutcome::Updated,
        ContactResolution::Created { .. } => RowOutcome::Created,
        ContactResolution::Unmatched => RowOutcome::Skipped,
    }
}
