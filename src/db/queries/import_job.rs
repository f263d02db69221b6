//! Import job database queries

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{DeleteOutcome, JobStore};
use crate::types::{
    AnalysisResult, ConfirmedImport, ImportJob, JobStatus, MatchingStrategy, RowCounts,
    RowErrorDetail, RowOutcome, StatusChange,
};

const JOB_COLUMNS: &str = r#"
    id, tenant_id, created_by, job_type, status, original_filename,
    file_size_bytes, file_sha256, total_rows,
    rows_processed, rows_created, rows_updated, rows_skipped, rows_errored,
    matching_strategy, create_unmatched, confirmed, analysis, error_message,
    started_at, completed_at, created_at, updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    tenant_id: Uuid,
    created_by: Uuid,
    job_type: String,
    status: String,
    original_filename: String,
    file_size_bytes: i64,
    file_sha256: String,
    total_rows: Option<i64>,
    rows_processed: i64,
    rows_created: i64,
    rows_updated: i64,
    rows_skipped: i64,
    rows_errored: i64,
    matching_strategy: Option<String>,
    create_unmatched: bool,
    confirmed: Option<Json<ConfirmedImport>>,
    analysis: Option<Json<AnalysisResult>>,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for ImportJob {
    type Error = anyhow::Error;

    fn try_from(row: JobRow) -> Result<Self> {
        let matching_strategy = match row.matching_strategy.as_deref() {
            Some(key) => Some(
                MatchingStrategy::from_key(key)
                    .with_context(|| format!("Unknown matching strategy '{}' on job {}", key, row.id))?,
            ),
            None => None,
        };

        Ok(ImportJob {
            id: row.id,
            tenant_id: row.tenant_id,
            created_by: row.created_by,
            job_type: row.job_type,
            status: row.status.parse()?,
            original_filename: row.original_filename,
            file_size_bytes: row.file_size_bytes,
            file_sha256: row.file_sha256,
            total_rows: row.total_rows,
            counts: RowCounts {
                rows_processed: row.rows_processed,
                rows_created: row.rows_created,
                rows_updated: row.rows_updated,
                rows_skipped: row.rows_skipped,
                rows_errored: row.rows_errored,
            },
            matching_strategy,
            create_unmatched: row.create_unmatched,
            confirmed: row.confirmed.map(|c| c.0),
            analysis: row.analysis.map(|a| a.0),
            error_message: row.error_message,
            error_details: Vec::new(),
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ErrorRow {
    row_number: i64,
    error: String,
    data: Option<Json<HashMap<String, String>>>,
}

impl From<ErrorRow> for RowErrorDetail {
    fn from(row: ErrorRow) -> Self {
        RowErrorDetail {
            row: row.row_number,
            error: row.error,
            data: row.data.map(|d| d.0),
        }
    }
}

fn busy_statuses() -> Vec<&'static str> {
    JobStatus::ALL
        .into_iter()
        .filter(|s| !s.is_deletable())
        .map(|s| s.as_str())
        .collect()
}

/// PostgreSQL-backed job store
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_errors(
        &self,
        job_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RowErrorDetail>> {
        let rows = sqlx::query_as::<_, ErrorRow>(
            r#"
            SELECT row_number, error, data
            FROM import_job_errors
            WHERE job_id = $1
            ORDER BY row_number, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RowErrorDetail::from).collect())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_job(&self, job: &ImportJob, file: &[u8]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO import_jobs (
                id, tenant_id, created_by, job_type, status, original_filename,
                file_size_bytes, file_sha256, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id)
        .bind(job.tenant_id)
        .bind(job.created_by)
        .bind(&job.job_type)
        .bind(job.status.as_str())
        .bind(&job.original_filename)
        .bind(job.file_size_bytes)
        .bind(&job.file_sha256)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO import_job_files (job_id, content) VALUES ($1, $2)")
            .bind(job.id)
            .bind(file)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_job(&self, tenant_id: Uuid, job_id: Uuid) -> Result<Option<ImportJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM import_jobs WHERE id = $1 AND tenant_id = $2",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ImportJob::try_from).transpose()
    }

    async fn load_file(&self, tenant_id: Uuid, job_id: Uuid) -> Result<Option<Vec<u8>>> {
        let content: Option<Vec<u8>> = sqlx::query_scalar(
            r#"
            SELECT f.content
            FROM import_job_files f
            JOIN import_jobs j ON j.id = f.job_id
            WHERE f.job_id = $1 AND j.tenant_id = $2
            "#,
        )
        .bind(job_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(content)
    }

    async fn list_jobs(&self, tenant_id: Uuid, limit: i64, offset: i64) -> Result<(Vec<ImportJob>, i64)> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {}
            FROM import_jobs
            WHERE tenant_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
            JOB_COLUMNS
        ))
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM import_jobs WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;

        let jobs = rows
            .into_iter()
            .map(ImportJob::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok((jobs, total))
    }

    async fn transition(&self, tenant_id: Uuid, job_id: Uuid, change: &StatusChange) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET
                status = $4,
                started_at = CASE WHEN $4 = 'processing' THEN $5 ELSE started_at END,
                completed_at = CASE WHEN $4 IN ('completed', 'failed') THEN $5 ELSE completed_at END,
                error_message = COALESCE($6, error_message),
                updated_at = $5
            WHERE id = $1 AND tenant_id = $2 AND status = $3
            "#,
        )
        .bind(job_id)
        .bind(tenant_id)
        .bind(change.from.as_str())
        .bind(change.to.as_str())
        .bind(change.at)
        .bind(&change.error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete_analysis(&self, tenant_id: Uuid, job_id: Uuid, analysis: &AnalysisResult) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET
                analysis = $3,
                total_rows = $4,
                matching_strategy = $5,
                status = 'mapping',
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND status = 'analyzing'
            "#,
        )
        .bind(job_id)
        .bind(tenant_id)
        .bind(Json(analysis))
        .bind(analysis.total_rows)
        .bind(analysis.suggested_matching_strategy.key())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save_confirmation(&self, tenant_id: Uuid, job_id: Uuid, confirmed: &ConfirmedImport) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET
                confirmed = $3,
                matching_strategy = $4,
                create_unmatched = $5,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND status = 'mapping'
            "#,
        )
        .bind(job_id)
        .bind(tenant_id)
        .bind(Json(confirmed))
        .bind(confirmed.matching_strategy.key())
        .bind(confirmed.create_unmatched)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_total_rows(&self, tenant_id: Uuid, job_id: Uuid, total_rows: i64) -> Result<()> {
        sqlx::query(
            "UPDATE import_jobs SET total_rows = $3, updated_at = NOW() WHERE id = $1 AND tenant_id = $2",
        )
        .bind(job_id)
        .bind(tenant_id)
        .bind(total_rows)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_row_outcome(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        outcome: RowOutcome,
        error: Option<&RowErrorDetail>,
    ) -> Result<()> {
        let bump = |o: RowOutcome| i64::from(outcome == o);
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET
                rows_processed = rows_processed + 1,
                rows_created = rows_created + $3,
                rows_updated = rows_updated + $4,
                rows_skipped = rows_skipped + $5,
                rows_errored = rows_errored + $6,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(job_id)
        .bind(tenant_id)
        .bind(bump(RowOutcome::Created))
        .bind(bump(RowOutcome::Updated))
        .bind(bump(RowOutcome::Skipped))
        .bind(bump(RowOutcome::Errored))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            anyhow::bail!("Import job {} not found while recording row outcome", job_id);
        }

        if let Some(detail) = error {
            sqlx::query(
                "INSERT INTO import_job_errors (job_id, row_number, error, data) VALUES ($1, $2, $3, $4)",
            )
            .bind(job_id)
            .bind(detail.row)
            .bind(&detail.error)
            .bind(detail.data.as_ref().map(Json))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_errors(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RowErrorDetail>, i64)> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT rows_errored FROM import_jobs WHERE id = $1 AND tenant_id = $2",
        )
        .bind(job_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        match total {
            None => Ok((Vec::new(), 0)),
            Some(total) => Ok((self.fetch_errors(job_id, limit, offset).await?, total)),
        }
    }

    async fn delete_job(&self, tenant_id: Uuid, job_id: Uuid) -> Result<DeleteOutcome> {
        let result = sqlx::query(
            "DELETE FROM import_jobs WHERE id = $1 AND tenant_id = $2 AND NOT (status = ANY($3))",
        )
        .bind(job_id)
        .bind(tenant_id)
        .bind(busy_statuses())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(DeleteOutcome::Deleted);
        }

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM import_jobs WHERE id = $1 AND tenant_id = $2")
                .bind(job_id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;

        match status {
            None => Ok(DeleteOutcome::NotFound),
            Some(status) => Ok(DeleteOutcome::Busy(status.parse()?)),
        }
    }
}
