//! Database module
//!
//! Import jobs and contacts are reached through the `JobStore` and
//! `ContactStore` traits. PostgreSQL backs production; `memory` backs tests
//! and the `STORAGE_BACKEND=memory` development mode.

pub mod memory;
pub mod queries;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::matching::MatchPlan;
use crate::types::{
    AnalysisResult, ConfirmedImport, ContactResolution, ContactValues, ImportJob, JobStatus,
    RowErrorDetail, RowOutcome, StatusChange, VoteHistoryEntry,
};

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run database migrations.
///
/// Applied versions missing from the compiled migration list are logged;
/// sqlx refuses to continue in that case.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    let migrator = sqlx::migrate!("./migrations");

    let compiled_versions: Vec<i64> = migrator
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .map(|m| m.version)
        .collect();

    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = '_sqlx_migrations')",
    )
    .fetch_one(pool)
    .await?;

    if table_exists {
        let applied: Vec<(i64,)> =
            sqlx::query_as("SELECT version FROM _sqlx_migrations ORDER BY version")
                .fetch_all(pool)
                .await?;
        for (version,) in applied {
            if !compiled_versions.contains(&version) {
                warn!("Applied migration {} is not part of this build", version);
            }
        }
    }

    migrator.run(pool).await?;

    info!("Database migrations complete");
    Ok(())
}

/// Result of a conditional delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    Busy(JobStatus),
}

/// Persistence for import jobs, their files and row errors.
///
/// Every method is scoped by tenant. Status-changing writes are
/// compare-and-set on the current status and return `false` when the job
/// was not in the expected state.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &ImportJob, file: &[u8]) -> Result<()>;

    /// Single job row; `error_details` is left empty
    async fn get_job(&self, tenant_id: Uuid, job_id: Uuid) -> Result<Option<ImportJob>>;

    async fn load_file(&self, tenant_id: Uuid, job_id: Uuid) -> Result<Option<Vec<u8>>>;

    /// Newest first, with the total count
    async fn list_jobs(&self, tenant_id: Uuid, limit: i64, offset: i64) -> Result<(Vec<ImportJob>, i64)>;

    /// Move `from -> to`; sets `started_at` entering processing and
    /// `completed_at` entering a terminal state
    async fn transition(&self, tenant_id: Uuid, job_id: Uuid, change: &StatusChange) -> Result<bool>;

    /// Store the analysis and move analyzing -> mapping in one write
    async fn complete_analysis(&self, tenant_id: Uuid, job_id: Uuid, analysis: &AnalysisResult) -> Result<bool>;

    /// Record confirmed choices; job must be in mapping
    async fn save_confirmation(&self, tenant_id: Uuid, job_id: Uuid, confirmed: &ConfirmedImport) -> Result<bool>;

    async fn set_total_rows(&self, tenant_id: Uuid, job_id: Uuid, total_rows: i64) -> Result<()>;

    /// Atomically bump `rows_processed` and one outcome counter, storing the
    /// error detail for errored rows in the same write
    async fn record_row_outcome(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        outcome: RowOutcome,
        error: Option<&RowErrorDetail>,
    ) -> Result<()>;

    /// Ordered by row, with the total count
    async fn list_errors(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RowErrorDetail>, i64)>;

    /// Delete unless the job is busy
    async fn delete_job(&self, tenant_id: Uuid, job_id: Uuid) -> Result<DeleteOutcome>;
}

/// The tenant's contact store, shared with every other contact writer
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Resolve the row against existing contacts and write it, as one
    /// atomic unit.
    ///
    /// Keys are tried in plan order; the first hit is updated with `values`.
    /// With no hit a contact is created when `create_unmatched` is set.
    /// Vote history is attached to whichever contact the row resolved to.
    async fn resolve_and_apply(
        &self,
        tenant_id: Uuid,
        plan: &MatchPlan,
        values: &ContactValues,
        votes: &[VoteHistoryEntry],
        create_unmatched: bool,
    ) -> Result<ContactResolution>;
}
