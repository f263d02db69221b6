//! Job progress snapshots for polling clients

use chrono::{DateTime, Duration, Utc};

use crate::types::{ImportJob, JobProgress, JobStatus};

impl JobProgress {
    /// Snapshot of a job's counters; staleness is judged against `now`
    pub fn from_job(job: &ImportJob, now: DateTime<Utc>, stale_after: Duration) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            rows_processed: job.counts.rows_processed,
            rows_created: job.counts.rows_created,
            rows_updated: job.counts.rows_updated,
            rows_skipped: job.counts.rows_skipped,
            rows_errored: job.counts.rows_errored,
            total_rows: job.total_rows,
            percent_complete: percent_complete(job.counts.rows_processed, job.total_rows),
            is_stale: is_stale(job.status, job.updated_at, now, stale_after),
            updated_at: job.updated_at,
        }
    }
}

pub fn percent_complete(rows_processed: i64, total_rows: Option<i64>) -> f64 {
    match total_rows {
        Some(total) if total > 0 => rows_processed as f64 / total as f64 * 100.0,
        _ => 0.0,
    }
}

/// A processing job with no update within `stale_after`
pub fn is_stale(
    status: JobStatus,
    updated_at: DateTime<Utc>,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> bool {
    status == JobStatus::Processing && now - updated_at > stale_after
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job(status: JobStatus, processed: i64, total: Option<i64>) -> ImportJob {
        let mut job = ImportJob::new(Uuid::nil(), Uuid::nil(), "voters.csv".into(), 10, String::new());
        job.status = status;
        job.counts.rows_processed = processed;
        job.counts.rows_created = processed;
        job.total_rows = total;
        job
    }

    #[test]
    fn test_percent_complete() {
        assert_eq!(percent_complete(50, Some(200)), 25.0);
        assert_eq!(percent_complete(3, Some(3)), 100.0);
        assert_eq!(percent_complete(5, None), 0.0);
        assert_eq!(percent_complete(0, Some(0)), 0.0);
    }

    #[test]
    fn test_progress_reports_counts() {
        let job = job(JobStatus::Processing, 50, Some(200));
        let progress = JobProgress::from_job(&job, job.updated_at, Duration::minutes(10));
        assert_eq!(progress.percent_complete, 25.0);
        assert_eq!(progress.rows_created, 50);
        assert!(!progress.is_stale);
    }

    #[test]
    fn test_stale_after_threshold_without_changing_status() {
        let job = job(JobStatus::Processing, 10, Some(100));
        let later = job.updated_at + Duration::minutes(11);

        let progress = JobProgress::from_job(&job, later, Duration::minutes(10));

        assert!(progress.is_stale);
        assert_eq!(progress.status, JobStatus::Processing);
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn test_only_processing_jobs_go_stale() {
        let job = job(JobStatus::Queued, 0, Some(100));
        let later = job.updated_at + Duration::hours(2);
        assert!(!JobProgress::from_job(&job, later, Duration::minutes(10)).is_stale);
    }

    #[test]
    fn test_threshold_is_configurable() {
        let job = job(JobStatus::Processing, 1, Some(100));
        let later = job.updated_at + Duration::minutes(3);
        assert!(JobProgress::from_job(&job, later, Duration::minutes(2)).is_stale);
        assert!(!JobProgress::from_job(&job, later, Duration::minutes(5)).is_stale);
    }
}
