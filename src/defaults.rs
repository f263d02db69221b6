//! Import tuning defaults

use std::time::Duration;

/// Practical ceiling for uploaded voter files
pub const MAX_FILE_SIZE_BYTES: u64 = 50 * 1024 * 1024;

/// Jobs in `processing` with no update for this long are reported as stale
pub const STALE_JOB_THRESHOLD_MINUTES: i64 = 10;

/// Suggestions below this confidence are left unmapped
pub const MIN_MAPPING_CONFIDENCE: f64 = 0.5;

/// Data rows kept for previews and identifier coverage
pub const SAMPLE_ROW_COUNT: usize = 5;

/// Share of sample rows an identifier must fill to count as well covered
pub const IDENTIFIER_COVERAGE_THRESHOLD: f64 = 0.8;

/// Error rows embedded in the job view
pub const ERROR_DETAILS_DISPLAY_LIMIT: usize = 100;

pub const CLASSIFIER_TIMEOUT_MS: u64 = 5_000;

/// Runtime import settings
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub max_file_bytes: u64,
    pub stale_after: chrono::Duration,
    pub min_confidence: f64,
    pub sample_rows: usize,
    pub coverage_threshold: f64,
    pub classifier_timeout: Duration,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            max_file_bytes: MAX_FILE_SIZE_BYTES,
            stale_after: chrono::Duration::minutes(STALE_JOB_THRESHOLD_MINUTES),
            min_confidence: MIN_MAPPING_CONFIDENCE,
            sample_rows: SAMPLE_ROW_COUNT,
            coverage_threshold: IDENTIFIER_COVERAGE_THRESHOLD,
            classifier_timeout: Duration::from_millis(CLASSIFIER_TIMEOUT_MS),
        }
    }
}
