//! Error types for the import engine.

use thiserror::Error;
use uuid::Uuid;

use crate::types::{IdentifierKind, JobStatus, MatchingStrategy};

/// Request- and job-level failures surfaced by the import engine.
#[derive(Debug, Error)]
pub enum ImportError {
    /// File has no usable header row or no data rows.
    #[error("Malformed file: {0}")]
    MalformedFile(String),

    /// File exceeds the configured size ceiling.
    #[error("File is {size} bytes, the limit is {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    /// File is not valid UTF-8.
    #[error("File is not UTF-8 encoded: {0}")]
    UnreadableEncoding(String),

    /// Chosen strategy needs an identifier that no column is mapped to.
    #[error("Strategy '{strategy}' requires a column mapped to '{}'", .missing.as_str())]
    UnsatisfiableStrategy {
        strategy: MatchingStrategy,
        missing: IdentifierKind,
    },

    /// Confirmed mappings are inconsistent with the analyzed headers.
    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("Import job {0} not found")]
    JobNotFound(Uuid),

    #[error("Import job is {from}, cannot move to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Import job is {0} and has no analysis")]
    NotAnalyzed(JobStatus),

    /// Job is being worked on and cannot be deleted.
    #[error("Import job is {0} and cannot be deleted")]
    JobBusy(JobStatus),

    /// Infrastructure failure (database, queue).
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ImportError {
    /// Stable error code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::MalformedFile(_) => "MALFORMED_FILE",
            ImportError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            ImportError::UnreadableEncoding(_) => "UNREADABLE_ENCODING",
            ImportError::UnsatisfiableStrategy { .. } => "UNSATISFIABLE_STRATEGY",
            ImportError::InvalidMapping(_) => "INVALID_MAPPING",
            ImportError::JobNotFound(_) => "NOT_FOUND",
            ImportError::InvalidTransition { .. } => "INVALID_STATE",
            ImportError::NotAnalyzed(_) => "NOT_ANALYZED",
            ImportError::JobBusy(_) => "JOB_BUSY",
            ImportError::Storage(_) => "DATABASE_ERROR",
        }
    }

    /// Errors raised while reading the file fail the job at `analyzing`
    pub fn is_ingestion_error(&self) -> bool {
        matches!(
            self,
            ImportError::MalformedFile(_)
                | ImportError::FileTooLarge { .. }
                | ImportError::UnreadableEncoding(_)
        )
    }
}

pub type ImportResult<T> = std::result::Result<T, ImportError>;

/// Reason a single row could not be imported. Never escapes the row loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("Required field '{0}' is empty")]
    MissingRequired(&'static str),

    #[error("Invalid {field} '{value}': {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("Row has no value for any matching identifier ({0})")]
    NoIdentifier(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsatisfiable_message_names_identifier() {
        let err = ImportError::UnsatisfiableStrategy {
            strategy: MatchingStrategy::VoterIdOnly,
            missing: IdentifierKind::VoterId,
        };
        assert_eq!(err.code(), "UNSATISFIABLE_STRATEGY");
        assert_eq!(
            err.to_string(),
            "Strategy 'voter_id_only' requires a column mapped to 'voter_id'"
        );
    }

    #[test]
    fn test_ingestion_errors_classified() {
        assert!(ImportError::MalformedFile("x".into()).is_ingestion_error());
        assert!(ImportError::FileTooLarge { size: 2, limit: 1 }.is_ingestion_error());
        assert!(!ImportError::JobBusy(JobStatus::Processing).is_ingestion_error());
    }

    #[test]
    fn test_row_error_messages() {
        assert_eq!(
            RowError::MissingRequired("first_name").to_string(),
            "Required field 'first_name' is empty"
        );
    }
}
