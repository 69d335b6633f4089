//! Extraction error kinds and the error records persisted for failed documents.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ExtractionMethod;
use crate::engine::EngineError;
use crate::store::StoreError;

/// Failure taxonomy for a single extraction step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    /// The input is not an acceptable document (wrong type, corrupt, too large, missing).
    #[error("document validation failed: {0}")]
    Validation(String),
    /// The OCR engine rejected the document itself; retrying will not help.
    #[error("unsupported document: {0}")]
    Unsupported(String),
    #[error("async job {job_id} did not finish within {}s", .waited.as_secs())]
    Timeout { job_id: String, waited: Duration },
    #[error("extraction service error: {0}")]
    Service(String),
    /// Soft failure: the result was produced but confidence is too low.
    #[error("extraction quality below threshold: {0}")]
    Quality(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ExtractionError {
    /// Stable kind name written into error records.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::Validation(_) => "DocumentValidationError",
            ExtractionError::Unsupported(_) => "UnsupportedDocumentError",
            ExtractionError::Timeout { .. } => "ExtractionTimeoutError",
            ExtractionError::Service(_) => "ExtractionServiceError",
            ExtractionError::Quality(_) => "ExtractionQualityError",
            ExtractionError::Storage(_) => "StorageError",
        }
    }

    /// Whether another attempt (same method or fallback) could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExtractionError::Timeout { .. } | ExtractionError::Service(_)
        )
    }
}

impl From<EngineError> for ExtractionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Unsupported(msg) => ExtractionError::Unsupported(msg),
            EngineError::Transient(msg) => ExtractionError::Service(msg),
        }
    }
}

impl From<StoreError> for ExtractionError {
    fn from(err: StoreError) -> Self {
        ExtractionError::Storage(err.to_string())
    }
}

/// Every extraction path for a document was exhausted.
#[derive(Error, Debug, Clone)]
#[error(
    "extraction failed for {document_key} after {attempts} attempt(s) using {}: {last_error}",
    method_list(.attempted_methods)
)]
pub struct ExtractionFailure {
    pub document_key: String,
    /// Distinct methods tried, in order.
    pub attempted_methods: Vec<ExtractionMethod>,
    pub attempts: u32,
    pub last_error: ExtractionError,
    pub elapsed: Duration,
}

fn method_list(methods: &[ExtractionMethod]) -> String {
    if methods.is_empty() {
        return "no method".to_string();
    }
    methods
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(" then ")
}

/// Structured record persisted under the error prefix when a document fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub original_file: String,
    pub error_kind: String,
    pub error_message: String,
    #[serde(default)]
    pub attempted_methods: Vec<ExtractionMethod>,
    #[serde(default)]
    pub attempts: u32,
    pub elapsed_seconds: f64,
    pub processing_timestamp: DateTime<Utc>,
    pub error_timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    /// Record for a failure outside the extraction loop (validation, storage).
    pub fn from_error(
        source_key: &str,
        error: &ExtractionError,
        elapsed: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            original_file: source_key.to_string(),
            error_kind: error.kind().to_string(),
            error_message: error.to_string(),
            attempted_methods: Vec::new(),
            attempts: 0,
            elapsed_seconds: elapsed.as_secs_f64(),
            processing_timestamp: started_at,
            error_timestamp: Utc::now(),
        }
    }

    pub fn from_failure(
        failure: &ExtractionFailure,
        elapsed: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            original_file: failure.document_key.clone(),
            error_kind: failure.last_error.kind().to_string(),
            error_message: failure.to_string(),
            attempted_methods: failure.attempted_methods.clone(),
            attempts: failure.attempts,
            elapsed_seconds: elapsed.as_secs_f64(),
            processing_timestamp: started_at,
            error_timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(
            ExtractionError::Validation("x".into()).kind(),
            "DocumentValidationError"
        );
        assert_eq!(
            ExtractionError::Timeout {
                job_id: "j".into(),
                waited: Duration::from_secs(1)
            }
            .kind(),
            "ExtractionTimeoutError"
        );
        assert_eq!(ExtractionError::Storage("x".into()).kind(), "StorageError");
    }

    #[test]
    fn only_service_and_timeout_retry() {
        assert!(ExtractionError::Service("x".into()).is_retryable());
        assert!(
            ExtractionError::Timeout {
                job_id: "j".into(),
                waited: Duration::ZERO
            }
            .is_retryable()
        );
        assert!(!ExtractionError::Unsupported("x".into()).is_retryable());
        assert!(!ExtractionError::Validation("x".into()).is_retryable());
        assert!(!ExtractionError::Quality("x".into()).is_retryable());
        assert!(!ExtractionError::Storage("x".into()).is_retryable());
    }

    #[test]
    fn engine_errors_map_to_extraction_errors() {
        assert_eq!(
            ExtractionError::from(EngineError::Unsupported("bad pdf".into())),
            ExtractionError::Unsupported("bad pdf".into())
        );
        assert_eq!(
            ExtractionError::from(EngineError::Transient("503".into())),
            ExtractionError::Service("503".into())
        );
    }

    #[test]
    fn timeout_display() {
        let err = ExtractionError::Timeout {
            job_id: "job-1".into(),
            waited: Duration::from_secs(300),
        };
        assert_eq!(err.to_string(), "async job job-1 did not finish within 300s");
    }

    #[test]
    fn failure_record_carries_methods() {
        let failure = ExtractionFailure {
            document_key: "input-articles/a.pdf".into(),
            attempted_methods: vec![ExtractionMethod::Sync, ExtractionMethod::Async],
            attempts: 4,
            last_error: ExtractionError::Service("throttled".into()),
            elapsed: Duration::from_secs(12),
        };
        assert!(failure.to_string().contains("synchronous then asynchronous"));

        let record = ErrorRecord::from_failure(&failure, Duration::from_secs(13), Utc::now());
        assert_eq!(record.original_file, "input-articles/a.pdf");
        assert_eq!(record.error_kind, "ExtractionServiceError");
        assert_eq!(record.attempts, 4);
        assert_eq!(record.elapsed_seconds, 13.0);
        assert!(record.error_message.contains("throttled"));
    }
}
