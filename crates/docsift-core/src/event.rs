//! Storage notification events and the report returned for them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::coordinator::{Coordinator, DocumentSummary};
use crate::error::{ErrorRecord, ExtractionError};
use crate::{Outcome, ProcessingResult};

#[derive(Error, Debug)]
pub enum EventError {
    #[error("invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid event structure: no Records found")]
    MissingRecords,
    #[error("record {index} has no s3.object.key")]
    MissingKey { index: usize },
    #[error("record {index} has an undecodable key {key:?}: {reason}")]
    BadKey {
        index: usize,
        key: String,
        reason: String,
    },
}

/// One event record: its URL-decoded object key, or why it has none.
pub type RecordKey = Result<String, EventError>;

/// Object keys named by an S3 event notification, one entry per record.
///
/// Keys are URL-decoded (`+` becomes a space). A malformed record yields an
/// `Err` entry without affecting the others; only an event with no
/// `Records` array is rejected as a whole.
pub fn parse_event(json: &str) -> Result<Vec<RecordKey>, EventError> {
    let event: serde_json::Value = serde_json::from_str(json)?;
    let records = event["Records"]
        .as_array()
        .ok_or(EventError::MissingRecords)?;

    Ok(records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let raw = record["s3"]["object"]["key"]
                .as_str()
                .ok_or(EventError::MissingKey { index })?;
            let plus_decoded = raw.replace('+', " ");
            urlencoding::decode(&plus_decoded)
                .map(|key| key.into_owned())
                .map_err(|e| EventError::BadKey {
                    index,
                    key: raw.to_string(),
                    reason: e.to_string(),
                })
        })
        .collect())
}

/// Whether a key names an input document: under `input_prefix`, a `.pdf`
/// (any case), and not a hidden (`.`) or system (`_`) file.
pub fn should_process(key: &str, input_prefix: &str) -> bool {
    if !key.starts_with(input_prefix) {
        tracing::debug!(key, "skipping: outside input prefix");
        return false;
    }
    if !key.to_ascii_lowercase().ends_with(".pdf") {
        tracing::debug!(key, "skipping: not a PDF");
        return false;
    }
    let file_name = key.rsplit('/').next().unwrap_or(key);
    if file_name.starts_with('.') || file_name.starts_with('_') {
        tracing::debug!(key, "skipping: hidden or system file");
        return false;
    }
    true
}

/// Failed result for a record that never named a usable document.
///
/// No error record is written: the record has no trustworthy key to file it under.
fn rejected_record(err: &EventError, timestamp: DateTime<Utc>) -> ProcessingResult {
    let source_key = match err {
        EventError::BadKey { key, .. } => key.clone(),
        _ => "unknown".to_string(),
    };
    let error = ExtractionError::Validation(format!("record processing error: {err}"));
    ProcessingResult {
        outcome: Outcome::Failed {
            error_key: None,
            error: ErrorRecord::from_error(&source_key, &error, Duration::ZERO, timestamp),
        },
        source_key,
        timestamp,
        elapsed: Duration::ZERO,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub total_processed: usize,
    pub successful: usize,
    pub partial: usize,
    pub failed: usize,
    pub skipped: usize,
    pub processing_time_seconds: f64,
}

/// Outcome of handling one event, suitable for returning to the invoker.
#[derive(Debug, Clone, Serialize)]
pub struct EventReport {
    pub message: String,
    pub summary: EventSummary,
    pub results: Vec<DocumentSummary>,
    pub timestamp: DateTime<Utc>,
}

impl Coordinator {
    /// Process every eligible key named by an S3 event notification.
    ///
    /// Only an event without `Records` is an error. Malformed records and
    /// document failures are reported as failed rows in the returned
    /// [`EventReport`], in event order.
    pub async fn handle_event(&self, event_json: &str) -> Result<EventReport, EventError> {
        let started = Instant::now();
        let timestamp = Utc::now();

        let records = parse_event(event_json)?;
        let seen = records.len();
        let mut eligible: Vec<(usize, String)> = Vec::new();
        let mut rejected: Vec<(usize, ProcessingResult)> = Vec::new();
        for (index, record) in records.into_iter().enumerate() {
            match record {
                Ok(key) if should_process(&key, &self.config().prefixes.input) => {
                    eligible.push((index, key));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(index, error = %e, "rejecting event record");
                    rejected.push((index, rejected_record(&e, timestamp)));
                }
            }
        }
        let skipped = seen - eligible.len() - rejected.len();
        tracing::info!(
            records = seen,
            eligible = eligible.len(),
            rejected = rejected.len(),
            skipped,
            "handling event"
        );

        let keys: Vec<String> = eligible.iter().map(|(_, key)| key.clone()).collect();
        let batch = self.process_batch(keys).await;

        let mut rows: Vec<(usize, &ProcessingResult)> = batch
            .succeeded
            .iter()
            .chain(batch.failed.iter())
            .map(|r| {
                let index = eligible
                    .iter()
                    .find(|(_, key)| *key == r.source_key)
                    .map_or(usize::MAX, |(index, _)| *index);
                (index, r)
            })
            .collect();
        rows.extend(rejected.iter().map(|(index, r)| (*index, r)));
        rows.sort_by_key(|(index, _)| *index);
        let results: Vec<DocumentSummary> = rows
            .into_iter()
            .map(|(_, r)| DocumentSummary::new(r, self.config()))
            .collect();

        let total = batch.total() + rejected.len();
        let successful = batch.succeeded.len();
        let failed = batch.failed.len() + rejected.len();
        let message = if total == 0 {
            "No records to process".to_string()
        } else {
            format!("Processed {total} document(s): {successful} successful, {failed} failed")
        };

        Ok(EventReport {
            message,
            summary: EventSummary {
                total_processed: total,
                successful,
                partial: batch.partial_count(),
                failed,
                skipped,
                processing_time_seconds: started.elapsed().as_secs_f64(),
            },
            results,
            timestamp,
        })
    }
}
