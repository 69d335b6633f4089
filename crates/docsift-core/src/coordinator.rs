//! Per-document entry point and the batch worker pool.
//!
//! [`Coordinator::process`] is the only catch-all boundary: every failure
//! below it becomes a `Failed` [`ProcessingResult`] with a best-effort error
//! record, and nothing propagates to the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::engine::OcrEngine;
use crate::error::{ErrorRecord, ExtractionError, ExtractionFailure};
use crate::orchestrator::{Extractor, backoff_delay};
use crate::persist::Persister;
use crate::store::{BlobStore, StoreError};
use crate::{
    Config, Document, ExtractionMethod, ExtractionResult, MB, Outcome, ProcessingResult,
    ProcessingStatus, ProgressEvent,
};

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Check that `bytes` stored under `key` is a PDF we are willing to process.
pub fn validate_document(key: &str, bytes: &[u8], config: &Config) -> Result<(), ExtractionError> {
    if !key.to_ascii_lowercase().ends_with(".pdf") {
        return Err(ExtractionError::Validation(format!(
            "{key} is not a PDF; only .pdf documents are supported"
        )));
    }
    if bytes.is_empty() {
        return Err(ExtractionError::Validation(format!("{key} is empty")));
    }
    let size = bytes.len() as u64;
    if size > config.max_document_size_bytes {
        return Err(ExtractionError::Validation(format!(
            "{key} is {:.1} MB, above the {} MB limit",
            size as f64 / MB as f64,
            config.max_document_size_bytes / MB
        )));
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(ExtractionError::Validation(format!(
            "{key} does not start with a PDF header"
        )));
    }
    Ok(())
}

/// Soft quality gate applied after a successful extraction.
pub fn check_quality(extraction: &ExtractionResult, config: &Config) -> Result<(), ExtractionError> {
    let stats = &extraction.confidence_stats;
    if stats.total_blocks == 0 {
        return Err(ExtractionError::Quality("no text was recognized".into()));
    }
    if stats.average_confidence < config.min_confidence_threshold {
        return Err(ExtractionError::Quality(format!(
            "average confidence {:.1} is below {:.1}",
            stats.average_confidence, config.min_confidence_threshold
        )));
    }
    Ok(())
}

/// Why a document run failed, before it is turned into an error record.
enum RunError {
    Step {
        error: ExtractionError,
        attempted_methods: Vec<ExtractionMethod>,
    },
    Exhausted(ExtractionFailure),
}

impl From<ExtractionError> for RunError {
    fn from(error: ExtractionError) -> Self {
        RunError::Step {
            error,
            attempted_methods: Vec::new(),
        }
    }
}

/// Documents grouped by outcome, each group in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// Success and partial results.
    pub succeeded: Vec<ProcessingResult>,
    pub failed: Vec<ProcessingResult>,
}

impl BatchSummary {
    pub fn push(&mut self, result: ProcessingResult) {
        if result.is_failed() {
            self.failed.push(result);
        } else {
            self.succeeded.push(result);
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn partial_count(&self) -> usize {
        self.succeeded
            .iter()
            .filter(|r| r.status() == ProcessingStatus::Partial)
            .count()
    }
}

/// A document submitted to the batch pool.
struct BatchJob {
    key: String,
    index: usize,
    total: usize,
    result_tx: oneshot::Sender<ProcessingResult>,
}

/// Runs documents through validation, extraction, the quality check and
/// persistence. Cheap to clone; clones share the store, engine and config.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn BlobStore>,
    extractor: Arc<Extractor>,
    persister: Persister,
    config: Arc<Config>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn BlobStore>, engine: Arc<dyn OcrEngine>, config: Config) -> Self {
        let config = Arc::new(config);
        Self {
            extractor: Arc::new(Extractor::new(engine, config.clone())),
            persister: Persister::new(store.clone(), config.clone()),
            store,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn persister(&self) -> &Persister {
        &self.persister
    }

    /// Process one document. Never fails: errors become a `Failed` result.
    pub async fn process(&self, key: &str) -> ProcessingResult {
        let started = Instant::now();
        let timestamp = Utc::now();
        tracing::info!(key, store = %self.store.describe(), "processing document");

        let outcome = match self.run(key, started, timestamp).await {
            Ok(outcome) => outcome,
            Err(err) => self.record_failure(key, err, started, timestamp).await,
        };

        let result = ProcessingResult {
            source_key: key.to_string(),
            timestamp,
            elapsed: started.elapsed(),
            outcome,
        };
        match result.message() {
            Some(detail) => tracing::warn!(
                key,
                status = %result.status(),
                elapsed_ms = result.elapsed.as_millis() as u64,
                detail,
                "document finished"
            ),
            None => tracing::info!(
                key,
                status = %result.status(),
                elapsed_ms = result.elapsed.as_millis() as u64,
                "document finished"
            ),
        }
        result
    }

    async fn run(
        &self,
        key: &str,
        started: Instant,
        timestamp: DateTime<Utc>,
    ) -> Result<Outcome, RunError> {
        let bytes = match self.fetch_input(key).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => {
                return Err(ExtractionError::Validation(format!("{key} does not exist")).into());
            }
            Err(e) => return Err(ExtractionError::from(e).into()),
        };
        validate_document(key, &bytes, &self.config)?;

        let document = Document {
            key: key.to_string(),
            bucket: self.store.bucket().map(str::to_string),
            bytes,
        };
        let extraction = self
            .extractor
            .extract_since(&document, started)
            .await
            .map_err(RunError::Exhausted)?;

        let quality = check_quality(&extraction, &self.config).err();
        let warning = quality.as_ref().map(|e| e.to_string());

        let saved = self
            .persister
            .save_result(key, &extraction, warning.as_deref())
            .await
            .map_err(|e| RunError::Step {
                error: e.into(),
                attempted_methods: vec![extraction.extraction_method],
            })?;

        Ok(match quality {
            Some(quality) => {
                let error_key = self
                    .record_quality(key, &quality, &extraction, started, timestamp)
                    .await;
                Outcome::Partial {
                    text_key: saved.text_key,
                    metadata_key: saved.metadata_key,
                    extraction: Box::new(extraction),
                    warning: quality.to_string(),
                    error_key,
                }
            }
            None => Outcome::Success {
                text_key: saved.text_key,
                metadata_key: saved.metadata_key,
                extraction: Box::new(extraction),
            },
        })
    }

    /// Read the input document, repeating transient store failures up to
    /// `retry_attempts` times in total.
    async fn fetch_input(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let tries = self.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.get(key).await {
                Err(e) if e.is_transient() && attempt < tries => {
                    let backoff = backoff_delay(self.config.retry_delay, attempt);
                    tracing::warn!(
                        key,
                        attempt,
                        error = %e,
                        backoff_secs = backoff.as_secs_f64(),
                        "input read failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Error record for a result that was stored but failed the quality check.
    async fn record_quality(
        &self,
        key: &str,
        quality: &ExtractionError,
        extraction: &ExtractionResult,
        started: Instant,
        timestamp: DateTime<Utc>,
    ) -> Option<String> {
        let attempts = extraction
            .metadata
            .get("attempts")
            .and_then(|v| v.as_u64())
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(1);
        let record = ErrorRecord {
            attempted_methods: vec![extraction.extraction_method],
            attempts,
            ..ErrorRecord::from_error(key, quality, started.elapsed(), timestamp)
        };
        match self.persister.save_error(&record).await {
            Ok(error_key) => Some(error_key),
            Err(e) => {
                tracing::error!(key, error = %e, "could not write quality error record");
                None
            }
        }
    }

    async fn record_failure(
        &self,
        key: &str,
        err: RunError,
        started: Instant,
        timestamp: DateTime<Utc>,
    ) -> Outcome {
        let error = match err {
            RunError::Step {
                error,
                attempted_methods,
            } => ErrorRecord {
                attempted_methods,
                ..ErrorRecord::from_error(key, &error, started.elapsed(), timestamp)
            },
            RunError::Exhausted(failure) => {
                ErrorRecord::from_failure(&failure, started.elapsed(), timestamp)
            }
        };

        let error_key = match self.persister.save_error(&error).await {
            Ok(error_key) => Some(error_key),
            Err(e) => {
                tracing::error!(key, error = %e, "could not write error record");
                None
            }
        };
        Outcome::Failed { error_key, error }
    }

    /// Failed result for a document whose task died before producing one.
    async fn aborted(&self, key: &str, reason: &str) -> ProcessingResult {
        let started = Instant::now();
        let timestamp = Utc::now();
        let error = ExtractionError::Service(format!("processing of {key} aborted: {reason}"));
        let outcome = self
            .record_failure(key, error.into(), started, timestamp)
            .await;
        ProcessingResult {
            source_key: key.to_string(),
            timestamp,
            elapsed: started.elapsed(),
            outcome,
        }
    }

    /// Process many documents concurrently. Never fails.
    pub async fn process_batch(&self, keys: Vec<String>) -> BatchSummary {
        self.process_batch_with_progress(keys, |_| {}).await
    }

    /// Like [`process_batch`](Self::process_batch), reporting progress through
    /// `progress` as documents start and finish.
    pub async fn process_batch_with_progress(
        &self,
        keys: Vec<String>,
        progress: impl Fn(ProgressEvent) + Send + Sync + 'static,
    ) -> BatchSummary {
        let total = keys.len();
        let mut summary = BatchSummary::default();
        if total == 0 {
            return summary;
        }

        let progress: Arc<dyn Fn(ProgressEvent) + Send + Sync> = Arc::new(progress);
        let (job_tx, job_rx) = async_channel::unbounded::<BatchJob>();
        let num_workers = self.config.num_workers.clamp(1, total);
        tracing::info!(documents = total, workers = num_workers, "starting batch");

        let mut handles = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            handles.push(tokio::spawn(worker_loop(
                job_rx.clone(),
                self.clone(),
                progress.clone(),
            )));
        }
        // Workers hold the only receivers from here on.
        drop(job_rx);

        let mut receivers = Vec::with_capacity(total);
        for (index, key) in keys.iter().enumerate() {
            let (result_tx, result_rx) = oneshot::channel();
            let job = BatchJob {
                key: key.clone(),
                index,
                total,
                result_tx,
            };
            // A send error drops the job, and with it the result sender.
            let _ = job_tx.send(job).await;
            receivers.push(result_rx);
        }
        // Dropping the sender closes the queue; workers exit once it drains.
        drop(job_tx);

        for (key, result_rx) in keys.into_iter().zip(receivers) {
            let result = match result_rx.await {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(key = %key, "batch worker exited without a result");
                    self.aborted(&key, "worker exited").await
                }
            };
            summary.push(result);
        }

        for handle in handles {
            let _ = handle.await;
        }

        tracing::info!(
            documents = total,
            succeeded = summary.succeeded.len(),
            partial = summary.partial_count(),
            failed = summary.failed.len(),
            "batch complete"
        );
        summary
    }
}

async fn worker_loop(
    job_rx: async_channel::Receiver<BatchJob>,
    coordinator: Coordinator,
    progress: Arc<dyn Fn(ProgressEvent) + Send + Sync>,
) {
    while let Ok(job) = job_rx.recv().await {
        let BatchJob {
            key,
            index,
            total,
            result_tx,
        } = job;

        progress(ProgressEvent::Started {
            index,
            total,
            key: key.clone(),
        });

        // A panic inside `process` stays inside this task.
        let task = {
            let coordinator = coordinator.clone();
            let key = key.clone();
            tokio::spawn(async move { coordinator.process(&key).await })
        };
        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "document task panicked");
                coordinator.aborted(&key, "task panicked").await
            }
        };

        progress(ProgressEvent::Finished {
            index,
            total,
            key,
            status: result.status(),
            elapsed: result.elapsed,
        });
        let _ = result_tx.send(result);
    }
}

/// Per-document summary in reports and CLI JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub status: ProcessingStatus,
    pub original_file: String,
    pub processing_timestamp: DateTime<Utc>,
    pub elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_file_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_file_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_file_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_summary: Option<ExtractionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionSummary {
    pub character_count: usize,
    pub word_count: usize,
    pub page_count: u32,
    pub processing_time: f64,
    pub extraction_method: ExtractionMethod,
    pub average_confidence: f64,
    pub is_high_quality: bool,
}

impl DocumentSummary {
    pub fn new(result: &ProcessingResult, config: &Config) -> Self {
        let mut summary = Self {
            status: result.status(),
            original_file: result.source_key.clone(),
            processing_timestamp: result.timestamp,
            elapsed_seconds: result.elapsed.as_secs_f64(),
            text_file_key: result.text_key().map(str::to_string),
            metadata_file_key: result.metadata_key().map(str::to_string),
            error_file_key: None,
            error_kind: None,
            error_message: None,
            warning: None,
            extraction_summary: result.extraction().map(|e| ExtractionSummary {
                character_count: e.character_count,
                word_count: e.word_count,
                page_count: e.page_count,
                processing_time: e.processing_time.as_secs_f64(),
                extraction_method: e.extraction_method,
                average_confidence: e.confidence_stats.average_confidence,
                is_high_quality: e.is_high_quality(config),
            }),
        };
        match &result.outcome {
            Outcome::Partial {
                warning, error_key, ..
            } => {
                summary.warning = Some(warning.clone());
                summary.error_file_key = error_key.clone();
            }
            Outcome::Failed { error_key, error } => {
                summary.error_file_key = error_key.clone();
                summary.error_kind = Some(error.error_kind.clone());
                summary.error_message = Some(error.error_message.clone());
            }
            Outcome::Success { .. } => {}
        }
        summary
    }
}
