//! Method selection, retries and fallback around the OCR driver.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::time::Instant;

use crate::confidence::ConfidenceStats;
use crate::driver::{DriverOutput, OcrDriver, blocks_to_text};
use crate::engine::OcrEngine;
use crate::error::{ExtractionError, ExtractionFailure};
use crate::selector::{select_method, sniff_page_count};
use crate::{Config, Document, ExtractionMethod, ExtractionResult, PERSISTENCE_MARGIN};

/// Backoff before retry number `attempt` (1-based count of failures so far):
/// `base * 2^(attempt - 1)`, capped at 64x.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    base.saturating_mul(2u32.pow(exponent))
}

/// Turns a document into an [`ExtractionResult`], or an [`ExtractionFailure`]
/// once every allowed attempt is used up.
///
/// The selected method gets up to `retry_attempts` attempts with exponential
/// backoff between them. If it still fails with a retryable error, the other
/// method gets exactly one attempt.
///
/// With an `execution_limit` configured, all attempts share one deadline,
/// [`PERSISTENCE_MARGIN`] before the limit. A retry or fallback that would
/// start at or past the deadline is skipped, and a running attempt is cut
/// off when the deadline arrives.
pub struct Extractor {
    driver: OcrDriver,
    config: Arc<Config>,
}

impl Extractor {
    pub fn new(engine: Arc<dyn OcrEngine>, config: Arc<Config>) -> Self {
        Self {
            driver: OcrDriver::new(engine, &config),
            config,
        }
    }

    pub async fn extract(&self, document: &Document) -> Result<ExtractionResult, ExtractionFailure> {
        self.extract_since(document, Instant::now()).await
    }

    /// Like [`extract`](Self::extract), with the execution deadline measured
    /// from `invoked` instead of now.
    pub async fn extract_since(
        &self,
        document: &Document,
        invoked: Instant,
    ) -> Result<ExtractionResult, ExtractionFailure> {
        let started = Instant::now();
        let sniffed_pages = sniff_page_count(&document.bytes);
        let primary = select_method(document.size(), sniffed_pages, &self.config);
        tracing::info!(
            key = %document.key,
            method = %primary,
            size = document.size(),
            pages = ?sniffed_pages,
            "extracting"
        );

        let deadline = self
            .config
            .execution_limit
            .map(|limit| invoked + limit.saturating_sub(PERSISTENCE_MARGIN));

        let mut attempts = 0u32;
        let mut attempted_methods = vec![primary];
        let mut last_error = match self
            .run_with_retries(primary, document, deadline, &mut attempts)
            .await
        {
            Ok(output) => {
                return Ok(self.assemble(
                    document, primary, output, attempts, false, sniffed_pages, started,
                ));
            }
            Err(e) => e,
        };

        if last_error.is_retryable() && self.config.fallback_enabled {
            let fallback = primary.other();
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(
                    key = %document.key,
                    error = %last_error,
                    "execution deadline reached, skipping fallback"
                );
            } else {
                tracing::warn!(
                    key = %document.key,
                    from = %primary,
                    to = %fallback,
                    error = %last_error,
                    "falling back to other extraction method"
                );
                attempted_methods.push(fallback);
                attempts += 1;
                match self.attempt(fallback, document, deadline).await {
                    Ok(output) => {
                        return Ok(self.assemble(
                            document, fallback, output, attempts, true, sniffed_pages, started,
                        ));
                    }
                    Err(e) => last_error = e,
                }
            }
        }

        tracing::error!(
            key = %document.key,
            attempts,
            error = %last_error,
            "extraction failed"
        );
        Err(ExtractionFailure {
            document_key: document.key.clone(),
            attempted_methods,
            attempts,
            last_error,
            elapsed: started.elapsed(),
        })
    }

    /// One driver call, bounded by `deadline` when there is one.
    async fn attempt(
        &self,
        method: ExtractionMethod,
        document: &Document,
        deadline: Option<Instant>,
    ) -> Result<DriverOutput, ExtractionError> {
        let Some(deadline) = deadline else {
            return self.driver.run(method, document).await;
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        let call = self.driver.run_within(method, document, remaining);
        match tokio::time::timeout(remaining, call).await {
            Ok(result) => result,
            Err(_) => Err(ExtractionError::Service(format!(
                "{method} attempt cut off at the execution deadline after {}s",
                remaining.as_secs()
            ))),
        }
    }

    async fn run_with_retries(
        &self,
        method: ExtractionMethod,
        document: &Document,
        deadline: Option<Instant>,
        attempts: &mut u32,
    ) -> Result<DriverOutput, ExtractionError> {
        let max_attempts = self.config.retry_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            *attempts += 1;
            match self.attempt(method, document, deadline).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = backoff_delay(self.config.retry_delay, attempt);
                    if deadline.is_some_and(|d| Instant::now() + backoff >= d) {
                        tracing::warn!(
                            key = %document.key,
                            method = %method,
                            attempt,
                            error = %e,
                            "execution deadline reached, no further retries"
                        );
                        return Err(e);
                    }
                    tracing::warn!(
                        key = %document.key,
                        method = %method,
                        attempt,
                        max_attempts,
                        error = %e,
                        backoff_secs = backoff.as_secs_f64(),
                        "extraction attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        document: &Document,
        method: ExtractionMethod,
        output: DriverOutput,
        attempts: u32,
        fallback_used: bool,
        sniffed_pages: Option<u32>,
        started: Instant,
    ) -> ExtractionResult {
        let text = blocks_to_text(&output.blocks);
        let stats = ConfidenceStats::from_blocks(&output.blocks, self.config.min_confidence_threshold);
        let page_count = output.page_count.or(sniffed_pages).unwrap_or(1).max(1);

        let mut metadata = BTreeMap::new();
        metadata.insert("engine".to_string(), json!(self.driver.engine_name()));
        metadata.insert("attempts".to_string(), json!(attempts));
        metadata.insert("fallback_used".to_string(), json!(fallback_used));
        metadata.insert("file_size_bytes".to_string(), json!(document.size()));
        metadata.insert("source_key".to_string(), json!(document.key));
        if let Some(job_id) = &output.job_id {
            metadata.insert("job_id".to_string(), json!(job_id));
        }
        if !output.warnings.is_empty() {
            metadata.insert("warnings".to_string(), json!(output.warnings));
        }

        let result = ExtractionResult::new(
            text,
            stats,
            method,
            started.elapsed(),
            page_count,
            metadata,
            Utc::now(),
        );
        tracing::info!(
            key = %document.key,
            method = %method,
            pages = result.page_count,
            words = result.word_count,
            avg_confidence = result.confidence_stats.average_confidence,
            "extraction complete"
        );
        result
    }
}
