//! Runs a single OCR attempt with a given method.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::engine::{DocumentLocation, JobStatus, OcrEngine};
use crate::error::ExtractionError;
use crate::{Block, BlockType, Config, Document, ExtractionMethod};

/// Blocks and engine metadata from one successful attempt.
#[derive(Debug, Clone, Default)]
pub struct DriverOutput {
    pub blocks: Vec<Block>,
    /// Page count reported by the engine or counted from PAGE blocks.
    pub page_count: Option<u32>,
    pub job_id: Option<String>,
    pub warnings: Vec<String>,
}

/// Drives one engine call (sync) or one job lifecycle (async).
///
/// No retries happen here; the orchestrator owns retry policy.
pub struct OcrDriver {
    engine: Arc<dyn OcrEngine>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl OcrDriver {
    pub fn new(engine: Arc<dyn OcrEngine>, config: &Config) -> Self {
        Self {
            engine,
            poll_interval: config.poll_interval,
            max_wait: config.effective_max_wait(),
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub async fn run(
        &self,
        method: ExtractionMethod,
        document: &Document,
    ) -> Result<DriverOutput, ExtractionError> {
        self.run_within(method, document, self.max_wait).await
    }

    /// Like [`run`](Self::run), with the async wait further capped at `budget`.
    pub async fn run_within(
        &self,
        method: ExtractionMethod,
        document: &Document,
        budget: Duration,
    ) -> Result<DriverOutput, ExtractionError> {
        match method {
            ExtractionMethod::Sync => self.run_sync(document).await,
            ExtractionMethod::Async => self.run_async(document, self.max_wait.min(budget)).await,
        }
    }

    async fn run_sync(&self, document: &Document) -> Result<DriverOutput, ExtractionError> {
        let detection = self.engine.detect_sync(&document.bytes).await?;
        let page_count = detection.pages.or_else(|| count_pages(&detection.blocks));
        Ok(DriverOutput {
            blocks: detection.blocks,
            page_count,
            job_id: None,
            warnings: Vec::new(),
        })
    }

    async fn run_async(
        &self,
        document: &Document,
        max_wait: Duration,
    ) -> Result<DriverOutput, ExtractionError> {
        let location = DocumentLocation {
            bucket: document.bucket.clone(),
            key: document.key.clone(),
        };
        let job_id = self.engine.start_async(&location).await?;
        tracing::debug!(key = %document.key, job_id = %job_id, "async job started");

        let started = Instant::now();
        let first = loop {
            let page = self.engine.poll(&job_id, None).await?;
            match page.status {
                JobStatus::InProgress => {
                    let waited = started.elapsed();
                    if waited >= max_wait {
                        tracing::warn!(
                            key = %document.key,
                            job_id = %job_id,
                            waited_secs = waited.as_secs(),
                            "async job timed out"
                        );
                        return Err(ExtractionError::Timeout { job_id, waited });
                    }
                    let nap = self.poll_interval.min(max_wait - waited);
                    tokio::time::sleep(nap).await;
                }
                JobStatus::Failed => {
                    let reason = page
                        .status_message
                        .unwrap_or_else(|| "no status message".to_string());
                    return Err(ExtractionError::Service(format!(
                        "async job {job_id} failed: {reason}"
                    )));
                }
                JobStatus::Succeeded | JobStatus::PartialSuccess => break page,
            }
        };

        let mut warnings = Vec::new();
        if first.status == JobStatus::PartialSuccess {
            let detail = first.status_message.as_deref().unwrap_or("some pages failed");
            warnings.push(format!("job finished with partial success: {detail}"));
        }

        let reported_pages = first.pages;
        let mut blocks = first.blocks;
        let mut next_token = first.next_token;
        while let Some(token) = next_token {
            let page = self.engine.poll(&job_id, Some(&token)).await?;
            blocks.extend(page.blocks);
            next_token = page.next_token;
        }

        tracing::debug!(
            key = %document.key,
            job_id = %job_id,
            blocks = blocks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "async job collected"
        );

        let page_count = reported_pages.or_else(|| count_pages(&blocks));
        Ok(DriverOutput {
            blocks,
            page_count,
            job_id: Some(job_id),
            warnings,
        })
    }
}

fn count_pages(blocks: &[Block]) -> Option<u32> {
    let pages = blocks
        .iter()
        .filter(|b| b.block_type == BlockType::Page)
        .count();
    (pages > 0).then(|| u32::try_from(pages).unwrap_or(u32::MAX))
}

/// Join LINE texts in order, one line per row. Falls back to WORD texts
/// separated by spaces when the engine returned no lines.
pub fn blocks_to_text(blocks: &[Block]) -> String {
    let lines: Vec<&str> = blocks
        .iter()
        .filter(|b| b.block_type == BlockType::Line)
        .filter_map(|b| b.text.as_deref())
        .collect();
    if !lines.is_empty() {
        return lines.join("\n");
    }
    blocks
        .iter()
        .filter(|b| b.block_type == BlockType::Word)
        .filter_map(|b| b.text.as_deref())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{MockEngine, MockJob, MockResponse, page_of_lines};

    fn document() -> Document {
        Document {
            key: "input-articles/report.pdf".into(),
            bucket: Some("docs".into()),
            bytes: b"%PDF-1.4 test".to_vec(),
        }
    }

    fn driver(engine: Arc<MockEngine>, config: &Config) -> OcrDriver {
        OcrDriver::new(engine, config)
    }

    #[test]
    fn text_joins_lines() {
        let blocks = page_of_lines(1, &[("First line", 99.0), ("Second line", 98.0)]);
        assert_eq!(blocks_to_text(&blocks), "First line\nSecond line");
    }

    #[test]
    fn text_falls_back_to_words() {
        let blocks = vec![Block::word("only", 90.0), Block::word("words", 90.0)];
        assert_eq!(blocks_to_text(&blocks), "only words");
        assert_eq!(blocks_to_text(&[]), "");
    }

    #[tokio::test]
    async fn sync_counts_page_blocks() {
        let mut blocks = page_of_lines(1, &[("a", 99.0)]);
        blocks.extend(page_of_lines(2, &[("b", 99.0)]));
        let engine = Arc::new(MockEngine::new().with_sync(MockResponse::Blocks(blocks)));
        let out = driver(engine.clone(), &Config::default())
            .run(ExtractionMethod::Sync, &document())
            .await
            .unwrap();
        assert_eq!(out.page_count, Some(2));
        assert!(out.job_id.is_none());
        assert_eq!(engine.sync_calls(), 1);
    }

    #[tokio::test]
    async fn sync_unsupported_maps_to_unsupported() {
        let engine = Arc::new(
            MockEngine::new().with_sync(MockResponse::Unsupported("bad format".into())),
        );
        let err = driver(engine, &Config::default())
            .run(ExtractionMethod::Sync, &document())
            .await
            .unwrap_err();
        assert_eq!(err, ExtractionError::Unsupported("bad format".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn async_polls_until_done_and_follows_pages() {
        let engine = Arc::new(
            MockEngine::new()
                .with_job(MockJob::Completes {
                    pending_polls: 3,
                    pages: vec![
                        page_of_lines(1, &[("page one", 95.0)]),
                        page_of_lines(2, &[("page two", 95.0)]),
                    ],
                })
                .with_reported_pages(2),
        );
        let config = Config::default();
        let start = Instant::now();
        let out = driver(engine.clone(), &config)
            .run(ExtractionMethod::Async, &document())
            .await
            .unwrap();

        assert_eq!(blocks_to_text(&out.blocks), "page one\npage two");
        assert_eq!(out.page_count, Some(2));
        assert_eq!(out.job_id.as_deref(), Some("mock-job-1"));
        // three in-progress polls, one finished poll, one continuation
        assert_eq!(engine.poll_calls(), 5);
        assert_eq!(start.elapsed(), config.poll_interval * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn async_times_out_at_max_wait() {
        let engine = Arc::new(MockEngine::new().with_job(MockJob::Stalls));
        let config = Config {
            max_wait: Duration::from_secs(12),
            poll_interval: Duration::from_secs(5),
            ..Config::default()
        };
        let start = Instant::now();
        let err = driver(engine.clone(), &config)
            .run(ExtractionMethod::Async, &document())
            .await
            .unwrap_err();

        match err {
            ExtractionError::Timeout { job_id, waited } => {
                assert_eq!(job_id, "mock-job-1");
                assert_eq!(waited, Duration::from_secs(12));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        // polls at 0s, 5s, 10s and a final one at the 12s deadline
        assert_eq!(engine.poll_calls(), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn execution_limit_shortens_wait() {
        let engine = Arc::new(MockEngine::new().with_job(MockJob::Stalls));
        let config = Config {
            max_wait: Duration::from_secs(300),
            execution_limit: Some(Duration::from_secs(90)),
            ..Config::default()
        };
        let err = driver(engine, &config)
            .run(ExtractionMethod::Async, &document())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ExtractionError::Timeout { waited, .. } if waited == Duration::from_secs(30))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn budget_caps_async_wait() {
        let engine = Arc::new(MockEngine::new().with_job(MockJob::Stalls));
        let start = Instant::now();
        let err = driver(engine, &Config::default())
            .run_within(ExtractionMethod::Async, &document(), Duration::from_secs(42))
            .await
            .unwrap_err();
        assert!(
            matches!(err, ExtractionError::Timeout { waited, .. } if waited == Duration::from_secs(42))
        );
        assert_eq!(start.elapsed(), Duration::from_secs(42));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_is_service_error() {
        let engine = Arc::new(MockEngine::new().with_job(MockJob::Fails("corrupt page".into())));
        let err = driver(engine, &Config::default())
            .run(ExtractionMethod::Async, &document())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExtractionError::Service("async job mock-job-1 failed: corrupt page".into())
        );
    }
}
