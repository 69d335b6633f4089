//! Mock OCR engine for testing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{DocumentLocation, EngineError, JobPage, JobStatus, OcrEngine, SyncDetection};
use crate::{Block, BoxFuture};

/// A scripted outcome for a synchronous call.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Recognition succeeds with these blocks.
    Blocks(Vec<Block>),
    /// The engine rejects the document.
    Unsupported(String),
    /// A retryable service fault.
    Transient(String),
}

/// A scripted async job, consumed by one `start_async` call.
#[derive(Clone, Debug)]
pub enum MockJob {
    /// Reports IN_PROGRESS for `pending_polls` status polls, then succeeds.
    /// Each entry of `pages` is served as one page of results.
    Completes {
        pending_polls: usize,
        pages: Vec<Vec<Block>>,
    },
    /// The job ends with status FAILED.
    Fails(String),
    /// The job never leaves IN_PROGRESS.
    Stalls,
    /// `start_async` itself fails.
    Rejected(MockResponse),
}

struct RunningJob {
    script: MockJob,
    polls: usize,
}

/// A hand-rolled mock implementing [`OcrEngine`] for tests.
///
/// Sync responses and async jobs are each served from a sequence (one per
/// call, repeating the last when exhausted). Calls are counted so tests can
/// assert on retry and fallback behavior.
pub struct MockEngine {
    sync_responses: Mutex<Vec<MockResponse>>,
    sync_fallback: MockResponse,
    jobs: Mutex<Vec<MockJob>>,
    job_fallback: MockJob,
    running: Mutex<HashMap<String, RunningJob>>,
    reported_pages: Option<u32>,
    delay: Option<Duration>,
    sync_calls: AtomicUsize,
    start_calls: AtomicUsize,
    poll_calls: AtomicUsize,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// A mock whose sync calls and jobs succeed with no blocks.
    pub fn new() -> Self {
        Self {
            sync_responses: Mutex::new(Vec::new()),
            sync_fallback: MockResponse::Blocks(Vec::new()),
            jobs: Mutex::new(Vec::new()),
            job_fallback: MockJob::Completes {
                pending_polls: 0,
                pages: vec![Vec::new()],
            },
            running: Mutex::new(HashMap::new()),
            reported_pages: None,
            delay: None,
            sync_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        }
    }

    /// Every sync call returns `response`.
    pub fn with_sync(mut self, response: MockResponse) -> Self {
        self.sync_fallback = response;
        self
    }

    /// Sync calls return `responses` in order, repeating the last one.
    pub fn with_sync_sequence(mut self, mut responses: Vec<MockResponse>) -> Self {
        assert!(!responses.is_empty(), "sequence must have at least one response");
        // Reverse so we can pop() from the front cheaply.
        responses.reverse();
        self.sync_fallback = responses[0].clone();
        self.sync_responses = Mutex::new(responses);
        self
    }

    /// Every started job follows `job`.
    pub fn with_job(mut self, job: MockJob) -> Self {
        self.job_fallback = job;
        self
    }

    /// Started jobs follow `jobs` in order, repeating the last one.
    pub fn with_job_sequence(mut self, mut jobs: Vec<MockJob>) -> Self {
        assert!(!jobs.is_empty(), "sequence must have at least one job");
        jobs.reverse();
        self.job_fallback = jobs[0].clone();
        self.jobs = Mutex::new(jobs);
        self
    }

    /// Page count reported alongside results.
    pub fn with_reported_pages(mut self, pages: u32) -> Self {
        self.reported_pages = Some(pages);
        self
    }

    /// Simulated latency per sync call and per job start.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    /// Extraction attempts seen: sync calls plus job starts.
    pub fn attempts(&self) -> usize {
        self.sync_calls() + self.start_calls()
    }

    fn next_sync(&self) -> MockResponse {
        self.sync_responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| self.sync_fallback.clone())
    }

    fn next_job(&self) -> MockJob {
        self.jobs
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| self.job_fallback.clone())
    }

    fn poll_job(&self, job_id: &str, next_token: Option<&str>) -> Result<JobPage, EngineError> {
        let mut running = self.running.lock().unwrap();
        let Some(job) = running.get_mut(job_id) else {
            return Err(EngineError::Unsupported(format!("unknown job {job_id}")));
        };

        match &job.script {
            MockJob::Completes {
                pending_polls,
                pages,
            } => {
                let index = match next_token {
                    Some(token) => token
                        .parse::<usize>()
                        .map_err(|_| EngineError::Transient(format!("bad token {token}")))?,
                    None if job.polls < *pending_polls => {
                        job.polls += 1;
                        return Ok(JobPage::in_progress());
                    }
                    None => 0,
                };
                let blocks = pages.get(index).cloned().unwrap_or_default();
                let next_token = (index + 1 < pages.len()).then(|| (index + 1).to_string());
                Ok(JobPage {
                    status: JobStatus::Succeeded,
                    blocks,
                    next_token,
                    status_message: None,
                    pages: self.reported_pages,
                })
            }
            MockJob::Fails(msg) => Ok(JobPage {
                status: JobStatus::Failed,
                status_message: Some(msg.clone()),
                ..JobPage::in_progress()
            }),
            MockJob::Stalls => Ok(JobPage::in_progress()),
            MockJob::Rejected(_) => Err(EngineError::Unsupported(format!(
                "job {job_id} was never started"
            ))),
        }
    }
}

fn response_to_result(response: MockResponse) -> Result<Vec<Block>, EngineError> {
    match response {
        MockResponse::Blocks(blocks) => Ok(blocks),
        MockResponse::Unsupported(msg) => Err(EngineError::Unsupported(msg)),
        MockResponse::Transient(msg) => Err(EngineError::Transient(msg)),
    }
}

impl OcrEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn detect_sync<'a>(
        &'a self,
        _document: &'a [u8],
    ) -> BoxFuture<'a, Result<SyncDetection, EngineError>> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.next_sync();
        let delay = self.delay;
        let pages = self.reported_pages;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            let blocks = response_to_result(response)?;
            Ok(SyncDetection { blocks, pages })
        })
    }

    fn start_async<'a>(
        &'a self,
        _location: &'a DocumentLocation,
    ) -> BoxFuture<'a, Result<String, EngineError>> {
        let n = self.start_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let script = self.next_job();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            if let MockJob::Rejected(response) = script {
                response_to_result(response)?;
                return Err(EngineError::Transient("job start rejected".into()));
            }
            let job_id = format!("mock-job-{n}");
            self.running
                .lock()
                .unwrap()
                .insert(job_id.clone(), RunningJob { script, polls: 0 });
            Ok(job_id)
        })
    }

    fn poll<'a>(
        &'a self,
        job_id: &'a str,
        next_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<JobPage, EngineError>> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.poll_job(job_id, next_token);
        Box::pin(async move { result })
    }
}

/// Blocks for a one-page document: a PAGE block, then a LINE per entry
/// followed by its WORD blocks, all at the line's confidence.
pub fn page_of_lines(page: u32, lines: &[(&str, f64)]) -> Vec<Block> {
    let mut blocks = vec![Block::page(page)];
    for &(text, confidence) in lines {
        let mut line = Block::line(text, confidence);
        line.page = Some(page);
        blocks.push(line);
        for word in text.split_whitespace() {
            let mut word = Block::word(word, confidence);
            word.page = Some(page);
            blocks.push(word);
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> DocumentLocation {
        DocumentLocation {
            bucket: Some("docs".into()),
            key: "input-articles/a.pdf".into(),
        }
    }

    #[tokio::test]
    async fn sync_sequence_repeats_last() {
        let engine = MockEngine::new().with_sync_sequence(vec![
            MockResponse::Transient("503".into()),
            MockResponse::Blocks(vec![Block::line("ok", 99.0)]),
        ]);
        assert!(engine.detect_sync(b"x").await.is_err());
        assert_eq!(engine.detect_sync(b"x").await.unwrap().blocks.len(), 1);
        assert_eq!(engine.detect_sync(b"x").await.unwrap().blocks.len(), 1);
        assert_eq!(engine.sync_calls(), 3);
    }

    #[tokio::test]
    async fn job_completes_after_pending_polls_with_pages() {
        let engine = MockEngine::new().with_job(MockJob::Completes {
            pending_polls: 2,
            pages: vec![vec![Block::line("one", 90.0)], vec![Block::line("two", 90.0)]],
        });
        let job = engine.start_async(&location()).await.unwrap();

        assert_eq!(engine.poll(&job, None).await.unwrap().status, JobStatus::InProgress);
        assert_eq!(engine.poll(&job, None).await.unwrap().status, JobStatus::InProgress);

        let first = engine.poll(&job, None).await.unwrap();
        assert_eq!(first.status, JobStatus::Succeeded);
        assert_eq!(first.next_token.as_deref(), Some("1"));

        let second = engine.poll(&job, first.next_token.as_deref()).await.unwrap();
        assert_eq!(second.blocks[0].text.as_deref(), Some("two"));
        assert!(second.next_token.is_none());
        assert_eq!(engine.poll_calls(), 4);
    }

    #[tokio::test]
    async fn rejected_job_fails_to_start() {
        let engine =
            MockEngine::new().with_job(MockJob::Rejected(MockResponse::Unsupported("bad".into())));
        let err = engine.start_async(&location()).await.unwrap_err();
        assert_eq!(err, EngineError::Unsupported("bad".into()));
        assert_eq!(engine.start_calls(), 1);
    }

    #[test]
    fn page_of_lines_emits_words() {
        let blocks = page_of_lines(1, &[("Hello world", 95.0)]);
        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|b| b.page == Some(1)));
    }
}
