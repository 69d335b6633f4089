//! OCR engine trait and implementations.

pub mod mock;
pub mod textract;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Block, BoxFuture};

pub use textract::TextractEngine;

/// Engine-level failure, before classification into the extraction taxonomy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The engine rejected the document itself (bad format, too large, ...).
    #[error("{0}")]
    Unsupported(String),
    /// Throttling, 5xx, network faults and other failures worth retrying.
    #[error("{0}")]
    Transient(String),
}

/// Status of an asynchronous recognition job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InProgress,
    Succeeded,
    PartialSuccess,
    Failed,
}

/// Where an async job reads its input from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLocation {
    pub bucket: Option<String>,
    pub key: String,
}

/// Output of a synchronous detection call.
#[derive(Debug, Clone, Default)]
pub struct SyncDetection {
    pub blocks: Vec<Block>,
    /// Page count reported by the engine, if any.
    pub pages: Option<u32>,
}

/// One page of async job results.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub status: JobStatus,
    pub blocks: Vec<Block>,
    /// Token for the next page of blocks; `None` on the last page.
    pub next_token: Option<String>,
    pub status_message: Option<String>,
    pub pages: Option<u32>,
}

impl JobPage {
    pub fn in_progress() -> Self {
        Self {
            status: JobStatus::InProgress,
            blocks: Vec::new(),
            next_token: None,
            status_message: None,
            pages: None,
        }
    }
}

/// An OCR service able to recognize text synchronously (bytes in, blocks
/// out) or asynchronously (start a job, then poll it).
pub trait OcrEngine: Send + Sync {
    /// Engine name recorded in extraction metadata.
    fn name(&self) -> &str;

    /// Recognize a small document in a single call.
    fn detect_sync<'a>(&'a self, document: &'a [u8])
    -> BoxFuture<'a, Result<SyncDetection, EngineError>>;

    /// Start an async recognition job and return its id.
    fn start_async<'a>(
        &'a self,
        location: &'a DocumentLocation,
    ) -> BoxFuture<'a, Result<String, EngineError>>;

    /// Fetch job status and, once finished, one page of results.
    fn poll<'a>(
        &'a self,
        job_id: &'a str,
        next_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<JobPage, EngineError>>;
}
