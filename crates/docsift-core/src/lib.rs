//! OCR text extraction for PDF documents held in an object store.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod confidence;
pub mod config_file;
pub mod coordinator;
pub mod driver;
pub mod engine;
pub mod env;
pub mod error;
pub mod event;
pub mod keys;
pub mod orchestrator;
pub mod persist;
pub mod selector;
pub mod store;

// Re-export for convenience
pub use confidence::ConfidenceStats;
pub use coordinator::{BatchSummary, Coordinator, DocumentSummary};
pub use engine::{EngineError, OcrEngine};
pub use error::{ErrorRecord, ExtractionError, ExtractionFailure};
pub use event::{EventError, EventReport, parse_event, should_process};
pub use orchestrator::Extractor;
pub use persist::Persister;
pub use store::{BlobStore, ObjectInfo, StoreError};

/// Boxed future returned by the engine and store traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const MB: u64 = 1024 * 1024;

/// Time reserved at the end of an outer execution limit for writing the error record.
pub const PERSISTENCE_MARGIN: Duration = Duration::from_secs(60);

/// OCR invocation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionMethod {
    #[serde(rename = "synchronous")]
    Sync,
    #[serde(rename = "asynchronous")]
    Async,
}

impl ExtractionMethod {
    /// The method used when falling back from `self`.
    pub fn other(self) -> Self {
        match self {
            ExtractionMethod::Sync => ExtractionMethod::Async,
            ExtractionMethod::Async => ExtractionMethod::Sync,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionMethod::Sync => "synchronous",
            ExtractionMethod::Async => "asynchronous",
        }
    }
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of recognized content unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockType {
    Page,
    Line,
    Word,
    #[serde(other)]
    Other,
}

/// A unit of recognized content returned by the OCR engine.
///
/// Field names follow the engine's wire format (`BlockType`, `Text`, ...);
/// unknown fields such as geometry are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Block {
    pub block_type: BlockType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl Block {
    pub fn page(number: u32) -> Self {
        Self {
            block_type: BlockType::Page,
            text: None,
            confidence: None,
            page: Some(number),
        }
    }

    pub fn line(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            block_type: BlockType::Line,
            text: Some(text.into()),
            confidence: Some(confidence),
            page: None,
        }
    }

    pub fn word(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            block_type: BlockType::Word,
            text: Some(text.into()),
            confidence: Some(confidence),
            page: None,
        }
    }
}

/// A document handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct Document {
    pub key: String,
    /// Bucket holding `key`, when the store is bucket-backed (needed for async jobs).
    pub bucket: Option<String>,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Result of extracting text from one document. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub text_content: String,
    pub confidence_stats: ConfidenceStats,
    pub extraction_method: ExtractionMethod,
    #[serde(with = "serde_secs")]
    pub processing_time: Duration,
    pub page_count: u32,
    pub character_count: usize,
    pub word_count: usize,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub extraction_timestamp: DateTime<Utc>,
}

impl ExtractionResult {
    /// Build a result, deriving character and word counts from the text.
    pub fn new(
        text_content: String,
        confidence_stats: ConfidenceStats,
        extraction_method: ExtractionMethod,
        processing_time: Duration,
        page_count: u32,
        metadata: BTreeMap<String, serde_json::Value>,
        extraction_timestamp: DateTime<Utc>,
    ) -> Self {
        let character_count = text_content.chars().count();
        let word_count = text_content.split_whitespace().count();
        Self {
            text_content,
            confidence_stats,
            extraction_method,
            processing_time,
            page_count,
            character_count,
            word_count,
            metadata,
            extraction_timestamp,
        }
    }

    /// High quality: average at or above `min_average_confidence` and a
    /// low-confidence ratio under `max_low_confidence_ratio`.
    pub fn is_high_quality(&self, config: &Config) -> bool {
        self.confidence_stats.average_confidence >= config.min_average_confidence
            && self.confidence_stats.low_confidence_ratio() < config.max_low_confidence_ratio
    }
}

/// Terminal status of one document run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Success,
    Partial,
    Failed,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProcessingStatus::Success => "success",
            ProcessingStatus::Partial => "partial",
            ProcessingStatus::Failed => "failed",
        })
    }
}

/// How a document run ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success {
        text_key: String,
        metadata_key: String,
        extraction: Box<ExtractionResult>,
    },
    /// Extracted and stored, but flagged by the quality check.
    Partial {
        text_key: String,
        metadata_key: String,
        extraction: Box<ExtractionResult>,
        warning: String,
        /// Quality error record; `None` when it could not be written.
        error_key: Option<String>,
    },
    Failed {
        /// `None` when even the error record could not be written.
        error_key: Option<String>,
        error: ErrorRecord,
    },
}

/// The terminal record of one document's run.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub source_key: String,
    pub timestamp: DateTime<Utc>,
    pub elapsed: Duration,
    pub outcome: Outcome,
}

impl ProcessingResult {
    pub fn status(&self) -> ProcessingStatus {
        match self.outcome {
            Outcome::Success { .. } => ProcessingStatus::Success,
            Outcome::Partial { .. } => ProcessingStatus::Partial,
            Outcome::Failed { .. } => ProcessingStatus::Failed,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }

    pub fn text_key(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { text_key, .. } | Outcome::Partial { text_key, .. } => {
                Some(text_key)
            }
            Outcome::Failed { .. } => None,
        }
    }

    pub fn metadata_key(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { metadata_key, .. } | Outcome::Partial { metadata_key, .. } => {
                Some(metadata_key)
            }
            Outcome::Failed { .. } => None,
        }
    }

    pub fn extraction(&self) -> Option<&ExtractionResult> {
        match &self.outcome {
            Outcome::Success { extraction, .. } | Outcome::Partial { extraction, .. } => {
                Some(extraction)
            }
            Outcome::Failed { .. } => None,
        }
    }

    /// Error message for failed runs, quality warning for partial ones.
    pub fn message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Partial { warning, .. } => Some(warning),
            Outcome::Failed { error, .. } => Some(&error.error_message),
        }
    }
}

/// Progress events emitted during batch processing.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        index: usize,
        total: usize,
        key: String,
    },
    Finished {
        index: usize,
        total: usize,
        key: String,
        status: ProcessingStatus,
        elapsed: Duration,
    },
}

/// Storage key prefixes for inputs and the three output families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefixes {
    pub input: String,
    pub output_text: String,
    pub output_metadata: String,
    pub errors: String,
}

impl Default for Prefixes {
    fn default() -> Self {
        Self {
            input: "input-articles/".into(),
            output_text: "extracted-texts/".into(),
            output_metadata: "extraction-metadata/".into(),
            errors: "processing-errors/".into(),
        }
    }
}

/// Process-wide processing configuration.
///
/// Built once at startup (defaults, then config file, then environment, then
/// CLI flags) and passed explicitly into each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub bucket: Option<String>,
    pub region: String,
    /// S3-compatible endpoint; the regional AWS endpoint is used when unset.
    pub s3_endpoint: Option<String>,
    pub textract_endpoint: Option<String>,
    /// Documents at or above this size go to the async path.
    pub sync_size_limit_bytes: u64,
    pub max_document_size_bytes: u64,
    /// Page count above which the async path is required.
    pub max_sync_pages: u32,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    /// Hard wall-clock limit imposed by the surrounding execution environment.
    pub execution_limit: Option<Duration>,
    pub min_confidence_threshold: f64,
    pub min_average_confidence: f64,
    pub max_low_confidence_ratio: f64,
    /// Attempts given to the selected method before falling back.
    pub retry_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub retry_delay: Duration,
    pub fallback_enabled: bool,
    pub prefixes: Prefixes,
    pub num_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket: None,
            region: "us-east-1".into(),
            s3_endpoint: None,
            textract_endpoint: None,
            sync_size_limit_bytes: 5 * MB,
            max_document_size_bytes: 500 * MB,
            max_sync_pages: 1,
            max_wait: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            execution_limit: None,
            min_confidence_threshold: 80.0,
            min_average_confidence: 85.0,
            max_low_confidence_ratio: 0.1,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(5),
            fallback_enabled: true,
            prefixes: Prefixes::default(),
            num_workers: 4,
        }
    }
}

impl Config {
    /// The async poll ceiling: `max_wait`, shortened so that it ends at least
    /// [`PERSISTENCE_MARGIN`] before the outer execution limit.
    pub fn effective_max_wait(&self) -> Duration {
        match self.execution_limit {
            Some(limit) => self
                .max_wait
                .min(limit.saturating_sub(PERSISTENCE_MARGIN)),
            None => self.max_wait,
        }
    }

    /// Textract endpoint, defaulting to the regional AWS endpoint.
    pub fn textract_endpoint(&self) -> String {
        self.textract_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://textract.{}.amazonaws.com", self.region))
    }
}

/// Serialize a [`Duration`] as fractional seconds.
pub(crate) mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs.max(0.0)).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_other_flips() {
        assert_eq!(ExtractionMethod::Sync.other(), ExtractionMethod::Async);
        assert_eq!(ExtractionMethod::Async.other(), ExtractionMethod::Sync);
    }

    #[test]
    fn method_serializes_long_names() {
        assert_eq!(
            serde_json::to_string(&ExtractionMethod::Async).unwrap(),
            "\"asynchronous\""
        );
    }

    #[test]
    fn block_parses_engine_json() {
        let json = r#"{"BlockType":"LINE","Id":"abc","Text":"Hello","Confidence":99.5,"Page":2,
                       "Geometry":{"BoundingBox":{"Width":0.5}}}"#;
        let block: Block = serde_json::from_str(json).unwrap();
        assert_eq!(block.block_type, BlockType::Line);
        assert_eq!(block.text.as_deref(), Some("Hello"));
        assert_eq!(block.confidence, Some(99.5));
        assert_eq!(block.page, Some(2));
    }

    #[test]
    fn unknown_block_type_is_other() {
        let block: Block = serde_json::from_str(r#"{"BlockType":"KEY_VALUE_SET"}"#).unwrap();
        assert_eq!(block.block_type, BlockType::Other);
    }

    #[test]
    fn counts_derived_from_text() {
        let result = ExtractionResult::new(
            "héllo wörld\nsecond line".into(),
            ConfidenceStats::default(),
            ExtractionMethod::Sync,
            Duration::from_millis(1500),
            1,
            BTreeMap::new(),
            Utc::now(),
        );
        assert_eq!(result.character_count, 23);
        assert_eq!(result.word_count, 4);
    }

    #[test]
    fn processing_time_serializes_as_seconds() {
        let result = ExtractionResult::new(
            String::new(),
            ConfidenceStats::default(),
            ExtractionMethod::Sync,
            Duration::from_millis(1500),
            1,
            BTreeMap::new(),
            Utc::now(),
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["processing_time"], 1.5);
        assert_eq!(value["extraction_method"], "synchronous");
    }

    #[test]
    fn effective_max_wait_respects_execution_limit() {
        let mut config = Config {
            max_wait: Duration::from_secs(600),
            ..Config::default()
        };
        assert_eq!(config.effective_max_wait(), Duration::from_secs(600));

        config.execution_limit = Some(Duration::from_secs(900));
        assert_eq!(config.effective_max_wait(), Duration::from_secs(600));

        config.execution_limit = Some(Duration::from_secs(300));
        assert_eq!(config.effective_max_wait(), Duration::from_secs(240));
    }

    #[test]
    fn default_textract_endpoint_is_regional() {
        let config = Config {
            region: "eu-central-1".into(),
            ..Config::default()
        };
        assert_eq!(
            config.textract_endpoint(),
            "https://textract.eu-central-1.amazonaws.com"
        );
    }
}
