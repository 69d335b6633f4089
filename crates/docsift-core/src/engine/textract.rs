//! AWS Textract text detection over the JSON 1.1 protocol.
//!
//! Requests are unsigned: point `endpoint` at a Textract-compatible service
//! or a signing proxy.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{DocumentLocation, EngineError, JobPage, JobStatus, OcrEngine, SyncDetection};
use crate::{Block, BoxFuture};

const TARGET_PREFIX: &str = "Textract";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
/// Must stay below [`PERSISTENCE_MARGIN`](crate::PERSISTENCE_MARGIN).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);
const MAX_RESULTS: u32 = 1000;

/// Service exceptions that mean the document itself is unacceptable.
const UNSUPPORTED_EXCEPTIONS: &[&str] = &[
    "UnsupportedDocumentException",
    "BadDocumentException",
    "DocumentTooLargeException",
    "InvalidParameterException",
    "InvalidS3ObjectException",
];

pub struct TextractEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl TextractEngine {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        body: serde_json::Value,
    ) -> Result<T, EngineError> {
        let payload = serde_json::to_vec(&body)
            .map_err(|e| EngineError::Transient(format!("encoding {operation} request: {e}")))?;

        let resp = self
            .client
            .post(format!("{}/", self.endpoint))
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .timeout(REQUEST_TIMEOUT)
            .body(payload)
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("{operation}: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| EngineError::Transient(format!("{operation}: {e}")))?;

        if !status.is_success() {
            tracing::debug!(operation, status = status.as_u16(), body = %text, "textract error response");
            return Err(classify_error(status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(|e| {
            EngineError::Transient(format!("malformed {operation} response: {e}"))
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DocumentMetadata {
    pages: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DetectResponse {
    #[serde(default)]
    document_metadata: Option<DocumentMetadata>,
    #[serde(default)]
    blocks: Vec<Block>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartResponse {
    job_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetResponse {
    job_status: JobStatus,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    next_token: Option<String>,
    #[serde(default)]
    blocks: Vec<Block>,
    #[serde(default)]
    document_metadata: Option<DocumentMetadata>,
}

impl From<GetResponse> for JobPage {
    fn from(resp: GetResponse) -> Self {
        JobPage {
            status: resp.job_status,
            blocks: resp.blocks,
            next_token: resp.next_token.filter(|t| !t.is_empty()),
            status_message: resp.status_message,
            pages: resp.document_metadata.and_then(|m| m.pages),
        }
    }
}

/// Map an error body (`{"__type": "...#Name", "message": "..."}`) to an [`EngineError`].
fn classify_error(status: u16, body: &str) -> EngineError {
    let value: serde_json::Value = serde_json::from_str(body).unwrap_or_default();
    let error_type = value["__type"]
        .as_str()
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string());
    let message = value["message"]
        .as_str()
        .or_else(|| value["Message"].as_str())
        .unwrap_or("")
        .to_string();

    match error_type {
        Some(name) if UNSUPPORTED_EXCEPTIONS.contains(&name.as_str()) => {
            EngineError::Unsupported(format!("{name}: {message}"))
        }
        Some(name) => EngineError::Transient(format!("HTTP {status} {name}: {message}")),
        None => EngineError::Transient(format!("HTTP {status}")),
    }
}

impl OcrEngine for TextractEngine {
    fn name(&self) -> &str {
        "textract"
    }

    fn detect_sync<'a>(
        &'a self,
        document: &'a [u8],
    ) -> BoxFuture<'a, Result<SyncDetection, EngineError>> {
        Box::pin(async move {
            let body = json!({ "Document": { "Bytes": BASE64.encode(document) } });
            let resp: DetectResponse = self.call("DetectDocumentText", body).await?;
            Ok(SyncDetection {
                blocks: resp.blocks,
                pages: resp.document_metadata.and_then(|m| m.pages),
            })
        })
    }

    fn start_async<'a>(
        &'a self,
        location: &'a DocumentLocation,
    ) -> BoxFuture<'a, Result<String, EngineError>> {
        Box::pin(async move {
            let Some(bucket) = location.bucket.as_deref() else {
                return Err(EngineError::Unsupported(format!(
                    "async detection of {} needs a bucket-backed document",
                    location.key
                )));
            };
            let body = json!({
                "DocumentLocation": { "S3Object": { "Bucket": bucket, "Name": location.key } }
            });
            let resp: StartResponse = self.call("StartDocumentTextDetection", body).await?;
            tracing::debug!(job_id = %resp.job_id, key = %location.key, "started textract job");
            Ok(resp.job_id)
        })
    }

    fn poll<'a>(
        &'a self,
        job_id: &'a str,
        next_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<JobPage, EngineError>> {
        Box::pin(async move {
            let mut body = json!({ "JobId": job_id, "MaxResults": MAX_RESULTS });
            if let Some(token) = next_token {
                body["NextToken"] = json!(token);
            }
            let resp: GetResponse = self.call("GetDocumentTextDetection", body).await?;
            Ok(resp.into())
        })
    }
}
