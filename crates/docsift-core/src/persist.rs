//! Writing extraction outputs and error records, and reading them back.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::ErrorRecord;
use crate::keys::base_name;
use crate::store::{BlobStore, ObjectInfo, StoreError};
use crate::{Config, ConfidenceStats, ExtractionMethod, ExtractionResult};

/// JSON document stored under the metadata prefix for each extracted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub original_file: String,
    pub text_file_key: String,
    pub extraction_method: ExtractionMethod,
    pub confidence_stats: ConfidenceStats,
    pub processing_time: f64,
    pub page_count: u32,
    pub character_count: usize,
    pub word_count: usize,
    pub is_high_quality: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_warning: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub extraction_timestamp: DateTime<Utc>,
}

/// Keys written for one successful extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedKeys {
    pub text_key: String,
    pub metadata_key: String,
}

/// A document with stored outputs, as found by [`Persister::list_processed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedDocument {
    pub name: String,
    /// Input key the outputs were most likely derived from.
    pub original_key: String,
    pub text_key: String,
    pub metadata_key: String,
    /// Size of the stored text in bytes.
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct Persister {
    store: Arc<dyn BlobStore>,
    config: Arc<Config>,
}

impl Persister {
    pub fn new(store: Arc<dyn BlobStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    pub fn metadata_record(
        &self,
        source_key: &str,
        extraction: &ExtractionResult,
        quality_warning: Option<&str>,
    ) -> MetadataRecord {
        MetadataRecord {
            original_file: source_key.to_string(),
            text_file_key: self.config.prefixes.text_key(source_key),
            extraction_method: extraction.extraction_method,
            confidence_stats: extraction.confidence_stats.clone(),
            processing_time: extraction.processing_time.as_secs_f64(),
            page_count: extraction.page_count,
            character_count: extraction.character_count,
            word_count: extraction.word_count,
            is_high_quality: extraction.is_high_quality(&self.config),
            quality_warning: quality_warning.map(str::to_string),
            metadata: extraction.metadata.clone(),
            extraction_timestamp: extraction.extraction_timestamp,
        }
    }

    /// Write the text and metadata outputs for `source_key`.
    ///
    /// The text is written first; if the metadata write then fails the text
    /// object is left in place and the error is returned. The error record
    /// for `source_key` is cleared only when there is no quality warning.
    pub async fn save_result(
        &self,
        source_key: &str,
        extraction: &ExtractionResult,
        quality_warning: Option<&str>,
    ) -> Result<SavedKeys, StoreError> {
        let prefixes = &self.config.prefixes;
        let text_key = prefixes.text_key(source_key);
        let metadata_key = prefixes.metadata_key(source_key);

        self.store
            .put(&text_key, extraction.text_content.clone().into_bytes())
            .await?;

        let record = self.metadata_record(source_key, extraction, quality_warning);
        let body = to_json(&metadata_key, &record)?;
        self.store.put(&metadata_key, body).await?;

        // A clean result supersedes any error record from an earlier run.
        // Partial results keep it; the caller replaces it with a quality record.
        if quality_warning.is_none() {
            let error_key = prefixes.error_key(source_key);
            if let Err(e) = self.store.delete(&error_key).await {
                tracing::debug!(key = %error_key, error = %e, "could not clear old error record");
            }
        }

        tracing::info!(
            source = source_key,
            text_key = %text_key,
            metadata_key = %metadata_key,
            "saved extraction"
        );
        Ok(SavedKeys {
            text_key,
            metadata_key,
        })
    }

    /// Write an error record; returns its key.
    pub async fn save_error(&self, record: &ErrorRecord) -> Result<String, StoreError> {
        let error_key = self.config.prefixes.error_key(&record.original_file);
        let body = to_json(&error_key, record)?;
        self.store.put(&error_key, body).await?;
        tracing::info!(
            source = %record.original_file,
            error_key = %error_key,
            "saved error record"
        );
        Ok(error_key)
    }

    /// Extracted text for a document base name.
    pub async fn load_text(&self, name: &str) -> Result<String, StoreError> {
        let key = self.config.prefixes.text_key_for(name);
        let bytes = self.store.get(&key).await?;
        String::from_utf8(bytes).map_err(|e| StoreError::Corrupt {
            key,
            reason: e.to_string(),
        })
    }

    pub async fn load_metadata(&self, name: &str) -> Result<MetadataRecord, StoreError> {
        self.load_json(&self.config.prefixes.metadata_key_for(name))
            .await
    }

    pub async fn load_error(&self, name: &str) -> Result<ErrorRecord, StoreError> {
        self.load_json(&self.config.prefixes.error_key_for(name))
            .await
    }

    /// Documents with stored text, sorted by name.
    pub async fn list_processed(&self) -> Result<Vec<ProcessedDocument>, StoreError> {
        let prefixes = &self.config.prefixes;
        let objects = self.store.list(&prefixes.output_text).await?;
        Ok(objects
            .into_iter()
            .filter(|o| o.key.ends_with(".txt"))
            .map(|o| {
                let name = base_name(&o.key).to_string();
                ProcessedDocument {
                    original_key: prefixes.input_key(&format!("{name}.pdf")),
                    metadata_key: prefixes.metadata_key_for(&name),
                    text_key: o.key,
                    size: o.size,
                    last_modified: o.last_modified,
                    name,
                }
            })
            .collect())
    }

    /// Stored error records.
    pub async fn list_errors(&self) -> Result<Vec<ObjectInfo>, StoreError> {
        let objects = self.store.list(&self.config.prefixes.errors).await?;
        Ok(objects
            .into_iter()
            .filter(|o| o.key.ends_with("_error.json"))
            .collect())
    }

    async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        let bytes = self.store.get(key).await?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

fn to_json<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(value).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::MemoryStore;

    fn extraction(text: &str, scores: &[f64]) -> ExtractionResult {
        let mut metadata = BTreeMap::new();
        metadata.insert("engine".to_string(), serde_json::json!("mock"));
        ExtractionResult::new(
            text.to_string(),
            ConfidenceStats::from_scores(scores, 80.0),
            ExtractionMethod::Sync,
            Duration::from_secs(2),
            1,
            metadata,
            "2025-03-01T12:00:00Z".parse().unwrap(),
        )
    }

    fn persister(store: Arc<MemoryStore>) -> Persister {
        Persister::new(store, Arc::new(Config::default()))
    }

    #[tokio::test]
    async fn saves_text_and_metadata() {
        let store = Arc::new(MemoryStore::new());
        let persister = persister(store.clone());
        let result = extraction("Hello world", &[99.0, 97.0]);

        let keys = persister
            .save_result("input-articles/report.pdf", &result, None)
            .await
            .unwrap();
        assert_eq!(keys.text_key, "extracted-texts/report.txt");
        assert_eq!(keys.metadata_key, "extraction-metadata/report.json");
        assert_eq!(store.snapshot(&keys.text_key).unwrap(), b"Hello world");

        let record = persister.load_metadata("report").await.unwrap();
        assert_eq!(record.original_file, "input-articles/report.pdf");
        assert_eq!(record.text_file_key, "extracted-texts/report.txt");
        assert_eq!(record.word_count, 2);
        assert!(record.is_high_quality);
        assert_eq!(record.metadata["engine"], "mock");
        assert_eq!(persister.load_text("report").await.unwrap(), "Hello world");
    }

    #[tokio::test]
    async fn saving_twice_is_byte_identical() {
        let store = Arc::new(MemoryStore::new());
        let persister = persister(store.clone());
        let result = extraction("Same text", &[90.0]);

        persister
            .save_result("input-articles/a.pdf", &result, None)
            .await
            .unwrap();
        let first_text = store.snapshot("extracted-texts/a.txt").unwrap();
        let first_meta = store.snapshot("extraction-metadata/a.json").unwrap();

        persister
            .save_result("input-articles/a.pdf", &result, None)
            .await
            .unwrap();
        assert_eq!(store.snapshot("extracted-texts/a.txt").unwrap(), first_text);
        assert_eq!(
            store.snapshot("extraction-metadata/a.json").unwrap(),
            first_meta
        );
    }

    #[tokio::test]
    async fn metadata_failure_leaves_text() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes_under("extraction-metadata/");
        let persister = persister(store.clone());

        let err = persister
            .save_result("input-articles/a.pdf", &extraction("x", &[90.0]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(store.snapshot("extracted-texts/a.txt").is_some());
    }

    #[tokio::test]
    async fn success_clears_stale_error_record() {
        let store = Arc::new(MemoryStore::new());
        store.insert("processing-errors/a_error.json", b"{}".to_vec());
        let persister = persister(store.clone());

        persister
            .save_result("input-articles/a.pdf", &extraction("x", &[90.0]), None)
            .await
            .unwrap();
        assert!(store.snapshot("processing-errors/a_error.json").is_none());
    }

    #[tokio::test]
    async fn partial_save_keeps_error_record() {
        let store = Arc::new(MemoryStore::new());
        store.insert("processing-errors/a_error.json", b"{}".to_vec());
        let persister = persister(store.clone());

        persister
            .save_result(
                "input-articles/a.pdf",
                &extraction("x", &[40.0]),
                Some("extraction quality below threshold"),
            )
            .await
            .unwrap();
        assert_eq!(
            store.snapshot("processing-errors/a_error.json").unwrap(),
            b"{}"
        );
    }

    #[tokio::test]
    async fn error_records_round_trip_and_list() {
        let store = Arc::new(MemoryStore::new());
        let persister = persister(store.clone());
        let record = ErrorRecord {
            original_file: "input-articles/broken.pdf".into(),
            error_kind: "DocumentValidationError".into(),
            error_message: "document validation failed: empty file".into(),
            attempted_methods: vec![],
            attempts: 0,
            elapsed_seconds: 0.01,
            processing_timestamp: Utc::now(),
            error_timestamp: Utc::now(),
        };

        let key = persister.save_error(&record).await.unwrap();
        assert_eq!(key, "processing-errors/broken_error.json");
        assert_eq!(persister.load_error("broken").await.unwrap(), record);

        let errors = persister.list_errors().await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].key, key);
    }

    #[tokio::test]
    async fn lists_processed_documents() {
        let store = Arc::new(MemoryStore::new());
        let persister = persister(store.clone());
        for key in ["input-articles/b.pdf", "input-articles/a.pdf"] {
            persister
                .save_result(key, &extraction("x", &[90.0]), None)
                .await
                .unwrap();
        }
        let names: Vec<String> = persister
            .list_processed()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn corrupt_metadata_is_reported() {
        let store = Arc::new(MemoryStore::new());
        store.insert("extraction-metadata/a.json", b"not json".to_vec());
        let err = persister(store).load_metadata("a").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
