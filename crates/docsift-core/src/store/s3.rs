//! S3 bucket blob store.

use chrono::{DateTime, Utc};
use docsift_s3::{Bucket, ObjectSummary, S3Error};

use super::{BlobStore, ObjectInfo, StoreError, content_type_for};
use crate::{BoxFuture, Config};

pub struct S3Store {
    bucket: Bucket,
}

impl S3Store {
    pub fn new(bucket: Bucket) -> Self {
        Self { bucket }
    }

    /// Store for `bucket` on the configured endpoint, or the regional AWS one.
    pub fn from_config(bucket: &str, config: &Config) -> Self {
        let handle = match &config.s3_endpoint {
            Some(endpoint) => Bucket::new(endpoint.as_str(), bucket),
            None => Bucket::for_region(&config.region, bucket),
        };
        Self::new(handle)
    }
}

impl From<S3Error> for StoreError {
    fn from(err: S3Error) -> Self {
        match err {
            S3Error::NotFound(key) => StoreError::NotFound(key),
            other if other.is_transient() => StoreError::Transient(other.to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

fn to_info(summary: ObjectSummary) -> ObjectInfo {
    let last_modified = summary
        .last_modified
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));
    ObjectInfo {
        key: summary.key,
        size: summary.size,
        last_modified,
    }
}

impl BlobStore for S3Store {
    fn describe(&self) -> String {
        format!("s3://{}", self.bucket.name())
    }

    fn bucket(&self) -> Option<&str> {
        Some(self.bucket.name())
    }

    fn put<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.bucket
                .put_object(key, bytes, content_type_for(key))
                .await?;
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, StoreError>> {
        Box::pin(async move { Ok(self.bucket.get_object(key).await?) })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<ObjectInfo>, StoreError>> {
        Box::pin(async move {
            let mut objects: Vec<ObjectInfo> = self
                .bucket
                .list_objects(prefix)
                .await?
                .into_iter()
                .map(to_info)
                .collect();
            objects.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(objects)
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move { Ok(self.bucket.head_object(key).await?.is_some()) })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move { Ok(self.bucket.delete_object(key).await?) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_timestamps_parse() {
        let info = to_info(ObjectSummary {
            key: "extracted-texts/a.txt".into(),
            size: 12,
            last_modified: Some("2025-01-15T10:00:00.000Z".into()),
        });
        assert_eq!(
            info.last_modified.map(|d| d.to_rfc3339()),
            Some("2025-01-15T10:00:00+00:00".to_string())
        );

        let info = to_info(ObjectSummary {
            key: "k".into(),
            size: 0,
            last_modified: Some("yesterday".into()),
        });
        assert!(info.last_modified.is_none());
    }

    #[test]
    fn not_found_maps_through() {
        assert_eq!(
            StoreError::from(S3Error::NotFound("a".into())),
            StoreError::NotFound("a".into())
        );
    }

    #[test]
    fn throttling_maps_to_transient() {
        let throttled = StoreError::from(S3Error::Status {
            status: 503,
            code: Some("SlowDown".into()),
            message: "reduce your request rate".into(),
        });
        assert!(throttled.is_transient());

        let denied = StoreError::from(S3Error::Status {
            status: 403,
            code: Some("AccessDenied".into()),
            message: "Access Denied".into(),
        });
        assert!(matches!(denied, StoreError::Backend(_)));
    }

    #[test]
    fn store_reports_bucket() {
        let config = Config {
            s3_endpoint: Some("http://localhost:9000".into()),
            ..Config::default()
        };
        let store = S3Store::from_config("docs", &config);
        assert_eq!(store.bucket(), Some("docs"));
        assert_eq!(store.describe(), "s3://docs");
    }
}
