//! Minimal S3 REST client for object I/O against a single bucket.
//!
//! Uses raw reqwest with path-style addressing (`{endpoint}/{bucket}/{key}`).
//! Requests are unsigned, so this works against anonymous buckets, local
//! S3-compatible servers, or a signing proxy in front of AWS.

mod list;

use thiserror::Error;

pub use list::ObjectSummary;

#[derive(Error, Debug)]
pub enum S3Error {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("S3 returned HTTP {status}{}: {message}", code_suffix(.code))]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("parse error: {0}")]
    Parse(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
}

impl S3Error {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            S3Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            S3Error::Status { status, .. } => *status >= 500 || *status == 429,
            S3Error::NotFound(_) | S3Error::Parse(_) => false,
        }
    }
}

/// Handle to one bucket on an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct Bucket {
    client: reqwest::Client,
    endpoint: String,
    name: String,
}

impl Bucket {
    /// Create a handle for `name` on an explicit endpoint
    /// (e.g. `http://localhost:9000`).
    pub fn new(endpoint: impl Into<String>, name: impl Into<String>) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            name: name.into(),
        }
    }

    /// Create a handle on the regional AWS endpoint.
    pub fn for_region(region: &str, name: impl Into<String>) -> Self {
        Self::new(format!("https://s3.{}.amazonaws.com", region), name)
    }

    /// Replace the HTTP client (timeouts, pooling).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn bucket_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.name)
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_url(), encode_key(key))
    }

    /// Upload `body` under `key`, overwriting any existing object.
    pub async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), S3Error> {
        let resp = self
            .client
            .put(self.object_url(key))
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await?;
        check_status(resp, key).await?;
        tracing::debug!(bucket = %self.name, key, "put object");
        Ok(())
    }

    /// Download the object stored under `key`.
    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>, S3Error> {
        let resp = self.client.get(self.object_url(key)).send().await?;
        let resp = check_status(resp, key).await?;
        let bytes = resp.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Return the object's size, or `None` if it does not exist.
    pub async fn head_object(&self, key: &str) -> Result<Option<u64>, S3Error> {
        let resp = self.client.head(self.object_url(key)).send().await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let resp = check_status(resp, key).await?;
        Ok(Some(resp.content_length().unwrap_or(0)))
    }

    /// Delete `key`. Deleting a missing object is not an error (S3 semantics).
    pub async fn delete_object(&self, key: &str) -> Result<(), S3Error> {
        let resp = self.client.delete(self.object_url(key)).send().await?;
        if resp.status().as_u16() == 404 {
            return Ok(());
        }
        check_status(resp, key).await?;
        Ok(())
    }

    /// List every object under `prefix`, following continuation tokens.
    pub async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>, S3Error> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}?list-type=2&prefix={}",
                self.bucket_url(),
                urlencoding::encode(prefix)
            );
            if let Some(ref token) = continuation_token {
                url.push_str(&format!(
                    "&continuation-token={}",
                    urlencoding::encode(token)
                ));
            }

            let resp = self.client.get(&url).send().await?;
            let resp = check_status(resp, prefix).await?;
            let body = resp.text().await?;

            let (page, next_token) = list::parse_list_objects_xml(&body)?;
            objects.extend(page);

            match next_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        tracing::debug!(bucket = %self.name, prefix, count = objects.len(), "listed objects");
        Ok(objects)
    }
}

/// Percent-encode each path segment of an object key, keeping `/` separators.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

async fn check_status(resp: reqwest::Response, key: &str) -> Result<reqwest::Response, S3Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status.as_u16() == 404 {
        return Err(S3Error::NotFound(key.to_string()));
    }
    let body = resp.text().await.unwrap_or_default();
    let (code, message) = list::parse_error_xml(&body);
    Err(S3Error::Status {
        status: status.as_u16(),
        code,
        message: message.unwrap_or_else(|| status.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_key_keeps_separators() {
        assert_eq!(
            encode_key("input-articles/my report.pdf"),
            "input-articles/my%20report.pdf"
        );
        assert_eq!(encode_key("a/b+c/d"), "a/b%2Bc/d");
    }

    #[test]
    fn object_url_is_path_style() {
        let bucket = Bucket::new("http://localhost:9000/", "docs");
        assert_eq!(
            bucket.object_url("extracted-texts/report.txt"),
            "http://localhost:9000/docs/extracted-texts/report.txt"
        );
    }

    #[test]
    fn regional_endpoint() {
        let bucket = Bucket::for_region("eu-west-1", "docs");
        assert_eq!(bucket.endpoint(), "https://s3.eu-west-1.amazonaws.com");
        assert_eq!(bucket.name(), "docs");
    }

    #[test]
    fn status_errors_classify_transience() {
        let throttled = S3Error::Status {
            status: 503,
            code: Some("SlowDown".into()),
            message: "reduce your request rate".into(),
        };
        assert!(throttled.is_transient());

        let denied = S3Error::Status {
            status: 403,
            code: Some("AccessDenied".into()),
            message: "Access Denied".into(),
        };
        assert!(!denied.is_transient());
        assert!(!S3Error::NotFound("x".into()).is_transient());
    }

    #[test]
    fn status_error_display_includes_code() {
        let err = S3Error::Status {
            status: 403,
            code: Some("AccessDenied".into()),
            message: "Access Denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "S3 returned HTTP 403 (AccessDenied): Access Denied"
        );
    }
}
