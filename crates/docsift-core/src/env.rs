//! Environment variable overrides for [`Config`].

use std::str::FromStr;
use std::time::Duration;

use crate::{Config, MB};

/// Apply overrides from the process environment.
pub fn apply_env(config: &mut Config) {
    apply_env_from(config, |name| std::env::var(name).ok());
}

/// Apply overrides using `lookup` to resolve variable names.
///
/// Empty values are treated as unset. Values that fail to parse are logged
/// and skipped, leaving the existing setting in place.
pub fn apply_env_from(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("S3_BUCKET_NAME") {
        config.bucket = Some(v);
    }
    if let Some(v) = get("AWS_DEFAULT_REGION") {
        config.region = v;
    }
    if let Some(v) = get("S3_ENDPOINT") {
        config.s3_endpoint = Some(v);
    }
    if let Some(v) = get("TEXTRACT_ENDPOINT") {
        config.textract_endpoint = Some(v);
    }

    if let Some(secs) = parsed::<u64>("MAX_WAIT_TIME", get("MAX_WAIT_TIME")) {
        config.max_wait = Duration::from_secs(secs);
    }
    if let Some(secs) = parsed::<u64>("POLL_INTERVAL", get("POLL_INTERVAL")) {
        config.poll_interval = Duration::from_secs(secs.max(1));
    }
    if let Some(secs) = parsed::<u64>("EXECUTION_TIMEOUT", get("EXECUTION_TIMEOUT")) {
        config.execution_limit = Some(Duration::from_secs(secs));
    }
    if let Some(mb) = parsed::<u64>("SYNC_SIZE_LIMIT_MB", get("SYNC_SIZE_LIMIT_MB")) {
        config.sync_size_limit_bytes = mb.saturating_mul(MB);
    }
    if let Some(mb) = parsed::<u64>("MAX_DOCUMENT_SIZE_MB", get("MAX_DOCUMENT_SIZE_MB")) {
        config.max_document_size_bytes = mb.saturating_mul(MB);
    }
    if let Some(v) = parsed::<f64>("MIN_CONFIDENCE_THRESHOLD", get("MIN_CONFIDENCE_THRESHOLD")) {
        config.min_confidence_threshold = v;
    }
    if let Some(v) = parsed::<u32>("RETRY_ATTEMPTS", get("RETRY_ATTEMPTS")) {
        config.retry_attempts = v;
    }
    if let Some(secs) = parsed::<u64>("RETRY_DELAY", get("RETRY_DELAY")) {
        config.retry_delay = Duration::from_secs(secs);
    }
    if let Some(n) = parsed::<usize>("NUM_WORKERS", get("NUM_WORKERS")) {
        config.num_workers = n.max(1);
    }

    if let Some(v) = get("INPUT_PREFIX") {
        config.prefixes.input = v;
    }
    if let Some(v) = get("OUTPUT_TEXT_PREFIX") {
        config.prefixes.output_text = v;
    }
    if let Some(v) = get("OUTPUT_METADATA_PREFIX") {
        config.prefixes.output_metadata = v;
    }
    if let Some(v) = get("ERROR_PREFIX") {
        config.prefixes.errors = v;
    }
}

fn parsed<T: FromStr>(name: &str, value: Option<String>) -> Option<T> {
    let value = value?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %value, "ignoring unparseable environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn apply(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = Config::default();
        apply_env_from(&mut config, |name| vars.get(name).cloned());
        config
    }

    #[test]
    fn no_vars_keeps_defaults() {
        let config = apply(&[]);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.sync_size_limit_bytes, 5 * MB);
        assert!(config.bucket.is_none());
    }

    #[test]
    fn overrides_apply() {
        let config = apply(&[
            ("S3_BUCKET_NAME", "papers"),
            ("MAX_WAIT_TIME", "600"),
            ("EXECUTION_TIMEOUT", "900"),
            ("SYNC_SIZE_LIMIT_MB", "2"),
            ("MIN_CONFIDENCE_THRESHOLD", "72.5"),
            ("RETRY_ATTEMPTS", "1"),
            ("INPUT_PREFIX", "incoming/"),
        ]);
        assert_eq!(config.bucket.as_deref(), Some("papers"));
        assert_eq!(config.max_wait, Duration::from_secs(600));
        assert_eq!(config.execution_limit, Some(Duration::from_secs(900)));
        assert_eq!(config.sync_size_limit_bytes, 2 * MB);
        assert_eq!(config.min_confidence_threshold, 72.5);
        assert_eq!(config.retry_attempts, 1);
        assert_eq!(config.prefixes.input, "incoming/");
    }

    #[test]
    fn bad_values_are_ignored() {
        let config = apply(&[
            ("RETRY_ATTEMPTS", "three"),
            ("POLL_INTERVAL", "-1"),
            ("S3_BUCKET_NAME", "   "),
        ]);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert!(config.bucket.is_none());
    }

    #[test]
    fn zero_workers_clamped() {
        assert_eq!(apply(&[("NUM_WORKERS", "0")]).num_workers, 1);
    }
}
