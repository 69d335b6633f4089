use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Config, MB};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub storage: Option<StorageConfig>,
    pub engine: Option<EngineConfig>,
    pub limits: Option<LimitsConfig>,
    pub quality: Option<QualityConfig>,
    pub retry: Option<RetryConfig>,
    pub concurrency: Option<ConcurrencyConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub input_prefix: Option<String>,
    pub output_text_prefix: Option<String>,
    pub output_metadata_prefix: Option<String>,
    pub error_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub textract_endpoint: Option<String>,
    pub max_wait_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub execution_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub sync_size_limit_mb: Option<u64>,
    pub max_document_size_mb: Option<u64>,
    pub max_sync_pages: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    pub min_confidence_threshold: Option<f64>,
    pub min_average_confidence: Option<f64>,
    pub max_low_confidence_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub attempts: Option<u32>,
    pub delay_secs: Option<u64>,
    pub fallback_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub num_workers: Option<usize>,
}

/// Platform config directory path: `<config_dir>/docsift/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("docsift").join("config.toml"))
}

/// Load config by cascading CWD `.docsift.toml` over platform config.
/// CWD values override platform values. Missing files are skipped;
/// unreadable ones are skipped with a warning.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_if_present(&p));
    let cwd = load_if_present(Path::new(".docsift.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

fn load_if_present(path: &Path) -> Option<ConfigFile> {
    if !path.exists() {
        return None;
    }
    match load_from_path(path) {
        Ok(file) => Some(file),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring config file");
            None
        }
    }
}

/// Load a config from a specific path.
pub fn load_from_path(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        storage: merge_section(base.storage, overlay.storage, |b, o| StorageConfig {
            bucket: o.bucket.or(b.bucket),
            region: o.region.or(b.region),
            endpoint: o.endpoint.or(b.endpoint),
            input_prefix: o.input_prefix.or(b.input_prefix),
            output_text_prefix: o.output_text_prefix.or(b.output_text_prefix),
            output_metadata_prefix: o.output_metadata_prefix.or(b.output_metadata_prefix),
            error_prefix: o.error_prefix.or(b.error_prefix),
        }),
        engine: merge_section(base.engine, overlay.engine, |b, o| EngineConfig {
            textract_endpoint: o.textract_endpoint.or(b.textract_endpoint),
            max_wait_secs: o.max_wait_secs.or(b.max_wait_secs),
            poll_interval_secs: o.poll_interval_secs.or(b.poll_interval_secs),
            execution_timeout_secs: o.execution_timeout_secs.or(b.execution_timeout_secs),
        }),
        limits: merge_section(base.limits, overlay.limits, |b, o| LimitsConfig {
            sync_size_limit_mb: o.sync_size_limit_mb.or(b.sync_size_limit_mb),
            max_document_size_mb: o.max_document_size_mb.or(b.max_document_size_mb),
            max_sync_pages: o.max_sync_pages.or(b.max_sync_pages),
        }),
        quality: merge_section(base.quality, overlay.quality, |b, o| QualityConfig {
            min_confidence_threshold: o.min_confidence_threshold.or(b.min_confidence_threshold),
            min_average_confidence: o.min_average_confidence.or(b.min_average_confidence),
            max_low_confidence_ratio: o.max_low_confidence_ratio.or(b.max_low_confidence_ratio),
        }),
        retry: merge_section(base.retry, overlay.retry, |b, o| RetryConfig {
            attempts: o.attempts.or(b.attempts),
            delay_secs: o.delay_secs.or(b.delay_secs),
            fallback_enabled: o.fallback_enabled.or(b.fallback_enabled),
        }),
        concurrency: merge_section(base.concurrency, overlay.concurrency, |b, o| {
            ConcurrencyConfig {
                num_workers: o.num_workers.or(b.num_workers),
            }
        }),
    }
}

fn merge_section<T>(base: Option<T>, overlay: Option<T>, f: impl FnOnce(T, T) -> T) -> Option<T> {
    match (base, overlay) {
        (Some(b), Some(o)) => Some(f(b, o)),
        (b, o) => o.or(b),
    }
}

impl ConfigFile {
    /// Overwrite `config` with every value set in this file.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(s) = &self.storage {
            if let Some(v) = &s.bucket {
                config.bucket = Some(v.clone());
            }
            if let Some(v) = &s.region {
                config.region = v.clone();
            }
            if let Some(v) = &s.endpoint {
                config.s3_endpoint = Some(v.clone());
            }
            if let Some(v) = &s.input_prefix {
                config.prefixes.input = v.clone();
            }
            if let Some(v) = &s.output_text_prefix {
                config.prefixes.output_text = v.clone();
            }
            if let Some(v) = &s.output_metadata_prefix {
                config.prefixes.output_metadata = v.clone();
            }
            if let Some(v) = &s.error_prefix {
                config.prefixes.errors = v.clone();
            }
        }
        if let Some(e) = &self.engine {
            if let Some(v) = &e.textract_endpoint {
                config.textract_endpoint = Some(v.clone());
            }
            if let Some(v) = e.max_wait_secs {
                config.max_wait = Duration::from_secs(v);
            }
            if let Some(v) = e.poll_interval_secs {
                config.poll_interval = Duration::from_secs(v.max(1));
            }
            if let Some(v) = e.execution_timeout_secs {
                config.execution_limit = Some(Duration::from_secs(v));
            }
        }
        if let Some(l) = &self.limits {
            if let Some(v) = l.sync_size_limit_mb {
                config.sync_size_limit_bytes = v.saturating_mul(MB);
            }
            if let Some(v) = l.max_document_size_mb {
                config.max_document_size_bytes = v.saturating_mul(MB);
            }
            if let Some(v) = l.max_sync_pages {
                config.max_sync_pages = v;
            }
        }
        if let Some(q) = &self.quality {
            if let Some(v) = q.min_confidence_threshold {
                config.min_confidence_threshold = v;
            }
            if let Some(v) = q.min_average_confidence {
                config.min_average_confidence = v;
            }
            if let Some(v) = q.max_low_confidence_ratio {
                config.max_low_confidence_ratio = v;
            }
        }
        if let Some(r) = &self.retry {
            if let Some(v) = r.attempts {
                config.retry_attempts = v;
            }
            if let Some(v) = r.delay_secs {
                config.retry_delay = Duration::from_secs(v);
            }
            if let Some(v) = r.fallback_enabled {
                config.fallback_enabled = v;
            }
        }
        if let Some(c) = &self.concurrency
            && let Some(v) = c.num_workers
        {
            config.num_workers = v.max(1);
        }
    }
}
