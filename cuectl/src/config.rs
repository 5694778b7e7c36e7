//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `cuectl.yaml` but can be specified via `-f` flag or `CUECTL_CONFIG`
//! environment variable. A missing file is not an error: every field has a default except the API
//! key.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `cuectl.yaml`)
//! 2. **GOOGLE_API_KEY**, then **GEMINI_API_KEY** - Special case: set `provider.api_key`
//! 3. **Environment variables** - Variables prefixed with `CUECTL_` override everything above
//! 4. **Command line** - The positional document path overrides `document.path`
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `CUECTL_POLL__INTERVAL=5s` sets the `poll.interval` field.
//!
//! ## Example
//!
//! ```yaml
//! model: models/gemini-2.5-flash
//! system_instruction: You are a SOC Audit extraction expert.
//! document:
//!   path: Okta_SOC2.pdf
//! queries:
//!   - name: deviations
//!     prompt: Find all control deviations...
//!   - name: cuecs
//!     prompt: List all CUECs...
//! poll:
//!   interval: 2s
//!   max_polls: 150
//!   timeout: 10m
//! cache:
//!   enabled: true
//!   ttl: 10m
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::Deserialize;
use std::{fmt, path::PathBuf, time::Duration};
use url::Url;

use crate::asset::PollConfig;
use crate::cache::CacheConfig;
use crate::errors::Error;
use crate::generation::Query;
use crate::retry::RetryConfig;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/";
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a SOC Audit extraction expert.";

/// Caches shorter than this are refused by the provider.
const MIN_CACHE_TTL: Duration = Duration::from_secs(60);

/// Upload a document, wait for it to be processed, and run extraction queries against it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "CUECTL_CONFIG", default_value = "cuectl.yaml")]
    pub config: String,

    /// Validate configuration and exit without contacting the provider.
    #[arg(long)]
    pub validate: bool,

    /// Document to process. Overrides `document.path`.
    pub document: Option<PathBuf>,
}

/// Provider API key. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub provider: ProviderConfig,
    /// Model used for generation and caching. Bare ids are qualified as `models/<id>`.
    pub model: String,
    /// Sent with every uncached query and baked into the cache when caching is enabled
    pub system_instruction: Option<String>,
    pub document: DocumentConfig,
    /// Extraction queries, run in order
    pub queries: Vec<Query>,
    pub poll: PollConfig,
    /// Backoff for transient status-query and generation failures
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub cleanup: CleanupConfig,
    pub logging: LoggingConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub api_key: Option<ApiKey>,
    pub base_url: Url,
    /// Host for resumable uploads, when it differs from `base_url`
    pub upload_base_url: Option<Url>,
    /// Per-request timeout for all provider calls
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            upload_base_url: None,
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocumentConfig {
    pub path: Option<PathBuf>,
    /// Name shown in the provider console. Defaults to the file name.
    pub display_name: Option<String>,
    /// Defaults to a guess from the file extension
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleanupConfig {
    /// Delete the uploaded file and any cache once the run ends, successful or not
    pub delete_remote: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { delete_remote: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

pub fn default_queries() -> Vec<Query> {
    vec![
        Query::new("deviations", "Find all control deviations..."),
        Query::new("cuecs", "List all CUECs..."),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            model: DEFAULT_MODEL.to_string(),
            system_instruction: Some(DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            document: DocumentConfig::default(),
            queries: default_queries(),
            poll: PollConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            cleanup: CleanupConfig::default(),
            logging: LoggingConfig::default(),
            enable_otel_export: false,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(path) = &args.document {
            config.document.path = Some(path.clone());
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::raw().only(&["GOOGLE_API_KEY"]).map(|_| "provider.api_key".into()))
            .merge(Env::raw().only(&["GEMINI_API_KEY"]).map(|_| "provider.api_key".into()))
            // CUECTL_CONFIG names the file itself and is not a config key
            .merge(Env::prefixed("CUECTL_").ignore(&["config"]).split("__"))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |message: String| Err(Error::Config { message });

        match &self.provider.api_key {
            None => {
                return invalid(
                    "provider.api_key is not set. Set GEMINI_API_KEY, GOOGLE_API_KEY or CUECTL_PROVIDER__API_KEY.".to_string(),
                );
            }
            Some(key) if key.expose().trim().is_empty() => return invalid("provider.api_key is empty".to_string()),
            Some(_) => {}
        }

        if self.provider.request_timeout.is_zero() {
            return invalid("provider.request_timeout must be greater than zero".to_string());
        }

        if self.model.trim().is_empty() {
            return invalid("model must not be empty".to_string());
        }

        if self.queries.is_empty() {
            return invalid("at least one query must be configured".to_string());
        }
        if let Some(query) = self.queries.iter().find(|q| q.prompt.trim().is_empty()) {
            return invalid(format!("query '{}' has an empty prompt", query.name));
        }

        if self.poll.interval.is_zero() {
            return invalid("poll.interval must be greater than zero".to_string());
        }
        if self.poll.max_polls.is_none() && self.poll.timeout.is_none() {
            return invalid("poll.max_polls and poll.timeout cannot both be unset".to_string());
        }
        if self.poll.max_polls == Some(0) {
            return invalid("poll.max_polls must be at least 1".to_string());
        }

        if self.retry.backoff_factor == 0 {
            return invalid("retry.backoff_factor must be at least 1".to_string());
        }

        if self.cache.enabled && self.cache.ttl < MIN_CACHE_TTL {
            return invalid(format!(
                "cache.ttl ({}) must be at least {}",
                humantime::format_duration(self.cache.ttl),
                humantime::format_duration(MIN_CACHE_TTL)
            ));
        }

        Ok(())
    }
}
