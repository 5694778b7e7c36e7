//! Provider-side context caching.
//!
//! A context cache holds the processed document (and system instruction) on the provider for a
//! limited time, so follow-up queries are billed at the cached rate instead of re-reading the
//! whole file. Caches are opt-in and always created with an explicit TTL.
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::asset::{Active, Asset};
use crate::errors::{Error, Result};
use crate::provider::CacheStore;

/// Context cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Route queries through a context cache instead of the raw file
    pub enabled: bool,
    pub display_name: String,
    /// How long the provider keeps the cache before deleting it on its own
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            display_name: "cuectl-cache".to_string(),
            ttl: Duration::from_secs(600),
        }
    }
}

/// Everything needed to create a cache over one ACTIVE file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCacheRequest {
    pub model: String,
    pub display_name: String,
    pub system_instruction: Option<String>,
    pub file_uri: String,
    pub mime_type: String,
    pub ttl: Duration,
}

/// A cache as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedContent {
    /// e.g. `cachedContents/xyz`
    pub name: String,
    pub model: String,
    pub display_name: Option<String>,
    pub create_time: Option<DateTime<Utc>>,
    pub expire_time: DateTime<Utc>,
}

impl CachedContent {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_time
    }

    /// Fail with `CacheExpired` if the provider will already have dropped this cache.
    pub fn ensure_live(&self, now: DateTime<Utc>) -> Result<()> {
        if self.is_expired_at(now) {
            return Err(Error::CacheExpired {
                name: self.name.clone(),
                expired_at: self.expire_time,
            });
        }
        Ok(())
    }
}

/// Create a cache holding `asset` for `model`.
#[tracing::instrument(skip_all, fields(asset_id = %asset.id(), model = %model))]
pub async fn create_for_asset<C: CacheStore + ?Sized>(
    store: &C,
    config: &CacheConfig,
    model: &str,
    system_instruction: Option<&str>,
    asset: &Asset<Active>,
) -> Result<CachedContent> {
    let request = CreateCacheRequest {
        model: model.to_string(),
        display_name: config.display_name.clone(),
        system_instruction: system_instruction.map(str::to_string),
        file_uri: asset.uri().to_string(),
        mime_type: asset.mime_type().to_string(),
        ttl: config.ttl,
    };

    let cache = store.create_cache(&request).await.map_err(Error::cache)?;

    tracing::info!(
        cache = %cache.name,
        expire_time = %cache.expire_time,
        "Context cache created"
    );
    Ok(cache)
}
