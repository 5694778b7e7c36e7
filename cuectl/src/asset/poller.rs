//! Waits for an uploaded asset to reach a terminal state.
//!
//! The loop polls immediately after upload, then sleeps a fixed interval between polls while the
//! provider reports `PROCESSING`. It is bounded by a maximum poll count and an overall deadline;
//! transient status-query failures are retried with backoff and do not count as polls.
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use crate::errors::{Error, Result};
use crate::provider::FileStore;
use crate::retry::RetryConfig;

use super::transitions::fetch;
use super::types::{Active, AnyAsset, Asset, AssetState, Processing};

/// Configuration for the readiness wait loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    /// Delay between consecutive status queries
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Give up after this many status queries
    pub max_polls: Option<u32>,
    /// Give up once the next poll would land past this deadline
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_polls: Some(150),
            timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// Uploads documents and waits for them to become usable.
pub struct Poller<'a, S: FileStore + ?Sized> {
    store: &'a S,
    config: PollConfig,
    retry: RetryConfig,
}

impl<'a, S: FileStore + ?Sized> Poller<'a, S> {
    pub fn new(store: &'a S, config: PollConfig, retry: RetryConfig) -> Self {
        Self { store, config, retry }
    }

    /// Send `path` to the store, returning a handle that still needs waiting on.
    pub async fn submit(&self, path: &Path, display_name: Option<&str>, mime_type: Option<&str>) -> Result<Asset<Processing>> {
        Asset::submit(self.store, path, display_name, mime_type).await
    }

    /// Current state of an asset. A pure read.
    pub async fn poll(&self, asset_id: &str) -> Result<AssetState> {
        Ok(fetch(self.store, asset_id, &self.retry).await?.state)
    }

    /// Poll until the asset is ACTIVE.
    ///
    /// Returns `AssetFailed` if the provider reports FAILED and `PollTimeout` once the poll count
    /// or deadline is exhausted.
    #[tracing::instrument(skip(self, asset), fields(asset_id = %asset.id()))]
    pub async fn wait_until_active(&self, asset: Asset<Processing>) -> Result<Asset<Active>> {
        let started = Instant::now();
        let deadline = self.config.timeout.map(|timeout| started + timeout);
        let mut asset = asset;

        loop {
            let asset_id = asset.id().to_string();
            let polls = asset.state.polls;

            // The deadline also bounds a single status query and its retries.
            let refreshed = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, asset.refresh(self.store, &self.retry)).await {
                    Ok(refreshed) => refreshed?,
                    Err(_) => {
                        tracing::warn!(polls, "Deadline passed during status query, giving up");
                        return Err(Error::PollTimeout {
                            asset_id,
                            attempts: polls,
                            elapsed: started.elapsed(),
                        });
                    }
                },
                None => asset.refresh(self.store, &self.retry).await?,
            };

            match refreshed {
                AnyAsset::Active(active) => {
                    tracing::info!(
                        elapsed = %humantime::format_duration(started.elapsed()),
                        "Asset is active"
                    );
                    return Ok(active);
                }
                AnyAsset::Failed(failed) => {
                    tracing::error!(reason = %failed.state.reason, "Asset processing failed");
                    return Err(Error::AssetFailed {
                        asset_id: failed.file.name,
                        reason: failed.state.reason,
                    });
                }
                AnyAsset::Processing(still) => {
                    let polls = still.state.polls;
                    let elapsed = started.elapsed();

                    let out_of_polls = self.config.max_polls.is_some_and(|max| polls >= max);
                    let out_of_time = self
                        .config
                        .timeout
                        .is_some_and(|timeout| elapsed + self.config.interval > timeout);

                    if out_of_polls || out_of_time {
                        tracing::warn!(polls, "Asset still processing, giving up");
                        return Err(Error::PollTimeout {
                            asset_id: still.file.name,
                            attempts: polls,
                            elapsed,
                        });
                    }

                    tokio::time::sleep(self.config.interval).await;
                    asset = still;
                }
            }
        }
    }
}
