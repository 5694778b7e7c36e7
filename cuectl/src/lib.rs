//! # cuectl: document extraction against Gemini
//!
//! `cuectl` uploads a document (typically a SOC 2 report PDF) to the Gemini Files API, waits until
//! the provider has finished processing it, then runs a fixed list of extraction queries against it
//! and prints each answer.
//!
//! ## Lifecycle
//!
//! An uploaded file moves through `PROCESSING` to either `ACTIVE` or `FAILED`. Only `ACTIVE` files
//! can be referenced in a generation request, which the crate enforces in the type system:
//! [`asset::Asset<Processing>`](asset::Processing) is what an upload returns, and the only way to
//! obtain an [`asset::Asset<Active>`](asset::Active) is to wait on it with an [`asset::Poller`] (or
//! convert a file already observed to be `ACTIVE`). Queries take an `Asset<Active>`.
//!
//! ```text
//!   submit ──► PROCESSING ──poll──► ACTIVE ──► [cache] ──► queries ──► cleanup
//!                   │  ▲                                                  ▲
//!                   └──┘ sleep interval                                   │
//!                   └──────────► FAILED / timeout ────────────────────────┘
//! ```
//!
//! ## Provider abstraction
//!
//! The pipeline talks to the provider through three capability traits in [`provider`]:
//! [`provider::FileStore`], [`provider::ContentGenerator`] and [`provider::CacheStore`].
//! [`gemini::GeminiClient`] implements all three over REST; tests use an in-memory scripted double.
//!
//! ## Errors and retries
//!
//! Every failure maps onto [`errors::Error`]. Authentication failures are fatal wherever they occur.
//! Transient failures (HTTP 408, 429, 5xx and transport errors) of status queries and generation
//! calls are retried with exponential backoff ([`retry`]); uploads are never retried.
//!
//! ## Configuration
//!
//! See [`config`] for the YAML file layout and environment overrides.

use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::pin::{Pin, pin};

use tracing::{info, instrument, warn};

pub mod asset;
pub mod cache;
pub mod config;
pub mod errors;
pub mod gemini;
pub mod generation;
pub mod provider;
pub mod retry;
pub mod telemetry;

#[cfg(test)]
mod test;
#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;

use crate::asset::Poller;
use crate::cache::CachedContent;
use crate::errors::{Error, Result};
use crate::gemini::GeminiClient;
use crate::generation::{GenerationTarget, Generator, QueryResult};
use crate::provider::{CacheStore, ContentGenerator, FileStore};

/// Install the rustls crypto provider used by every TLS client in the process.
///
/// Safe to call more than once; later calls are no-ops.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Run `work` unless `shutdown` resolves first.
///
/// `shutdown` is polled at most until it completes; the caller stops after `Interrupted`.
async fn interruptible<T, F>(shutdown: Pin<&mut F>, work: impl Future<Output = Result<T>>) -> Result<T>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        result = work => result,
        () = shutdown => {
            warn!("Shutdown requested, abandoning remaining work");
            Err(Error::Interrupted)
        }
    }
}

/// Remote resources created during a run, deleted during cleanup.
#[derive(Debug, Default)]
struct Created {
    file: Option<String>,
    cache: Option<String>,
}

/// One configured extraction run.
pub struct Application<P = GeminiClient> {
    config: Config,
    provider: P,
}

impl Application<GeminiClient> {
    pub fn new(config: Config) -> Result<Self> {
        let provider = GeminiClient::new(&config.provider)?;
        Ok(Self { config, provider })
    }
}

impl<P> Application<P>
where
    P: FileStore + ContentGenerator + CacheStore,
{
    pub fn with_provider(config: Config, provider: P) -> Self {
        Self { config, provider }
    }

    /// Process `document`, writing each query's answer to `out` as soon as it arrives.
    pub async fn run<W: Write>(&self, document: &Path, out: &mut W) -> Result<Vec<QueryResult>> {
        self.run_until(document, out, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but abandons the remaining work when `shutdown` resolves.
    ///
    /// Requests that create remote resources (the upload and the cache) are allowed to finish
    /// before the interruption takes effect, so cleanup always knows what to delete. Waiting and
    /// querying stop as soon as `shutdown` resolves.
    #[instrument(skip_all, fields(document = %document.display(), model = %self.config.model))]
    pub async fn run_until<W, F>(&self, document: &Path, out: &mut W, shutdown: F) -> Result<Vec<QueryResult>>
    where
        W: Write,
        F: Future<Output = ()>,
    {
        let mut created = Created::default();
        let shutdown = pin!(shutdown);

        let outcome = self.pipeline(document, out, &mut created, shutdown).await;
        if let Err(e) = &outcome {
            warn!(error = %e, "Run failed");
        }

        self.cleanup(&created).await;
        outcome
    }

    async fn pipeline<W, F>(
        &self,
        document: &Path,
        out: &mut W,
        created: &mut Created,
        mut shutdown: Pin<&mut F>,
    ) -> Result<Vec<QueryResult>>
    where
        W: Write,
        F: Future<Output = ()>,
    {
        let config = &self.config;
        let poller = Poller::new(&self.provider, config.poll.clone(), config.retry);

        let asset = poller
            .submit(document, config.document.display_name.as_deref(), config.document.mime_type.as_deref())
            .await?;
        created.file = Some(asset.id().to_string());
        info!(asset_id = %asset.id(), "Document uploaded, waiting for processing");

        let asset = interruptible(shutdown.as_mut(), poller.wait_until_active(asset)).await?;

        let cached: Option<CachedContent> = if config.cache.enabled {
            let cache = cache::create_for_asset(
                &self.provider,
                &config.cache,
                &config.model,
                config.system_instruction.as_deref(),
                &asset,
            )
            .await?;
            created.cache = Some(cache.name.clone());
            Some(cache)
        } else {
            None
        };

        let target = match &cached {
            Some(cache) => GenerationTarget::Cache(cache),
            None => GenerationTarget::Asset(&asset),
        };

        let generator = Generator::new(&self.provider, config.model.clone(), config.system_instruction.clone(), config.retry);
        let queries = generator.run_queries(target, &config.queries, |result| {
            writeln!(out, "{}", result.text).map_err(Error::Output)?;
            out.flush().map_err(Error::Output)
        });
        interruptible(shutdown, queries).await
    }

    /// Best-effort deletion of whatever the run created. Failures are logged, never returned.
    async fn cleanup(&self, created: &Created) {
        if !self.config.cleanup.delete_remote {
            if let Some(file) = &created.file {
                info!(asset_id = %file, "Leaving remote file in place (cleanup.delete_remote is off)");
            }
            return;
        }

        if let Some(name) = &created.cache {
            match self.provider.delete_cache(name).await {
                Ok(()) => info!(cache = %name, "Deleted context cache"),
                Err(e) => warn!(cache = %name, error = %e, "Failed to delete context cache"),
            }
        }

        if let Some(name) = &created.file {
            match self.provider.delete(name).await {
                Ok(()) => info!(asset_id = %name, "Deleted remote file"),
                Err(e) => warn!(asset_id = %name, error = %e, "Failed to delete remote file"),
            }
        }
    }
}
