//! Extraction queries against a ready document.
use chrono::Utc;
use serde::Deserialize;

use crate::asset::{Active, Asset};
use crate::cache::CachedContent;
use crate::errors::{Error, Result};
use crate::provider::ContentGenerator;
use crate::retry::{RetryConfig, retry_transient};

/// A named prompt to run against the document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Query {
    pub name: String,
    pub prompt: String,
}

impl Query {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }
}

/// What the model should read alongside the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    File { uri: String, mime_type: String },
    Cached { name: String },
}

/// Provider-neutral generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub model: String,
    /// Omitted for cached sources, which carry their own instruction
    pub system_instruction: Option<String>,
    pub prompt: String,
    pub source: ContentSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u32>,
    pub cached_content_tokens: Option<u32>,
    pub candidates_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateResponse {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Either the ACTIVE file itself or a live cache built from it.
///
/// Both variants require proof of readiness: an `Asset<Active>` can only be obtained from the
/// poller or from a file whose state was checked.
#[derive(Debug, Clone, Copy)]
pub enum GenerationTarget<'a> {
    Asset(&'a Asset<Active>),
    Cache(&'a CachedContent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub name: String,
    pub text: String,
}

/// Runs queries one at a time against a single target.
pub struct Generator<'a, G: ContentGenerator + ?Sized> {
    client: &'a G,
    model: String,
    system_instruction: Option<String>,
    retry: RetryConfig,
}

impl<'a, G: ContentGenerator + ?Sized> Generator<'a, G> {
    pub fn new(client: &'a G, model: impl Into<String>, system_instruction: Option<String>, retry: RetryConfig) -> Self {
        Self {
            client,
            model: model.into(),
            system_instruction,
            retry,
        }
    }

    fn request_for(&self, target: GenerationTarget<'_>, prompt: &str) -> Result<GenerateRequest> {
        let (system_instruction, source) = match target {
            GenerationTarget::Asset(asset) => (
                self.system_instruction.clone(),
                ContentSource::File {
                    uri: asset.uri().to_string(),
                    mime_type: asset.mime_type().to_string(),
                },
            ),
            GenerationTarget::Cache(cache) => {
                cache.ensure_live(Utc::now())?;
                (None, ContentSource::Cached { name: cache.name.clone() })
            }
        };

        Ok(GenerateRequest {
            model: self.model.clone(),
            system_instruction,
            prompt: prompt.to_string(),
            source,
        })
    }

    /// Run one query, retrying transient provider failures.
    #[tracing::instrument(skip(self, target, query), fields(query = %query.name, model = %self.model))]
    pub async fn generate(&self, target: GenerationTarget<'_>, query: &Query) -> Result<QueryResult> {
        let request = self.request_for(target, &query.prompt)?;
        let model = self.model.as_str();
        let client = self.client;
        let request = &request;

        let response = retry_transient(&self.retry, "generate", move || async move {
            client.generate(request).await.map_err(|e| Error::generation(model, e))
        })
        .await?;

        tracing::info!(
            finish_reason = response.finish_reason.as_deref().unwrap_or("unknown"),
            total_tokens = response.usage.as_ref().and_then(|u| u.total_tokens),
            response_len = response.text.len(),
            "Query completed"
        );

        Ok(QueryResult {
            name: query.name.clone(),
            text: response.text,
        })
    }

    /// Run `queries` in order, handing each result to `on_result` before issuing the next.
    ///
    /// Stops at the first failure; results already delivered stay delivered.
    pub async fn run_queries<F>(&self, target: GenerationTarget<'_>, queries: &[Query], mut on_result: F) -> Result<Vec<QueryResult>>
    where
        F: FnMut(&QueryResult) -> Result<()>,
    {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            let result = self.generate(target, query).await?;
            on_result(&result)?;
            results.push(result);
        }
        Ok(results)
    }
}
