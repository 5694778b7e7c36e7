//! Gemini REST client.
//!
//! Implements the [`FileStore`], [`ContentGenerator`] and [`CacheStore`] capabilities over the
//! `v1beta` API using `reqwest`. All requests authenticate with the `x-goog-api-key` header.
//! Uploads use the resumable protocol: a `start` request opens a session whose URL is returned in
//! the `x-goog-upload-url` header, and a single `upload, finalize` request sends the bytes.

pub mod models;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use crate::asset::RemoteFile;
use crate::cache::{CachedContent, CreateCacheRequest};
use crate::config::{ApiKey, ProviderConfig};
use crate::errors::{ApiError, Error};
use crate::generation::{GenerateRequest, GenerateResponse};
use crate::provider::{CacheStore, ContentGenerator, FileStore, FileUpload};

use models::{
    CachedContentResponse, Content, CreateCachedContent, ErrorEnvelope, GenerateContentRequest, GenerateContentResponse, Part,
    UploadMetadata, UploadResponse, UploadStart,
};

const API_VERSION: &str = "v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// Longest provider error body carried into an error message.
const MAX_ERROR_BODY: usize = 512;

/// Makes sure a url has a trailing slash, so `join` appends instead of replacing the last segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", new_url.path());
        new_url.set_path(&path);
        new_url
    }
}

/// Qualify a bare model id (`gemini-2.5-flash`) as a resource name (`models/gemini-2.5-flash`).
pub fn normalize_model_name(model: &str) -> String {
    if model.contains('/') {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

fn api_error(status: u16, body: &str) -> ApiError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let reason = envelope.error.reason();
            let message = if envelope.error.message.is_empty() {
                envelope.error.status.unwrap_or_else(|| "unknown error".to_string())
            } else {
                envelope.error.message
            };
            ApiError::Status { status, message, reason }
        }
        Err(_) => {
            let trimmed = body.trim();
            let message = if trimmed.is_empty() {
                reqwest::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("no response body")
                    .to_string()
            } else {
                trimmed.chars().take(MAX_ERROR_BODY).collect()
            };
            ApiError::Status {
                status,
                message,
                reason: None,
            }
        }
    }
}

/// Turn non-success responses into `ApiError::Status`, parsing Google's error envelope.
async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(status = status.as_u16(), body = %body, "Provider returned error");
    Err(api_error(status.as_u16(), &body))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        tracing::error!(error = %e, body = %body, "Failed to parse provider response");
        ApiError::Decode(format!("error decoding response body: {e}"))
    })
}

/// Production provider client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: Url,
    upload_base_url: Url,
    api_key: ApiKey,
}

impl GeminiClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, Error> {
        crate::install_crypto_provider();

        let api_key = config.api_key.clone().ok_or_else(|| Error::Config {
            message: "provider.api_key is not set (use CUECTL_PROVIDER__API_KEY or GEMINI_API_KEY)".to_string(),
        })?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("cuectl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            upload_base_url: config.upload_base_url.clone().unwrap_or_else(|| config.base_url.clone()),
            base_url: config.base_url.clone(),
            api_key,
        })
    }

    fn api_url(&self, path: &str) -> Result<Url, ApiError> {
        ensure_slash(&self.base_url)
            .join(&format!("{API_VERSION}/{path}"))
            .map_err(|e| ApiError::Decode(format!("failed to construct URL for {path}: {e}")))
    }

    fn upload_url(&self) -> Result<Url, ApiError> {
        ensure_slash(&self.upload_base_url)
            .join(&format!("upload/{API_VERSION}/files"))
            .map_err(|e| ApiError::Decode(format!("failed to construct upload URL: {e}")))
    }
}

#[async_trait]
impl FileStore for GeminiClient {
    #[instrument(skip(self, upload), fields(display_name = %upload.display_name, size = upload.bytes.len()))]
    async fn upload(&self, upload: FileUpload) -> Result<RemoteFile, ApiError> {
        let start = self
            .client
            .post(self.upload_url()?)
            .header(API_KEY_HEADER, self.api_key.expose())
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", upload.bytes.len())
            .header("X-Goog-Upload-Header-Content-Type", upload.mime_type.as_str())
            .json(&UploadStart {
                file: UploadMetadata {
                    display_name: &upload.display_name,
                },
            })
            .send()
            .await?;
        let start = check(start).await?;

        let session_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ApiError::Decode(format!("upload start response had no {UPLOAD_URL_HEADER} header")))?;
        debug!("Upload session opened");

        let finish = self
            .client
            .post(&session_url)
            .header(API_KEY_HEADER, self.api_key.expose())
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header("X-Goog-Upload-Offset", "0")
            .body(upload.bytes)
            .send()
            .await?;
        let uploaded: UploadResponse = decode(check(finish).await?).await?;

        Ok(uploaded.file)
    }

    #[instrument(skip(self))]
    async fn get(&self, name: &str) -> Result<RemoteFile, ApiError> {
        let response = self
            .client
            .get(self.api_url(name)?)
            .header(API_KEY_HEADER, self.api_key.expose())
            .send()
            .await?;
        decode(check(response).await?).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.api_url(name)?)
            .header(API_KEY_HEADER, self.api_key.expose())
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ContentGenerator for GeminiClient {
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ApiError> {
        let url = self.api_url(&format!("{}:generateContent", normalize_model_name(&request.model)))?;
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, self.api_key.expose())
            .json(&GenerateContentRequest::from(request))
            .send()
            .await?;
        let body: GenerateContentResponse = decode(check(response).await?).await?;

        let Some(candidate) = body.candidates.first() else {
            let block_reason = body
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "none given".to_string());
            return Err(ApiError::Decode(format!("no candidates returned (block reason: {block_reason})")));
        };

        let finish_reason = candidate.finish_reason.clone();
        let text = candidate.text().ok_or_else(|| {
            ApiError::Decode(format!(
                "candidate contained no text (finish reason: {})",
                finish_reason.as_deref().unwrap_or("unknown")
            ))
        })?;

        Ok(GenerateResponse {
            text,
            finish_reason,
            usage: body.usage_metadata.map(Into::into),
        })
    }
}

#[async_trait]
impl CacheStore for GeminiClient {
    #[instrument(skip(self, request), fields(model = %request.model, ttl = %humantime::format_duration(request.ttl)))]
    async fn create_cache(&self, request: &CreateCacheRequest) -> Result<CachedContent, ApiError> {
        let body = CreateCachedContent {
            model: normalize_model_name(&request.model),
            display_name: request.display_name.clone(),
            system_instruction: request.system_instruction.as_deref().map(Content::instruction),
            contents: vec![Content::user(vec![Part::file(&request.file_uri, &request.mime_type)])],
            ttl: format!("{}s", request.ttl.as_secs()),
        };

        let response = self
            .client
            .post(self.api_url("cachedContents")?)
            .header(API_KEY_HEADER, self.api_key.expose())
            .json(&body)
            .send()
            .await?;
        let created: CachedContentResponse = decode(check(response).await?).await?;

        Ok(CachedContent {
            name: created.name,
            model: created.model,
            display_name: created.display_name,
            create_time: created.create_time,
            expire_time: created.expire_time,
        })
    }

    #[instrument(skip(self))]
    async fn delete_cache(&self, name: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.api_url(name)?)
            .header(API_KEY_HEADER, self.api_key.expose())
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
