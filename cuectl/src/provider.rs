//! Capabilities the pipeline needs from a generative-AI provider.
//!
//! The pipeline is written against these traits rather than a concrete client, so the
//! poll loop and query runner can be exercised without network access. See
//! [`GeminiClient`](crate::gemini::GeminiClient) for the production implementation.

use async_trait::async_trait;

use crate::asset::RemoteFile;
use crate::cache::{CachedContent, CreateCacheRequest};
use crate::errors::ApiError;
use crate::generation::{GenerateRequest, GenerateResponse};

/// Document bytes plus the metadata the store needs to accept them.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub display_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Remote file storage.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Send a document to the store. Every call creates a new, distinct file.
    async fn upload(&self, upload: FileUpload) -> Result<RemoteFile, ApiError>;

    /// Fetch the current view of a file. Has no side effects on the remote side.
    async fn get(&self, name: &str) -> Result<RemoteFile, ApiError>;

    async fn delete(&self, name: &str) -> Result<(), ApiError>;
}

/// Text generation over uploaded or cached content.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ApiError>;
}

/// Provider-side context caches with a time to live.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn create_cache(&self, request: &CreateCacheRequest) -> Result<CachedContent, ApiError>;

    async fn delete_cache(&self, name: &str) -> Result<(), ApiError>;
}
