//! Scripted in-memory provider for tests.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::asset::{AssetState, FileStatus, RemoteFile};
use crate::cache::{CachedContent, CreateCacheRequest};
use crate::errors::ApiError;
use crate::generation::{GenerateRequest, GenerateResponse};
use crate::provider::{CacheStore, ContentGenerator, FileStore, FileUpload};

/// Record of a call made to the mock provider.
#[derive(Debug, Clone)]
pub enum MockCall {
    Upload { display_name: String, mime_type: String, size: usize },
    Get { name: String },
    Delete { name: String },
    Generate(GenerateRequest),
    CreateCache(CreateCacheRequest),
    DeleteCache { name: String },
}

#[derive(Default)]
struct MockState {
    files: HashMap<String, RemoteFile>,
    poll_script: VecDeque<Result<AssetState, ApiError>>,
    upload_failures: VecDeque<ApiError>,
    generations: VecDeque<Result<String, ApiError>>,
    cache_failures: VecDeque<ApiError>,
    calls: Vec<MockCall>,
}

/// Provider double with FIFO scripted responses.
///
/// Uploads always succeed (unless a failure is queued) and create a new PROCESSING file.
/// Status queries consume the poll script; once it is empty a file keeps its last state.
/// Generation consumes scripted results, then echoes the prompt.
#[derive(Clone, Default)]
pub struct MockProvider {
    inner: Arc<Mutex<MockState>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// States reported by successive status queries.
    pub fn push_states(&self, states: impl IntoIterator<Item = AssetState>) {
        self.inner.lock().poll_script.extend(states.into_iter().map(Ok));
    }

    pub fn push_poll_error(&self, err: ApiError) {
        self.inner.lock().poll_script.push_back(Err(err));
    }

    pub fn fail_next_upload(&self, err: ApiError) {
        self.inner.lock().upload_failures.push_back(err);
    }

    pub fn push_generation(&self, result: Result<String, ApiError>) {
        self.inner.lock().generations.push_back(result);
    }

    pub fn fail_next_cache(&self, err: ApiError) {
        self.inner.lock().cache_failures.push_back(err);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.inner.lock().calls.clone()
    }

    pub fn upload_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Upload { .. }))
    }

    pub fn poll_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Get { .. }))
    }

    pub fn generate_requests(&self) -> Vec<GenerateRequest> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Generate(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_files(&self) -> Vec<String> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Delete { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_caches(&self) -> Vec<String> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::DeleteCache { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.inner.lock().calls.iter().filter(|c| predicate(c)).count()
    }
}

fn not_found(name: &str) -> ApiError {
    ApiError::Status {
        status: 404,
        message: format!("{name} not found"),
        reason: None,
    }
}

#[async_trait]
impl FileStore for MockProvider {
    async fn upload(&self, upload: FileUpload) -> Result<RemoteFile, ApiError> {
        let mut state = self.inner.lock();
        state.calls.push(MockCall::Upload {
            display_name: upload.display_name.clone(),
            mime_type: upload.mime_type.clone(),
            size: upload.bytes.len(),
        });

        if let Some(err) = state.upload_failures.pop_front() {
            return Err(err);
        }

        let name = format!("files/{}", Uuid::new_v4().simple());
        let file = RemoteFile {
            uri: format!("https://mock.invalid/v1beta/{name}"),
            name: name.clone(),
            display_name: Some(upload.display_name),
            mime_type: upload.mime_type,
            size_bytes: Some(upload.bytes.len().to_string()),
            state: AssetState::Processing,
            create_time: Some(Utc::now()),
            update_time: None,
            expiration_time: None,
            sha256_hash: None,
            error: None,
        };
        state.files.insert(name, file.clone());
        Ok(file)
    }

    async fn get(&self, name: &str) -> Result<RemoteFile, ApiError> {
        let mut state = self.inner.lock();
        state.calls.push(MockCall::Get { name: name.to_string() });

        let next = state.poll_script.pop_front();
        let file = state.files.get_mut(name).ok_or_else(|| not_found(name))?;
        match next {
            Some(Err(err)) => return Err(err),
            Some(Ok(new_state)) => {
                file.state = new_state;
                if new_state == AssetState::Failed {
                    file.error = Some(FileStatus {
                        code: Some(13),
                        message: Some("mock processing failure".to_string()),
                    });
                }
            }
            None => {}
        }
        Ok(file.clone())
    }

    async fn delete(&self, name: &str) -> Result<(), ApiError> {
        let mut state = self.inner.lock();
        state.calls.push(MockCall::Delete { name: name.to_string() });
        state.files.remove(name).map(|_| ()).ok_or_else(|| not_found(name))
    }
}

#[async_trait]
impl ContentGenerator for MockProvider {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ApiError> {
        let mut state = self.inner.lock();
        state.calls.push(MockCall::Generate(request.clone()));

        let text = match state.generations.pop_front() {
            Some(result) => result?,
            None => format!("response to: {}", request.prompt),
        };
        Ok(GenerateResponse {
            text,
            finish_reason: Some("STOP".to_string()),
            usage: None,
        })
    }
}

#[async_trait]
impl CacheStore for MockProvider {
    async fn create_cache(&self, request: &CreateCacheRequest) -> Result<CachedContent, ApiError> {
        let mut state = self.inner.lock();
        state.calls.push(MockCall::CreateCache(request.clone()));

        if let Some(err) = state.cache_failures.pop_front() {
            return Err(err);
        }

        let now = Utc::now();
        let ttl = chrono::Duration::from_std(request.ttl).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(CachedContent {
            name: format!("cachedContents/{}", Uuid::new_v4().simple()),
            model: request.model.clone(),
            display_name: Some(request.display_name.clone()),
            create_time: Some(now),
            expire_time: now + ttl,
        })
    }

    async fn delete_cache(&self, name: &str) -> Result<(), ApiError> {
        self.inner.lock().calls.push(MockCall::DeleteCache { name: name.to_string() });
        Ok(())
    }
}

/// Write a minimal PDF into `dir` and return its path.
pub fn write_document(dir: &tempfile::TempDir, file_name: &str) -> PathBuf {
    let path = dir.path().join(file_name);
    std::fs::write(&path, b"%PDF-1.4\n1 0 obj<</Type/Catalog>>endobj\ntrailer<</Root 1 0 R>>\n%%EOF\n")
        .expect("Failed to write test document");
    path
}
