use std::path::Path;

use chrono::Utc;

use crate::errors::{Error, Result};
use crate::provider::{FileStore, FileUpload};
use crate::retry::{RetryConfig, retry_transient};

use super::types::{AnyAsset, Asset, Processing, RemoteFile};

/// Infer a MIME type from the file extension, falling back to `application/octet-stream`.
pub fn guess_mime_type(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().essence_str().to_string()
}

impl Asset<Processing> {
    /// Read `path` and send it to the store.
    ///
    /// The returned handle starts in `Processing` whatever the upload response says; the first
    /// poll places it in its real state. Uploads are not retried, since a resubmission creates a
    /// second remote file.
    pub async fn submit<S: FileStore + ?Sized>(
        store: &S,
        path: &Path,
        display_name: Option<&str>,
        mime_type: Option<&str>,
    ) -> Result<Asset<Processing>> {
        let bytes = tokio::fs::read(path).await.map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let display_name = match display_name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string()),
        };
        let mime_type = mime_type.map(str::to_string).unwrap_or_else(|| guess_mime_type(path));

        tracing::info!(
            path = %path.display(),
            size = bytes.len(),
            mime_type = %mime_type,
            "Uploading document"
        );

        let file = store
            .upload(FileUpload {
                display_name,
                mime_type,
                bytes,
            })
            .await
            .map_err(|e| Error::upload(path, e))?;

        tracing::info!(asset_id = %file.name, state = %file.state, "Document uploaded");

        Ok(Asset {
            state: Processing {
                submitted_at: Utc::now(),
                polls: 0,
            },
            file,
        })
    }

    /// Query the store once and move into whichever state it reports.
    pub async fn refresh<S: FileStore + ?Sized>(self, store: &S, retry: &RetryConfig) -> Result<AnyAsset> {
        let file = fetch(store, self.id(), retry).await?;
        let polls = self.state.polls + 1;

        tracing::debug!(asset_id = %file.name, state = %file.state, polls, "Polled asset state");

        Ok(AnyAsset::from_remote(file, self.state.submitted_at, polls))
    }
}

/// Fetch a file, retrying transient failures.
pub(crate) async fn fetch<S: FileStore + ?Sized>(store: &S, asset_id: &str, retry: &RetryConfig) -> Result<RemoteFile> {
    retry_transient(retry, "poll", move || async move {
        store.get(asset_id).await.map_err(|e| Error::poll(asset_id, e))
    })
    .await
}
