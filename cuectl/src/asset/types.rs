//! Core types for remote assets.
//!
//! A document uploaded to the provider's file store is tracked with the typestate pattern:
//! `Asset<Processing>` right after upload, then `Asset<Active>` or `Asset<Failed>` once the
//! provider reports a terminal state. Only `Asset<Active>` can be handed to generation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Processing state of a remote asset, as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetState {
    #[serde(alias = "READY")]
    Active,
    Failed,
    /// Still being processed. `STATE_UNSPECIFIED` and unknown states poll like this one.
    #[default]
    #[serde(alias = "PENDING", other)]
    Processing,
}

impl AssetState {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, AssetState::Active | AssetState::Failed)
    }
}

impl fmt::Display for AssetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetState::Processing => "PROCESSING",
            AssetState::Active => "ACTIVE",
            AssetState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Error detail attached to a file the provider failed to process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct FileStatus {
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A file resource as held by the provider's file store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Opaque identifier assigned by the store, e.g. `files/abc-123`
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    /// Int64 values are encoded as strings on the wire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<String>,
    /// Content reference used by generation requests
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub state: AssetState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FileStatus>,
}

impl RemoteFile {
    pub fn size(&self) -> Option<u64> {
        self.size_bytes.as_deref().and_then(|s| s.parse().ok())
    }

    /// Provider supplied reason for a FAILED file.
    pub fn failure_reason(&self) -> String {
        self.error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| "provider reported FAILED without detail".to_string())
    }
}

/// Marker trait for valid asset states.
pub trait AssetLifecycle: Send + Sync {}

/// A document held by the provider, in lifecycle state `T`.
#[derive(Debug, Clone)]
pub struct Asset<T: AssetLifecycle> {
    pub state: T,
    /// The provider's view of the file as of the last fetch
    pub file: RemoteFile,
}

impl<T: AssetLifecycle> Asset<T> {
    pub fn id(&self) -> &str {
        &self.file.name
    }

    pub fn uri(&self) -> &str {
        &self.file.uri
    }

    pub fn mime_type(&self) -> &str {
        &self.file.mime_type
    }
}

/// Uploaded and not yet observed in a terminal state.
#[derive(Debug, Clone)]
pub struct Processing {
    pub submitted_at: DateTime<Utc>,
    /// Status queries issued so far
    pub polls: u32,
}

impl AssetLifecycle for Processing {}

/// Ready for use in generation requests.
#[derive(Debug, Clone)]
pub struct Active {
    pub ready_at: DateTime<Utc>,
}

impl AssetLifecycle for Active {}

/// The provider gave up processing the file.
#[derive(Debug, Clone)]
pub struct Failed {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl AssetLifecycle for Failed {}

/// Enum that can hold an asset in any state.
#[derive(Debug, Clone)]
pub enum AnyAsset {
    Processing(Asset<Processing>),
    Active(Asset<Active>),
    Failed(Asset<Failed>),
}

impl AnyAsset {
    /// Place a freshly fetched file into the typed state matching what the provider reports.
    pub fn from_remote(file: RemoteFile, submitted_at: DateTime<Utc>, polls: u32) -> Self {
        match file.state {
            AssetState::Processing => AnyAsset::Processing(Asset {
                state: Processing { submitted_at, polls },
                file,
            }),
            AssetState::Active => AnyAsset::Active(Asset {
                state: Active { ready_at: Utc::now() },
                file,
            }),
            AssetState::Failed => AnyAsset::Failed(Asset {
                state: Failed {
                    reason: file.failure_reason(),
                    failed_at: Utc::now(),
                },
                file,
            }),
        }
    }

    pub fn state(&self) -> AssetState {
        match self {
            AnyAsset::Processing(_) => AssetState::Processing,
            AnyAsset::Active(_) => AssetState::Active,
            AnyAsset::Failed(_) => AssetState::Failed,
        }
    }
}

/// Accept a file obtained elsewhere (e.g. a stored handle) for generation only if it is ACTIVE.
impl TryFrom<RemoteFile> for Asset<Active> {
    type Error = Error;

    fn try_from(file: RemoteFile) -> Result<Self, Self::Error> {
        match file.state {
            AssetState::Active => Ok(Asset {
                state: Active { ready_at: Utc::now() },
                file,
            }),
            state => Err(Error::AssetNotReady {
                asset_id: file.name,
                state,
            }),
        }
    }
}
