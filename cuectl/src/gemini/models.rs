//! Wire types for the Gemini `v1beta` REST API.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::RemoteFile;
use crate::generation::{ContentSource, GenerateRequest, TokenUsage};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStart<'a> {
    pub file: UploadMetadata<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata<'a> {
    pub display_name: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub file: RemoteFile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn instruction(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }

    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
}

impl Part {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    pub fn file(uri: &str, mime_type: &str) -> Self {
        Self {
            file_data: Some(FileData {
                mime_type: mime_type.to_string(),
                file_uri: uri.to_string(),
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_content: Option<String>,
}

impl From<&GenerateRequest> for GenerateContentRequest {
    fn from(request: &GenerateRequest) -> Self {
        let system_instruction = request.system_instruction.as_deref().map(Content::instruction);
        match &request.source {
            ContentSource::File { uri, mime_type } => Self {
                system_instruction,
                contents: vec![Content::user(vec![Part::text(&request.prompt), Part::file(uri, mime_type)])],
                cached_content: None,
            },
            ContentSource::Cached { name } => Self {
                system_instruction,
                contents: vec![Content::user(vec![Part::text(&request.prompt)])],
                cached_content: Some(name.clone()),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl Candidate {
    /// Concatenated text of all text parts, or `None` if there are none.
    pub fn text(&self) -> Option<String> {
        let parts = &self.content.as_ref()?.parts;
        let texts: Vec<&str> = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        if texts.is_empty() { None } else { Some(texts.concat()) }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: Option<u32>,
    #[serde(default)]
    pub cached_content_token_count: Option<u32>,
    #[serde(default)]
    pub candidates_token_count: Option<u32>,
    #[serde(default)]
    pub total_token_count: Option<u32>,
}

impl From<UsageMetadata> for TokenUsage {
    fn from(usage: UsageMetadata) -> Self {
        Self {
            prompt_tokens: usage.prompt_token_count,
            cached_content_tokens: usage.cached_content_token_count,
            candidates_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCachedContent {
    pub model: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub contents: Vec<Content>,
    /// Duration in protobuf JSON form, e.g. `"600s"`
    pub ttl: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedContentResponse {
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    pub expire_time: DateTime<Utc>,
}

/// `{"error": {...}}` body returned with non-success statuses.
#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub reason: Option<String>,
}

impl ErrorBody {
    pub fn reason(&self) -> Option<String> {
        self.details.iter().find_map(|d| d.reason.clone())
    }
}
