//! Request and response payloads for the HTTP surface.

use crate::cache::TierKind;
use crate::error::BackendId;
use crate::routing::ComplexityTier;
use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub cache_bypass: Option<bool>,
    #[serde(default)]
    pub stream: Option<bool>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub backend: BackendId,
    pub complexity: ComplexityTier,
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_source: Option<TierKind>,
}

/// Sampling options in Ollama's naming.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub num_predict: Option<u32>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Ollama-compatible `/api/generate` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub options: Option<GenerateOptions>,
}

/// Ollama-compatible `/api/generate` response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub response: String,
    pub done: bool,
    /// Nanoseconds, as Ollama reports durations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
}

/// One or many texts to embed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbeddingInput {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            EmbeddingInput::Single(s) => vec![s],
            EmbeddingInput::Batch(v) => v,
        }
    }
}

/// Accepts Ollama's `prompt` form and the batch `input` form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingsRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub input: Option<EmbeddingInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    pub model: String,
    pub dimensions: usize,
    /// One vector per input, in input order.
    pub embeddings: Vec<Vec<f32>>,
    /// First vector, for clients of the single-prompt form.
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTag {
    pub name: String,
    pub backend: BackendId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagsResponse {
    pub models: Vec<ModelTag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogAnalysisRequest {
    pub logs: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogAnalysisResponse {
    pub analysis: String,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub severity: Severity,
    pub confidence: f32,
    pub cache_hit: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Linux,
    Windows,
    #[serde(alias = "macOS", alias = "mac")]
    Macos,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Linux => "linux",
            Environment::Windows => "windows",
            Environment::Macos => "macos",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    Bash,
    Python,
    Powershell,
}

impl ScriptLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptLanguage::Bash => "bash",
            ScriptLanguage::Python => "python",
            ScriptLanguage::Powershell => "powershell",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptGenerationRequest {
    pub requirement: String,
    pub environment: Environment,
    pub language: ScriptLanguage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptResponse {
    pub script: String,
    pub language: ScriptLanguage,
    pub environment: Environment,
    pub explanation: String,
    pub safety_warnings: Vec<String>,
    pub cache_hit: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub uptime_seconds: u64,
    pub version: String,
}

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Error body plus the HTTP status it should be sent with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{status} {}", .body.error)]
pub struct ApiError {
    pub status: u16,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn not_ready(details: impl Into<String>) -> Self {
        Self {
            status: 503,
            body: ErrorResponse {
                error: "Service not ready".to_string(),
                code: "E3002".to_string(),
                details: Some(details.into()),
            },
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let summary = match &e {
            Error::InvalidInput { .. } => "Invalid request",
            Error::RateLimited { .. } => "Rate limit exceeded",
            Error::GenerationFailed(_) => "Generation failed",
            Error::BackendUnavailable { .. } => "Backend unavailable",
            Error::Timeout { .. } => "Request timed out",
            Error::CacheTierUnavailable { .. } => "Cache unavailable",
            _ => "Internal error",
        };
        Self {
            status: e.status_code(),
            body: ErrorResponse {
                error: summary.to_string(),
                code: e.code().to_string(),
                details: Some(e.to_string()),
            },
        }
    }
}
