//! 生成后端模块：本地（Ollama 兼容）与远端（OpenAI 兼容）推理服务的统一接口。
//!
//! # Generation Backends
//!
//! A backend turns a [`BackendRequest`] into a lazy, finite, non-restartable
//! [`ChunkStream`] of content chunks. The orchestrator owns assembly: it
//! concatenates chunks and only caches a stream that ran to completion.
//!
//! | Backend | Wire format |
//! |---------|-------------|
//! | [`OllamaBackend`] | `POST /api/generate` NDJSON stream, `/api/tags`, `/api/embeddings` |
//! | [`RemoteChatBackend`] | `POST /chat/completions` with bearer auth, single chunk |

mod ollama;
mod remote;

pub use ollama::OllamaBackend;
pub use remote::RemoteChatBackend;

use crate::error::BackendId;
use crate::types::GenerationParams;
use crate::{BoxStream, Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;

/// Lazy sequence of content chunks produced by a backend.
pub type ChunkStream = BoxStream<'static, String>;

/// What a backend is asked to generate, after routing and enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub model: String,
    pub params: GenerationParams,
}

impl BackendRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            model: model.into(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn id(&self) -> BackendId;

    /// Model used when the route does not name one.
    fn model(&self) -> &str;

    /// Start a generation. Errors before the first chunk are returned here;
    /// errors after that arrive as `Err` items in the stream.
    async fn generate(&self, request: BackendRequest) -> Result<ChunkStream>;

    /// Whether the backend is reachable and able to serve.
    async fn ready(&self) -> bool;

    /// Model identifiers the backend can serve.
    async fn models(&self) -> Result<Vec<String>> {
        Ok(vec![self.model().to_string()])
    }
}

/// Drain a chunk stream into one string.
pub async fn collect(mut stream: ChunkStream) -> Result<String> {
    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        out.push_str(&chunk?);
    }
    Ok(out)
}

/// Connection settings shared by the HTTP backends.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Whole-request timeout, including reading a streamed body.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

impl HttpSettings {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .pool_idle_timeout(Some(self.pool_idle_timeout))
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {}", e)))
    }
}

/// Transport failures: timeouts stay timeouts, everything else means the backend is unreachable.
pub(crate) fn transport_error(backend: BackendId, operation: &str, after: Duration, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::timeout(format!("{} {}", backend, operation), after)
    } else {
        Error::backend_unavailable(backend, format!("{} failed: {}", operation, err))
    }
}

/// Strip trailing slashes so paths can be appended with `format!`.
pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
