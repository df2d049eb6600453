//! Ollama-compatible local inference server.

use super::{transport_error, trim_base_url, BackendRequest, ChunkStream, GenerationBackend, HttpSettings};
use crate::embeddings::Embedder;
use crate::error::BackendId;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tracing::debug;

const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Local backend speaking the Ollama HTTP API.
///
/// Generations stream as newline-delimited JSON objects; each carries a
/// `response` fragment and the last one has `done: true`. A body that ends
/// without the `done` line is reported as a failed generation so the partial
/// text never reaches the cache.
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    embedding_model: String,
    context_length: Option<u32>,
    timeout: Duration,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: impl Into<String>, settings: &HttpSettings) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(Error::configuration("local model name must not be empty"));
        }
        Ok(Self {
            client: settings.build_client()?,
            base_url: trim_base_url(base_url),
            embedding_model: model.clone(),
            model,
            context_length: None,
            timeout: settings.timeout,
        })
    }

    pub fn with_context_length(mut self, tokens: u32) -> Self {
        self.context_length = (tokens > 0).then_some(tokens);
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn generate_body(&self, request: &BackendRequest) -> serde_json::Value {
        let mut options = json!({
            "temperature": request.params.temperature,
            "top_p": request.params.top_p,
            "num_predict": request.params.max_tokens,
        });
        if let Some(ctx) = self.context_length {
            options["num_ctx"] = json!(ctx);
        }
        if let Some(seed) = request.params.seed {
            options["seed"] = json!(seed);
        }
        let mut body = json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": true,
            "options": options,
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        body
    }

    async fn fetch_tags(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| transport_error(BackendId::Local, "tags", self.timeout, e))?;
        if !resp.status().is_success() {
            return Err(Error::backend_unavailable(
                BackendId::Local,
                format!("tags returned {}", resp.status()),
            ));
        }
        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| transport_error(BackendId::Local, "tags", self.timeout, e))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

fn line_error(err: LinesCodecError, after: Duration) -> Error {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            Error::GenerationFailed("stream line exceeds maximum length".into())
        }
        LinesCodecError::Io(e) => {
            let timed_out = e
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
                .map(|r| r.is_timeout())
                .unwrap_or(false);
            if timed_out {
                Error::timeout("local generation stream", after)
            } else {
                Error::backend_unavailable(BackendId::Local, format!("stream interrupted: {}", e))
            }
        }
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn id(&self) -> BackendId {
        BackendId::Local
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: BackendRequest) -> Result<ChunkStream> {
        let body = self.generate_body(&request);
        debug!(model = %request.model, prompt_chars = request.prompt.len(), "local generate");
        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(BackendId::Local, "generate", self.timeout, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                Error::backend_unavailable(BackendId::Local, format!("generate returned {}: {}", status, text))
            } else {
                Error::GenerationFailed(format!("local backend rejected request ({}): {}", status, text))
            });
        }

        let bytes = resp
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let lines = FramedRead::new(
            StreamReader::new(bytes),
            LinesCodec::new_with_max_length(MAX_LINE_BYTES),
        );
        let after = self.timeout;

        let chunks = futures::stream::unfold(Some(lines), move |state| async move {
            let mut lines = state?;
            loop {
                let line = match lines.next().await {
                    None => {
                        return Some((
                            Err(Error::GenerationFailed("stream ended before completion".into())),
                            None,
                        ))
                    }
                    Some(Err(e)) => return Some((Err(line_error(e, after)), None)),
                    Some(Ok(line)) => line,
                };
                if line.trim().is_empty() {
                    continue;
                }
                let parsed: GenerateLine = match serde_json::from_str(line.trim()) {
                    Ok(p) => p,
                    Err(e) => {
                        return Some((
                            Err(Error::GenerationFailed(format!("malformed stream line: {}", e))),
                            None,
                        ))
                    }
                };
                if let Some(message) = parsed.error {
                    return Some((Err(Error::GenerationFailed(message)), None));
                }
                if parsed.done {
                    if parsed.response.is_empty() {
                        return None;
                    }
                    return Some((Ok(parsed.response), None));
                }
                if !parsed.response.is_empty() {
                    return Some((Ok(parsed.response), Some(lines)));
                }
            }
        });
        Ok(Box::pin(chunks))
    }

    async fn ready(&self) -> bool {
        self.fetch_tags().await.is_ok()
    }

    async fn models(&self) -> Result<Vec<String>> {
        let mut models = self.fetch_tags().await?;
        if !models.iter().any(|m| m == &self.model) {
            models.insert(0, self.model.clone());
        }
        Ok(models)
    }
}

#[async_trait]
impl Embedder for OllamaBackend {
    fn name(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let resp = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&json!({ "model": self.embedding_model, "prompt": text }))
            .send()
            .await
            .map_err(|e| transport_error(BackendId::Local, "embeddings", self.timeout, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::backend_unavailable(
                BackendId::Local,
                format!("embeddings returned {}", status),
            ));
        }
        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| transport_error(BackendId::Local, "embeddings", self.timeout, e))?;
        if parsed.embedding.is_empty() {
            return Err(Error::GenerationFailed("empty embedding".into()));
        }
        Ok(parsed.embedding)
    }
}
