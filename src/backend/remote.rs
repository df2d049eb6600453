//! OpenAI-compatible remote chat provider.

use super::{transport_error, trim_base_url, BackendRequest, ChunkStream, GenerationBackend, HttpSettings};
use crate::error::BackendId;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Remote backend for `POST {base}/chat/completions`.
///
/// Responses are requested non-streaming and delivered as a single chunk.
/// Status mapping: 429 and 5xx mean the provider is unavailable (the caller may
/// fall back); any other non-success status, or a reply without content, is a
/// failed generation.
pub struct RemoteChatBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl RemoteChatBackend {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
        settings: &HttpSettings,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::configuration("remote API key must not be empty"));
        }
        Ok(Self {
            client: settings.build_client()?,
            base_url: trim_base_url(base_url),
            api_key,
            model: default_model.into(),
            timeout: settings.timeout,
        })
    }

    fn body(request: &BackendRequest) -> serde_json::Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));
        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.params.temperature,
            "top_p": request.params.top_p,
            "max_tokens": request.params.max_tokens,
        });
        if let Some(seed) = request.params.seed {
            body["seed"] = json!(seed);
        }
        body
    }

    /// Chat-completion text, or `None` when the provider answered without any.
    fn extract_content(value: &serde_json::Value) -> Option<String> {
        value
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    }

    async fn complete(&self, request: &BackendRequest) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| transport_error(BackendId::Remote, "chat completion", self.timeout, e))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(resp.headers().get(RETRY_AFTER));
            warn!(retry_after_ms = ?retry_after.map(|d| d.as_millis()), "remote provider rate limited");
            return Err(Error::BackendUnavailable {
                backend: BackendId::Remote,
                message: "provider rate limit reached".into(),
                retry_after,
            });
        }
        if status.is_server_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::backend_unavailable(
                BackendId::Remote,
                format!("provider returned {}: {}", status, text),
            ));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::GenerationFailed(format!(
                "provider rejected request ({}): {}",
                status, text
            )));
        }

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| transport_error(BackendId::Remote, "chat completion body", self.timeout, e))?;
        Self::extract_content(&value)
            .ok_or_else(|| Error::GenerationFailed("remote provider returned no content".into()))
    }
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[async_trait]
impl GenerationBackend for RemoteChatBackend {
    fn id(&self) -> BackendId {
        BackendId::Remote
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: BackendRequest) -> Result<ChunkStream> {
        debug!(model = %request.model, "remote chat completion");
        let content = self.complete(&request).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(content) })))
    }

    async fn ready(&self) -> bool {
        match self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
