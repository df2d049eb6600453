use super::prompts::{
    extract_findings, log_analysis_prompt, script_prompt, split_script_reply, CHAT_SYSTEM_PROMPT,
    LOG_ANALYSIS_SYSTEM_PROMPT, SCRIPT_SYSTEM_PROMPT,
};
use super::types::*;
use crate::backend::OllamaBackend;
use crate::config::OrchestratorConfig;
use crate::embeddings::{Embedder, HashingEmbedder, DEFAULT_DIMENSIONS};
use crate::orchestrator::Orchestrator;
use crate::resilience::RateLimiter;
use crate::stats::StatsSnapshot;
use crate::types::{GenerationParams, GenerationRequest, RequestKind, StreamEvent};
use crate::{Error, ErrorContext, Result};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound accepted for `max_tokens` / `num_predict`.
const MAX_TOKENS_LIMIT: u32 = 32_768;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Newline-delimited JSON body; every item is one complete line.
pub type NdjsonStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Transport-agnostic implementation of every HTTP endpoint.
///
/// An HTTP layer only has to decode the body, call the matching method and
/// encode either the payload (200) or `ApiError::body` with `ApiError::status`.
pub struct ApiService {
    orchestrator: Orchestrator,
    embedder: Arc<dyn Embedder>,
    admission: RateLimiter,
    defaults: GenerationParams,
    max_prompt_chars: usize,
    started: Instant,
}

impl ApiService {
    pub fn new(orchestrator: Orchestrator, embedder: Arc<dyn Embedder>, config: &OrchestratorConfig) -> Self {
        Self {
            orchestrator,
            embedder,
            admission: RateLimiter::new(config.security.admission_limits()),
            defaults: config.generation.params(),
            max_prompt_chars: config.security.max_prompt_chars,
            started: Instant::now(),
        }
    }

    /// Build the orchestrator and embedder from configuration.
    ///
    /// Embeddings come from the local backend when an embedding model is
    /// configured, otherwise from the offline hashing embedder.
    pub fn from_config(config: OrchestratorConfig) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = match &config.local.embedding_model {
            Some(model) => Arc::new(
                OllamaBackend::new(&config.local.base_url, config.local.model.clone(), &config.local_http())?
                    .with_embedding_model(model.clone()),
            ),
            None => Arc::new(HashingEmbedder::new(DEFAULT_DIMENSIONS)?),
        };
        let orchestrator = Orchestrator::builder(config.clone()).build()?;
        info!(embedder = embedder.name(), "api service ready");
        Ok(Self::new(orchestrator, embedder, &config))
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// `POST /api/chat`
    pub async fn chat(&self, req: ChatRequest) -> ApiResult<ChatResponse> {
        self.admit().await?;
        let conversation_id = req.conversation_id.unwrap_or_else(Uuid::new_v4);
        let request = self.chat_request(&req, conversation_id)?;
        let out = self.orchestrator.handle(request).await?;
        Ok(ChatResponse {
            response: out.response.content,
            conversation_id,
            timestamp: Utc::now(),
            model: out.response.model,
            backend: out.response.backend,
            complexity: out.response.complexity,
            cache_hit: out.cache_hit,
            cache_source: out.cache_tier,
        })
    }

    /// `POST /api/chat` with `stream: true`: one [`StreamEvent`] per line.
    pub async fn chat_stream(&self, req: ChatRequest) -> ApiResult<NdjsonStream> {
        self.admit().await?;
        let conversation_id = req.conversation_id.unwrap_or_else(Uuid::new_v4);
        let request = self.chat_request(&req, conversation_id)?;
        let events = self.orchestrator.handle_stream(request).await?;
        Ok(Box::pin(events.map(|event| ndjson_line(&event))))
    }

    /// `POST /api/generate`
    pub async fn generate(&self, req: GenerateRequest) -> ApiResult<GenerateResponse> {
        self.admit().await?;
        let request = self.completion_request(&req)?;
        let out = self.orchestrator.handle(request).await?;
        Ok(GenerateResponse {
            model: out.response.model,
            created_at: Utc::now(),
            response: out.response.content,
            done: true,
            total_duration: Some(u64::try_from(out.latency.as_nanos()).unwrap_or(u64::MAX)),
            cache_hit: Some(out.cache_hit),
        })
    }

    /// `POST /api/generate` with `stream: true`, in Ollama's line format.
    ///
    /// Partial lines carry the requested (or local default) model name; the
    /// final `done` line carries the model that actually answered.
    pub async fn generate_stream(&self, req: GenerateRequest) -> ApiResult<NdjsonStream> {
        self.admit().await?;
        let request = self.completion_request(&req)?;
        let label = request
            .model
            .clone()
            .unwrap_or_else(|| self.orchestrator.local_backend().model().to_string());
        let events = self.orchestrator.handle_stream(request).await?;
        Ok(Box::pin(events.map(move |event| match event {
            StreamEvent::Delta { content } => ndjson_line(&GenerateResponse {
                model: label.clone(),
                created_at: Utc::now(),
                response: content,
                done: false,
                total_duration: None,
                cache_hit: None,
            }),
            StreamEvent::Done { cache_hit, model, .. } => ndjson_line(&GenerateResponse {
                model,
                created_at: Utc::now(),
                response: String::new(),
                done: true,
                total_duration: None,
                cache_hit: Some(cache_hit),
            }),
            StreamEvent::Error { code, message } => ndjson_line(&ErrorResponse {
                error: message,
                code,
                details: None,
            }),
        })))
    }

    /// `POST /api/embeddings`
    pub async fn embeddings(&self, req: EmbeddingsRequest) -> ApiResult<EmbeddingsResponse> {
        self.admit().await?;
        let inputs = match (req.input, req.prompt) {
            (Some(input), _) => input.into_vec(),
            (None, Some(prompt)) => vec![prompt],
            (None, None) => Vec::new(),
        };
        if inputs.is_empty() {
            return Err(invalid("input", "either `prompt` or `input` is required").into());
        }
        for text in &inputs {
            self.check_text("input", text)?;
        }
        let embeddings = self.embedder.embed_batch(&inputs).await?;
        let embedding = embeddings.first().cloned().unwrap_or_default();
        Ok(EmbeddingsResponse {
            model: self.embedder.name().to_string(),
            dimensions: embedding.len(),
            embeddings,
            embedding,
        })
    }

    /// `GET /api/tags`
    pub async fn tags(&self) -> TagsResponse {
        let models = self
            .orchestrator
            .models()
            .await
            .into_iter()
            .map(|(backend, name)| ModelTag { name, backend })
            .collect();
        TagsResponse { models }
    }

    /// `GET /api/version`
    pub fn version(&self) -> VersionResponse {
        VersionResponse {
            version: VERSION.to_string(),
        }
    }

    /// `POST /api/analyze-logs`
    pub async fn analyze_logs(&self, req: LogAnalysisRequest) -> ApiResult<LogAnalysisResponse> {
        self.admit().await?;
        self.check_text("logs", &req.logs)?;
        let request = GenerationRequest::new(
            RequestKind::LogAnalysis,
            log_analysis_prompt(&req.logs, req.context.as_deref()),
        )
        .with_system(LOG_ANALYSIS_SYSTEM_PROMPT)
        .with_params(self.defaults.clone());
        let out = self.orchestrator.handle(request).await?;
        let findings = extract_findings(&out.response.content);
        debug!(
            issues = findings.issues.len(),
            severity = ?findings.severity,
            "log analysis extracted"
        );
        Ok(LogAnalysisResponse {
            analysis: out.response.content,
            issues: findings.issues,
            recommendations: findings.recommendations,
            severity: findings.severity,
            confidence: findings.confidence,
            cache_hit: out.cache_hit,
            timestamp: Utc::now(),
        })
    }

    /// `POST /api/generate-script`
    pub async fn generate_script(&self, req: ScriptGenerationRequest) -> ApiResult<ScriptResponse> {
        self.admit().await?;
        self.check_text("requirement", &req.requirement)?;
        let request = GenerationRequest::new(
            RequestKind::ScriptGeneration,
            script_prompt(&req.requirement, req.environment, req.language),
        )
        .with_system(SCRIPT_SYSTEM_PROMPT)
        .with_params(self.defaults.clone());
        let out = self.orchestrator.handle(request).await?;
        let parts = split_script_reply(&out.response.content);
        Ok(ScriptResponse {
            script: parts.script,
            language: req.language,
            environment: req.environment,
            explanation: parts.explanation,
            safety_warnings: parts.safety_warnings,
            cache_hit: out.cache_hit,
            timestamp: Utc::now(),
        })
    }

    /// `GET /api/stats`
    pub fn stats(&self) -> StatsSnapshot {
        self.orchestrator.stats()
    }

    /// `GET /api/health`: liveness. Always answers; `model_loaded` reports
    /// whether the local backend is reachable.
    pub async fn health(&self) -> HealthResponse {
        let model_loaded = self.orchestrator.ready().await;
        HealthResponse {
            status: if model_loaded { "healthy" } else { "degraded" }.to_string(),
            model_loaded,
            uptime_seconds: self.started.elapsed().as_secs(),
            version: VERSION.to_string(),
        }
    }

    /// `GET /api/ready`: 503 until the local backend can serve.
    pub async fn ready(&self) -> ApiResult<HealthResponse> {
        let health = self.health().await;
        if !health.model_loaded {
            return Err(ApiError::not_ready(format!(
                "local model {} is not available",
                self.orchestrator.local_backend().model()
            )));
        }
        Ok(HealthResponse {
            status: "ready".to_string(),
            ..health
        })
    }

    async fn admit(&self) -> ApiResult<()> {
        if self.admission.try_acquire().await {
            return Ok(());
        }
        let retry_after = self.admission.retry_after().await;
        debug!(retry_after_ms = ?retry_after.map(|d| d.as_millis()), "request rejected by admission limit");
        Err(Error::RateLimited { retry_after }.into())
    }

    fn check_text(&self, field: &str, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(invalid(field, "must not be empty"));
        }
        let chars = text.chars().count();
        if chars > self.max_prompt_chars {
            return Err(Error::invalid_input_with_context(
                "input too long",
                ErrorContext::new()
                    .with_field_path(field)
                    .with_details(format!("{} chars, limit {}", chars, self.max_prompt_chars))
                    .with_source("api_validation"),
            ));
        }
        Ok(())
    }

    fn chat_request(&self, req: &ChatRequest, conversation_id: Uuid) -> Result<GenerationRequest> {
        self.check_text("message", &req.message)?;
        let mut params = self.defaults.clone();
        if let Some(t) = req.temperature {
            params.temperature = t;
        }
        if let Some(m) = req.max_tokens {
            params.max_tokens = m;
        }
        check_params(&params)?;
        let mut request = GenerationRequest::chat(req.message.clone())
            .with_system(CHAT_SYSTEM_PROMPT)
            .with_params(params)
            .with_conversation(conversation_id)
            .bypass_cache(req.cache_bypass.unwrap_or(false));
        if let Some(model) = req.model.as_deref().filter(|m| !m.trim().is_empty()) {
            request = request.with_model(model);
        }
        Ok(request)
    }

    fn completion_request(&self, req: &GenerateRequest) -> Result<GenerationRequest> {
        self.check_text("prompt", &req.prompt)?;
        let mut params = self.defaults.clone();
        if let Some(opts) = &req.options {
            if let Some(t) = opts.temperature {
                params.temperature = t;
            }
            if let Some(p) = opts.top_p {
                params.top_p = p;
            }
            if let Some(n) = opts.num_predict {
                params.max_tokens = n;
            }
            params.seed = opts.seed;
        }
        check_params(&params)?;
        let mut request = GenerationRequest::completion(req.prompt.clone()).with_params(params);
        if let Some(system) = req.system.as_deref().filter(|s| !s.trim().is_empty()) {
            request = request.with_system(system);
        }
        if let Some(model) = req.model.as_deref().filter(|m| !m.trim().is_empty()) {
            request = request.with_model(model);
        }
        Ok(request)
    }
}

fn invalid(field: &str, message: &str) -> Error {
    Error::invalid_input_with_context(
        format!("{} {}", field, message),
        ErrorContext::new()
            .with_field_path(field)
            .with_source("api_validation"),
    )
}

fn check_params(params: &GenerationParams) -> Result<()> {
    if !(0.0..=2.0).contains(&params.temperature) {
        return Err(invalid("temperature", "must be within [0, 2]"));
    }
    if !(params.top_p > 0.0 && params.top_p <= 1.0) {
        return Err(invalid("top_p", "must be within (0, 1]"));
    }
    if params.max_tokens == 0 || params.max_tokens > MAX_TOKENS_LIMIT {
        return Err(invalid("max_tokens", "must be within [1, 32768]"));
    }
    Ok(())
}

fn ndjson_line<T: Serialize>(value: &T) -> Bytes {
    let mut line = serde_json::to_vec(value).unwrap_or_else(|e| {
        serde_json::json!({ "event_type": "error", "code": "E9999", "message": e.to_string() })
            .to_string()
            .into_bytes()
    });
    line.push(b'\n');
    Bytes::from(line)
}
