//! Generation request types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prompt family of a request.
///
/// The kind is part of the cache key and feeds the complexity analyzer's
/// request-shape signal (structured tasks weigh heavier than chat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Chat,
    Completion,
    LogAnalysis,
    ScriptGeneration,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Chat => "chat",
            RequestKind::Completion => "completion",
            RequestKind::LogAnalysis => "log_analysis",
            RequestKind::ScriptGeneration => "script_generation",
        }
    }

    pub fn is_structured_task(&self) -> bool {
        matches!(self, RequestKind::LogAnalysis | RequestKind::ScriptGeneration)
    }
}

/// Sampling parameters. Every field takes part in cache-key derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 2048,
            seed: None,
        }
    }
}

/// One logical generation request as seen by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub kind: RequestKind,
    /// User-visible prompt text (already rendered for domain-specific kinds).
    pub prompt: String,
    /// Optional system instruction sent alongside the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Requested model; `None` lets the router pick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub params: GenerationParams,
    /// Echoed back to the caller; never part of the cache key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<Uuid>,
    /// Optional token that partitions the cache (e.g. per conversation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_scope: Option<String>,
    /// Skip cache lookup and write-back for this request.
    #[serde(default)]
    pub cache_bypass: bool,
}

impl GenerationRequest {
    pub fn new(kind: RequestKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            system: None,
            model: None,
            params: GenerationParams::default(),
            conversation_id: None,
            cache_scope: None,
            cache_bypass: false,
        }
    }

    pub fn chat(prompt: impl Into<String>) -> Self {
        Self::new(RequestKind::Chat, prompt)
    }

    pub fn completion(prompt: impl Into<String>) -> Self {
        Self::new(RequestKind::Completion, prompt)
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.params.max_tokens = max_tokens;
        self
    }

    pub fn with_conversation(mut self, id: Uuid) -> Self {
        self.conversation_id = Some(id);
        self
    }

    pub fn with_cache_scope(mut self, scope: impl Into<String>) -> Self {
        self.cache_scope = Some(scope.into());
        self
    }

    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.cache_bypass = bypass;
        self
    }
}
