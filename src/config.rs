//! 配置模块：默认值 → YAML 文件 → 环境变量覆盖，加载后统一校验。
//!
//! Orchestrator configuration.
//!
//! Load order is defaults, then an optional YAML file named by `AI_ORCH_CONFIG`,
//! then environment overrides. Environment access goes through a lookup
//! function so callers (and tests) decide where variables come from.
//!
//! ```rust
//! use ai_lib_orchestrator::config::OrchestratorConfig;
//!
//! let cfg = OrchestratorConfig::load_with(|name| match name {
//!     "MODEL_NAME" => Some("qwen2.5:7b".to_string()),
//!     _ => None,
//! })
//! .unwrap();
//! assert_eq!(cfg.local.model, "qwen2.5:7b");
//! ```

use crate::backend::HttpSettings;
use crate::cache::{CoordinatorConfig, TtlPolicy};
use crate::resilience::RateLimiterConfig;
use crate::routing::{ComplexityThresholds, ModelInfo};
use crate::types::GenerationParams;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming the YAML config file.
pub const CONFIG_PATH_VAR: &str = "AI_ORCH_CONFIG";

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Ollama-compatible server root.
    pub base_url: String,
    pub model: String,
    /// Context window passed to the local server; 0 leaves the server default.
    pub context_length: u32,
    /// Model used for `/api/embeddings`; `None` uses the offline hashing embedder.
    pub embedding_model: Option<String>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "llama3.2".to_string(),
            context_length: 2048,
            embedding_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    /// Upper bound for one whole generation, first byte to last chunk.
    pub timeout_secs: u64,
}

impl GenerationConfig {
    /// Sampling defaults for requests that do not set their own.
    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            seed: None,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 2048,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Empty disables the remote backend; High-tier requests then stay local.
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    /// Priced catalog entries in addition to the default model.
    pub models: Vec<ModelInfo>,
    /// Remote quota; 0 means unlimited.
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            default_model: "openrouter/auto".to_string(),
            models: Vec::new(),
            requests_per_minute: 60,
            timeout_secs: 60,
            failure_threshold: 5,
            cooldown_secs: 30,
        }
    }
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory_entries: usize,
    pub memory_shards: usize,
    pub memory_ttl_secs: u64,
    pub warm_enabled: bool,
    pub redis_url: String,
    pub redis_max_memory_mb: u64,
    pub redis_ttl_secs: u64,
    pub redis_timeout_ms: u64,
    pub warm_failure_threshold: u32,
    pub warm_cooldown_secs: u64,
    pub sqlite_path: PathBuf,
    pub sqlite_max_size_gb: u64,
    pub sqlite_ttl_days: u64,
    pub cold_timeout_ms: u64,
    pub compaction_interval_secs: u64,
    /// Reserved for near-duplicate matching; only exact keys are served today.
    pub similarity_threshold: f32,
    /// Mixed into every key; changing it orphans all cached entries.
    pub key_salt: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_entries: 512,
            memory_shards: 16,
            memory_ttl_secs: 300,
            warm_enabled: true,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_max_memory_mb: 2048,
            redis_ttl_secs: 3600,
            redis_timeout_ms: 150,
            warm_failure_threshold: 3,
            warm_cooldown_secs: 30,
            sqlite_path: PathBuf::from("data/ai_cache.sqlite"),
            sqlite_max_size_gb: 10,
            sqlite_ttl_days: 30,
            cold_timeout_ms: 1000,
            compaction_interval_secs: 300,
            similarity_threshold: 0.92,
            key_salt: String::new(),
        }
    }
}

impl CacheConfig {
    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            memory: Duration::from_secs(self.memory_ttl_secs),
            warm: Duration::from_secs(self.redis_ttl_secs),
            cold: Duration::from_secs(self.sqlite_ttl_days * 24 * 3600),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            ttl: self.ttl_policy(),
            warm_timeout: Duration::from_millis(self.redis_timeout_ms),
            cold_timeout: Duration::from_millis(self.cold_timeout_ms),
            warm_failure_threshold: self.warm_failure_threshold,
            warm_cooldown: Duration::from_secs(self.warm_cooldown_secs),
        }
    }

    pub fn cold_max_bytes(&self) -> u64 {
        self.sqlite_max_size_gb.saturating_mul(GIB)
    }

    pub fn compaction_interval(&self) -> Duration {
        Duration::from_secs(self.compaction_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub short_max_chars: usize,
    pub medium_max_chars: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let t = ComplexityThresholds::default();
        Self {
            short_max_chars: t.short_max_chars,
            medium_max_chars: t.medium_max_chars,
        }
    }
}

impl RoutingConfig {
    pub fn thresholds(&self) -> ComplexityThresholds {
        ComplexityThresholds {
            short_max_chars: self.short_max_chars,
            medium_max_chars: self.medium_max_chars,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 2000,
            max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// API admission: this many requests per `rate_limit_period_secs`; 0 disables.
    pub rate_limit_requests: u32,
    pub rate_limit_period_secs: u64,
    pub max_prompt_chars: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit_requests: 100,
            rate_limit_period_secs: 3600,
            max_prompt_chars: 32_000,
        }
    }
}

impl SecurityConfig {
    pub fn admission_limits(&self) -> RateLimiterConfig {
        RateLimiterConfig::per_window(
            self.rate_limit_requests,
            Duration::from_secs(self.rate_limit_period_secs),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub local: LocalConfig,
    pub remote: RemoteConfig,
    pub cache: CacheConfig,
    pub routing: RoutingConfig,
    pub search: SearchConfig,
    pub security: SecurityConfig,
    pub generation: GenerationConfig,
}

fn env_error(name: &str, value: &str, expected: &str) -> Error {
    Error::configuration_with_context(
        format!("cannot parse {}={:?}", name, value),
        ErrorContext::new()
            .with_field_path(name)
            .with_details(format!("expected {}", expected))
            .with_source("config_loader"),
    )
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    expected: &str,
) -> Result<Option<T>> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| env_error(name, &raw, expected)),
    }
}

fn out_of_range(field: &str, message: impl Into<String>) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("config_validation"),
    )
}

impl OrchestratorConfig {
    /// Defaults, then `AI_ORCH_CONFIG`, then the process environment.
    pub fn load() -> Result<Self> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// Same as [`OrchestratorConfig::load`] with a custom variable source.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = match lookup(CONFIG_PATH_VAR) {
            Some(path) if !path.trim().is_empty() => Self::from_yaml_file(path.trim())?,
            _ => Self::default(),
        };
        cfg.apply_env_with(&lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid configuration YAML: {}", e),
                ErrorContext::new().with_source("config_loader"),
            )
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read {}: {}", path.display(), e),
                ErrorContext::new()
                    .with_field_path(CONFIG_PATH_VAR)
                    .with_source("config_loader"),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::configuration(e.to_string()))
    }

    /// Copy with secrets masked, for printing.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.remote.is_configured() {
            copy.remote.api_key = "***".to_string();
        }
        copy
    }

    pub fn apply_env_with(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("OLLAMA_BASE_URL") {
            self.local.base_url = v;
        }
        if let Some(v) = lookup("MODEL_NAME") {
            self.local.model = v;
        }
        if let Some(v) = parse_var(lookup, "CONTEXT_LENGTH", "an unsigned integer")? {
            self.local.context_length = v;
        }
        if let Some(v) = lookup("EMBEDDING_MODEL") {
            self.local.embedding_model = Some(v).filter(|s| !s.trim().is_empty());
        }

        if let Some(v) = parse_var(lookup, "TEMPERATURE", "a number")? {
            self.generation.temperature = v;
        }
        if let Some(v) = parse_var(lookup, "TOP_P", "a number")? {
            self.generation.top_p = v;
        }
        if let Some(v) = parse_var(lookup, "MAX_TOKENS", "an unsigned integer")? {
            self.generation.max_tokens = v;
        }
        if let Some(v) = parse_var(lookup, "GENERATION_TIMEOUT_SECS", "seconds")? {
            self.generation.timeout_secs = v;
        }

        if let Some(v) = lookup("OPENROUTER_API_KEY") {
            self.remote.api_key = v;
        }
        if let Some(v) = lookup("OPENROUTER_BASE_URL") {
            self.remote.base_url = v;
        }
        if let Some(v) = lookup("OPENROUTER_DEFAULT_MODEL") {
            self.remote.default_model = v;
        }
        if let Some(v) = parse_var(lookup, "REMOTE_REQUESTS_PER_MINUTE", "an unsigned integer")? {
            self.remote.requests_per_minute = v;
        }

        if let Some(v) = parse_var(lookup, "MEMORY_CACHE_ENTRIES", "an unsigned integer")? {
            self.cache.memory_entries = v;
        }
        if let Some(v) = parse_var(lookup, "MEMORY_TTL_SECONDS", "seconds")? {
            self.cache.memory_ttl_secs = v;
        }
        if let Some(v) = lookup("REDIS_URL") {
            self.cache.warm_enabled = !v.trim().is_empty();
            self.cache.redis_url = v;
        }
        if let Some(v) = parse_var(lookup, "REDIS_MAX_MEMORY_MB", "megabytes")? {
            self.cache.redis_max_memory_mb = v;
        }
        if let Some(v) = parse_var(lookup, "REDIS_TTL_SECONDS", "seconds")? {
            self.cache.redis_ttl_secs = v;
        }
        if let Some(v) = parse_var(lookup, "REDIS_TIMEOUT_MS", "milliseconds")? {
            self.cache.redis_timeout_ms = v;
        }
        if let Some(v) = lookup("SQLITE_PATH") {
            self.cache.sqlite_path = PathBuf::from(v);
        }
        if let Some(v) = parse_var(lookup, "SQLITE_MAX_SIZE_GB", "gigabytes")? {
            self.cache.sqlite_max_size_gb = v;
        }
        if let Some(v) = parse_var(lookup, "SQLITE_TTL_DAYS", "days")? {
            self.cache.sqlite_ttl_days = v;
        }
        if let Some(v) = parse_var(lookup, "COMPACTION_INTERVAL_SECS", "seconds")? {
            self.cache.compaction_interval_secs = v;
        }
        if let Some(v) = parse_var(lookup, "SIMILARITY_THRESHOLD", "a number in [0, 1]")? {
            self.cache.similarity_threshold = v;
        }

        if let Some(v) = parse_var(lookup, "COMPLEXITY_SHORT_MAX_CHARS", "an unsigned integer")? {
            self.routing.short_max_chars = v;
        }
        if let Some(v) = parse_var(lookup, "COMPLEXITY_MEDIUM_MAX_CHARS", "an unsigned integer")? {
            self.routing.medium_max_chars = v;
        }

        if let Some(v) = parse_var(lookup, "SEARCH_TIMEOUT_MS", "milliseconds")? {
            self.search.timeout_ms = v;
        }

        if let Some(v) = parse_var(lookup, "RATE_LIMIT_REQUESTS", "an unsigned integer")? {
            self.security.rate_limit_requests = v;
        }
        if let Some(v) = parse_var(lookup, "RATE_LIMIT_PERIOD", "seconds")? {
            self.security.rate_limit_period_secs = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let g = &self.generation;
        if !(0.0..=2.0).contains(&g.temperature) {
            return Err(out_of_range("generation.temperature", "temperature must be within [0, 2]"));
        }
        if !(0.0..=1.0).contains(&g.top_p) {
            return Err(out_of_range("generation.top_p", "top_p must be within [0, 1]"));
        }
        if g.max_tokens == 0 {
            return Err(out_of_range("generation.max_tokens", "max_tokens must be positive"));
        }
        if g.timeout_secs == 0 {
            return Err(out_of_range("generation.timeout_secs", "generation timeout must be positive"));
        }

        let c = &self.cache;
        if !(0.0..=1.0).contains(&c.similarity_threshold) {
            return Err(out_of_range(
                "cache.similarity_threshold",
                "similarity threshold must be within [0, 1]",
            ));
        }
        for (field, value) in [
            ("cache.memory_entries", c.memory_entries as u64),
            ("cache.memory_shards", c.memory_shards as u64),
            ("cache.sqlite_max_size_gb", c.sqlite_max_size_gb),
            ("cache.sqlite_ttl_days", c.sqlite_ttl_days),
            ("cache.redis_timeout_ms", c.redis_timeout_ms),
            ("cache.cold_timeout_ms", c.cold_timeout_ms),
            ("cache.compaction_interval_secs", c.compaction_interval_secs),
        ] {
            if value == 0 {
                return Err(out_of_range(field, format!("{} must be positive", field)));
            }
        }

        let r = &self.routing;
        if r.short_max_chars >= r.medium_max_chars {
            return Err(out_of_range(
                "routing.short_max_chars",
                format!(
                    "short threshold ({}) must be below medium threshold ({})",
                    r.short_max_chars, r.medium_max_chars
                ),
            ));
        }

        if self.local.model.trim().is_empty() {
            return Err(out_of_range("local.model", "local model must not be empty"));
        }
        for (field, raw) in [
            ("local.base_url", &self.local.base_url),
            ("remote.base_url", &self.remote.base_url),
        ] {
            url::Url::parse(raw)
                .map_err(|e| out_of_range(field, format!("invalid URL {:?}: {}", raw, e)))?;
        }
        if self.remote.is_configured() && self.remote.default_model.trim().is_empty() {
            return Err(out_of_range(
                "remote.default_model",
                "remote default model must not be empty",
            ));
        }
        if self.security.rate_limit_requests > 0 && self.security.rate_limit_period_secs == 0 {
            return Err(out_of_range(
                "security.rate_limit_period_secs",
                "rate limit period must be positive",
            ));
        }
        if self.security.max_prompt_chars == 0 {
            return Err(out_of_range(
                "security.max_prompt_chars",
                "max prompt size must be positive",
            ));
        }
        Ok(())
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.timeout_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search.timeout_ms)
    }

    /// HTTP settings for the local backend; its timeout covers a full generation.
    pub fn local_http(&self) -> HttpSettings {
        HttpSettings::default().with_timeout(self.generation_timeout())
    }

    pub fn remote_http(&self) -> HttpSettings {
        HttpSettings::default().with_timeout(Duration::from_secs(self.remote.timeout_secs.max(1)))
    }

    pub fn remote_quota(&self) -> RateLimiterConfig {
        RateLimiterConfig::per_window(self.remote.requests_per_minute, Duration::from_secs(60))
    }
}
