use crate::cache::TierKind;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "cache.memory_entries", "REDIS_TTL_SECONDS")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "api_validation")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies which generation backend an error or decision refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    Local,
    Remote,
}

impl BackendId {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::Local => "local",
            BackendId::Remote => "remote",
        }
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the orchestration engine.
///
/// Cache-tier and enrichment failures are recovered where they happen; only
/// input, generation and admission errors reach callers of the orchestrator.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid input: {message}{}", format_context(.context))]
    InvalidInput {
        message: String,
        context: ErrorContext,
    },

    #[error("Backend unavailable ({backend}): {message}")]
    BackendUnavailable {
        backend: BackendId,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Cache tier unavailable ({tier}): {message}")]
    CacheTierUnavailable { tier: TierKind, message: String },

    #[error("Timed out after {}ms: {operation}", .after.as_millis())]
    Timeout { operation: String, after: Duration },

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Rate limited{}", .retry_after.map(|d| format!(" (retry after {}ms)", d.as_millis())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[cfg(feature = "warm-redis")]
    #[error("Warm store error: {0}")]
    WarmStore(#[from] redis::RedisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn invalid_input_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::InvalidInput {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn backend_unavailable(backend: BackendId, msg: impl Into<String>) -> Self {
        Error::BackendUnavailable {
            backend,
            message: msg.into(),
            retry_after: None,
        }
    }

    pub fn tier_unavailable(tier: TierKind, msg: impl Into<String>) -> Self {
        Error::CacheTierUnavailable {
            tier,
            message: msg.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::InvalidInput { context, .. } | Error::Configuration { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    /// Errors that route the request to the next backend instead of failing it.
    pub fn is_fallbackable(&self) -> bool {
        matches!(self, Error::BackendUnavailable { .. } | Error::Timeout { .. })
    }

    /// HTTP status the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidInput { .. } => 400,
            Error::RateLimited { .. } => 429,
            Error::BackendUnavailable { .. } | Error::CacheTierUnavailable { .. } => 503,
            Error::Timeout { .. } => 504,
            _ => 500,
        }
    }

    /// Stable error code string, independent of the message text.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput { .. } => "E1001",
            Error::RateLimited { .. } => "E2001",
            Error::GenerationFailed(_) => "E3001",
            Error::BackendUnavailable { .. } => "E3002",
            Error::Timeout { .. } => "E3003",
            Error::CacheTierUnavailable { .. } => "E4001",
            _ => "E9999",
        }
    }

    /// Copy an error so one single-flight failure can be handed to every waiter.
    ///
    /// Wrapped library errors are not `Clone`; they collapse into their closest
    /// domain category with the original message preserved.
    pub fn replicate(&self) -> Self {
        match self {
            Error::InvalidInput { message, context } => Error::InvalidInput {
                message: message.clone(),
                context: context.clone(),
            },
            Error::BackendUnavailable {
                backend,
                message,
                retry_after,
            } => Error::BackendUnavailable {
                backend: *backend,
                message: message.clone(),
                retry_after: *retry_after,
            },
            Error::CacheTierUnavailable { tier, message } => Error::CacheTierUnavailable {
                tier: *tier,
                message: message.clone(),
            },
            Error::Timeout { operation, after } => Error::Timeout {
                operation: operation.clone(),
                after: *after,
            },
            Error::GenerationFailed(m) => Error::GenerationFailed(m.clone()),
            Error::RateLimited { retry_after } => Error::RateLimited {
                retry_after: *retry_after,
            },
            Error::Configuration { message, context } => Error::Configuration {
                message: message.clone(),
                context: context.clone(),
            },
            other => Error::GenerationFailed(other.to_string()),
        }
    }
}
