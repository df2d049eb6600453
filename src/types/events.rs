//! Streaming delivery events.

use crate::cache::TierKind;
use crate::error::BackendId;
use serde::{Deserialize, Serialize};

/// Incremental event for a streamed response.
///
/// A stream is finite: zero or more `Delta`s followed by exactly one `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum StreamEvent {
    /// Partial content.
    #[serde(rename = "delta")]
    Delta { content: String },

    /// Terminal success event with delivery metadata.
    #[serde(rename = "done")]
    Done {
        cache_hit: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_tier: Option<TierKind>,
        backend: BackendId,
        model: String,
    },

    /// Terminal failure. Partial content already delivered is not cached.
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Delta { .. })
    }
}
