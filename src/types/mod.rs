//! 类型系统模块：定义编排请求、缓存载荷与流式事件的核心数据类型。
//!
//! # Types Module
//!
//! Core request/response types shared by the cache, routing and orchestration layers.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`GenerationRequest`] | One logical generation request (prompt, model, parameters, scope) |
//! | [`GenerationParams`] | Sampling parameters that take part in cache-key derivation |
//! | [`RequestKind`] | Chat, completion or one of the domain-specific prompt families |
//! | [`GenerationResponse`] | Assembled generation output; this is what the cache stores |
//! | [`OrchestratedResponse`] | Response plus cache/route metadata returned to callers |
//! | [`StreamEvent`] | Incremental delivery event for streamed responses |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_orchestrator::types::{GenerationRequest, RequestKind};
//!
//! let req = GenerationRequest::chat("What is 2+2?")
//!     .with_model("llama3.2")
//!     .with_temperature(0.2);
//! assert_eq!(req.kind, RequestKind::Chat);
//! ```

pub mod events;
pub mod request;
pub mod response;

pub use events::StreamEvent;
pub use request::{GenerationParams, GenerationRequest, RequestKind};
pub use response::{GenerationResponse, OrchestratedResponse};
