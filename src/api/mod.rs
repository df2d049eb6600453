//! API 门面：为 HTTP 端点提供与传输层无关的请求处理。
//!
//! # API Service
//!
//! Payload semantics of the HTTP surface, without the HTTP server itself.
//!
//! | Endpoint | Method |
//! |----------|--------|
//! | `POST /api/chat` | [`ApiService::chat`], [`ApiService::chat_stream`] |
//! | `POST /api/generate` | [`ApiService::generate`], [`ApiService::generate_stream`] |
//! | `POST /api/embeddings` | [`ApiService::embeddings`] |
//! | `GET /api/tags` | [`ApiService::tags`] |
//! | `GET /api/version` | [`ApiService::version`] |
//! | `POST /api/analyze-logs` | [`ApiService::analyze_logs`] |
//! | `POST /api/generate-script` | [`ApiService::generate_script`] |
//! | `GET /api/stats` | [`ApiService::stats`] |
//! | `GET /api/health`, `GET /api/ready` | [`ApiService::health`], [`ApiService::ready`] |
//!
//! Failures come back as [`ApiError`], which carries the HTTP status and the
//! JSON [`ErrorResponse`] body.

pub mod prompts;
mod service;
pub mod types;

pub use service::{ApiResult, ApiService, NdjsonStream, VERSION};
pub use types::*;
