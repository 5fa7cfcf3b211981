//! Transport-only client for the streaming generate-content endpoint.
//!
//! This crate builds requests, opens the SSE stream and decodes frames into
//! [`chat_contract::GenerateContentResponse`] chunks. Each call is a single
//! HTTP attempt: errors are mapped to [`chat_contract::ApiError`] with status,
//! socket code and `Retry-After` preserved so the session layer can classify
//! and retry them.

pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod payload;
pub mod sse;
pub mod url;

pub use client::ModelApiClient;
pub use config::ModelApiConfig;
pub use error::{parse_retry_after, ModelApiError};
pub use payload::{GenerateContentBody, GenerationConfig};
pub use sse::{SseStreamParser, StreamFrame};
pub use url::{stream_endpoint, DEFAULT_API_VERSION, DEFAULT_BASE_URL};
