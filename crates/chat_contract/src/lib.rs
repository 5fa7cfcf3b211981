//! Provider-neutral contract shared by the chat session and its collaborators.
//!
//! This crate defines the conversation data model (turns, parts, streamed
//! response chunks, generation config) and the seams the session calls out
//! through: the streaming [`ContentGenerator`], the [`HookSystem`], the
//! [`RecordingSink`] transcript channel and the [`ModelResolver`]. It carries
//! no transport, retry or UI logic.

mod content;
mod error;
mod hooks;
mod request;
mod response;
mod services;

pub use content::{Blob, Content, FileData, FunctionCall, FunctionResponse, Part, Role};
pub use error::ApiError;
pub use hooks::{
    AfterModelOutcome, BeforeModelInput, BeforeModelOutcome, HookSystem, ToolSelectionOutcome,
};
pub use request::{
    FunctionCallingConfig, FunctionCallingMode, FunctionDeclaration, GenerateContentConfig,
    GenerateContentRequest, ThinkingConfig, Tool, ToolConfig,
};
pub use response::{Candidate, FinishReason, GenerateContentResponse, UsageMetadata};
pub use services::{
    CancelSignal, CompletedToolCall, ContentGenerator, MessageKind, MessageRecord,
    ModelConfigKey, ModelResolver, RecordingError, RecordingSink, ResolvedModel, ResponseStream,
    ThoughtSummary, ToolCallStatus,
};
