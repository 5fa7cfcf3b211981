use std::error::Error as StdError;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::content::Part;
use crate::error::ApiError;
use crate::request::{GenerateContentConfig, GenerateContentRequest};
use crate::response::{GenerateContentResponse, UsageMetadata};

/// Cooperative cancellation shared by every network-touching call.
pub type CancelSignal = CancellationToken;

/// Chunks of one streamed model response, in server order.
pub type ResponseStream = BoxStream<'static, Result<GenerateContentResponse, ApiError>>;

/// Transport that opens a streaming model call.
#[async_trait]
pub trait ContentGenerator: Send + Sync + 'static {
    /// Opens the stream. Errors returned here happen before any chunk arrived;
    /// errors yielded by the stream happen mid-response.
    async fn generate_content_stream(
        &self,
        request: GenerateContentRequest,
        prompt_id: &str,
        cancel: CancelSignal,
    ) -> Result<ResponseStream, ApiError>;
}

/// Logical model selector handed to a [`ModelResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelConfigKey {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_scope: Option<String>,
    #[serde(default)]
    pub is_chat_model: bool,
}

impl ModelConfigKey {
    #[must_use]
    pub fn chat(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            override_scope: None,
            is_chat_model: true,
        }
    }

    #[must_use]
    pub fn utility(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            override_scope: None,
            is_chat_model: false,
        }
    }

    #[must_use]
    pub fn with_override_scope(mut self, scope: impl Into<String>) -> Self {
        self.override_scope = Some(scope.into());
        self
    }
}

/// Concrete model id plus generation settings for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    pub model: String,
    pub config: GenerateContentConfig,
}

/// Maps logical model keys to concrete models. Resolution may change between
/// attempts of the same turn once a fallback model is activated.
pub trait ModelResolver: Send + Sync {
    fn resolve(&self, key: &ModelConfigKey) -> ResolvedModel;

    /// Process-wide override applied to chat models, if any.
    fn active_model(&self) -> Option<String>;

    fn set_active_model(&self, model: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub model: String,
    pub kind: MessageKind,
    pub content: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThoughtSummary {
    pub subject: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Success,
    Error,
    Cancelled,
}

/// A tool invocation the scheduler finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
    pub result: Value,
    pub status: ToolCallStatus,
}

pub type RecordingError = Box<dyn StdError + Send + Sync>;

/// Fire-and-forget transcript side channel. Callers log failures and move on.
pub trait RecordingSink: Send + Sync {
    fn record_message(&self, record: MessageRecord) -> Result<(), RecordingError>;

    fn record_message_tokens(&self, usage: &UsageMetadata) -> Result<(), RecordingError>;

    fn record_thought(&self, thought: ThoughtSummary) -> Result<(), RecordingError>;

    fn record_tool_calls(
        &self,
        model: &str,
        calls: &[CompletedToolCall],
    ) -> Result<(), RecordingError>;
}
