use async_trait::async_trait;

use crate::content::Content;
use crate::request::{GenerateContentConfig, GenerateContentRequest, Tool, ToolConfig};
use crate::response::GenerateContentResponse;

/// What a hook sees before a model call is issued.
#[derive(Debug, Clone, PartialEq)]
pub struct BeforeModelInput {
    pub model: String,
    pub config: GenerateContentConfig,
    pub contents: Vec<Content>,
}

/// Result of the before-model hook. The default value changes nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeforeModelOutcome {
    /// End the turn without calling the model.
    pub stopped: bool,
    /// Veto the call; `synthetic_response` may stand in for the model.
    pub blocked: bool,
    pub reason: Option<String>,
    pub synthetic_response: Option<GenerateContentResponse>,
    pub modified_config: Option<GenerateContentConfig>,
    pub modified_contents: Option<Vec<Content>>,
}

/// Result of the before-tool-selection hook.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolSelectionOutcome {
    pub tools: Option<Vec<Tool>>,
    pub tool_config: Option<ToolConfig>,
}

/// Result of the after-model hook, fired once per streamed chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AfterModelOutcome {
    pub stopped: bool,
    pub blocked: bool,
    pub reason: Option<String>,
    /// Replacement for the chunk that was observed.
    pub response: Option<GenerateContentResponse>,
}

/// Call/response contract of the external hook engine.
///
/// Every method defaults to a no-op so implementors only override the events
/// they care about.
#[async_trait]
pub trait HookSystem: Send + Sync {
    async fn fire_before_model(&self, _input: &BeforeModelInput) -> BeforeModelOutcome {
        BeforeModelOutcome::default()
    }

    async fn fire_before_tool_selection(&self, _input: &BeforeModelInput) -> ToolSelectionOutcome {
        ToolSelectionOutcome::default()
    }

    async fn fire_after_model(
        &self,
        _request: &GenerateContentRequest,
        _chunk: &GenerateContentResponse,
    ) -> AfterModelOutcome {
        AfterModelOutcome::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SilentHooks;

    impl HookSystem for SilentHooks {}

    fn input() -> BeforeModelInput {
        BeforeModelInput {
            model: "model-a".to_string(),
            config: GenerateContentConfig::default(),
            contents: vec![Content::user_text("hi")],
        }
    }

    #[tokio::test]
    async fn default_hooks_change_nothing() {
        let hooks = SilentHooks;

        assert_eq!(
            hooks.fire_before_model(&input()).await,
            BeforeModelOutcome::default()
        );
        assert_eq!(
            hooks.fire_before_tool_selection(&input()).await,
            ToolSelectionOutcome::default()
        );

        let request = GenerateContentRequest {
            model: "model-a".to_string(),
            contents: Vec::new(),
            config: GenerateContentConfig::default(),
        };
        let outcome = hooks
            .fire_after_model(&request, &GenerateContentResponse::default())
            .await;
        assert!(!outcome.stopped && !outcome.blocked);
        assert!(outcome.response.is_none());
    }
}
