use chat_contract::{Content, GenerateContentRequest, ThinkingConfig, Tool, ToolConfig};
use serde::{Deserialize, Serialize};

/// JSON body of a `streamGenerateContent` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentBody {
    pub contents: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

/// Sampling knobs nested under `generationConfig` on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

impl GenerationConfig {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl GenerateContentBody {
    /// Splits the flat request config into the wire layout. The model id
    /// travels in the URL, not the body.
    pub fn from_request(request: &GenerateContentRequest) -> Self {
        let config = &request.config;
        let generation = GenerationConfig {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_output_tokens: config.max_output_tokens,
            thinking_config: config.thinking_config.clone(),
        };

        Self {
            contents: request.contents.clone(),
            system_instruction: config.system_instruction.clone(),
            tools: config.tools.clone(),
            tool_config: config.tool_config.clone(),
            generation_config: (!generation.is_empty()).then_some(generation),
        }
    }
}
