use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chat_contract::{
    Content, GenerateContentConfig, ModelConfigKey, ModelResolver, ResolvedModel, Tool,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::retry::{DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};

pub const DEFAULT_CONTENT_RETRY_ATTEMPTS: u32 = 2;
pub const DEFAULT_CONTENT_RETRY_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_PREVIEW_MARKER: &str = "preview";

/// How the session authenticates. Model fallback is only offered to
/// interactive OAuth logins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[serde(rename = "oauth")]
    OAuth,
    ApiKey,
    VertexAi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetrySettings {
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY)
    }
}

/// Per-session behavior knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    /// Budget for failures while opening a response stream.
    pub retry: RetrySettings,
    /// Budget for streams that completed but were rejected.
    pub content_retry: RetrySettings,
    pub auth_type: Option<AuthType>,
    pub system_instruction: Option<String>,
    pub tools: Vec<Tool>,
    /// Substring identifying preview-tier model ids.
    pub preview_marker: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            content_retry: RetrySettings::new(
                DEFAULT_CONTENT_RETRY_ATTEMPTS,
                DEFAULT_CONTENT_RETRY_DELAY,
                DEFAULT_CONTENT_RETRY_DELAY,
            ),
            auth_type: None,
            system_instruction: None,
            tools: Vec::new(),
            preview_marker: DEFAULT_PREVIEW_MARKER.to_string(),
        }
    }
}

impl ChatSettings {
    #[must_use]
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_content_retry(mut self, content_retry: RetrySettings) -> Self {
        self.content_retry = content_retry;
        self
    }

    #[must_use]
    pub fn with_auth_type(mut self, auth_type: AuthType) -> Self {
        self.auth_type = Some(auth_type);
        self
    }

    #[must_use]
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn is_preview_model(&self, model: &str) -> bool {
        !self.preview_marker.is_empty() && model.contains(&self.preview_marker)
    }

    /// Session defaults layered under whatever the resolver returned. Tools
    /// are tracked by the session itself.
    pub(crate) fn base_config(&self) -> GenerateContentConfig {
        GenerateContentConfig {
            system_instruction: self
                .system_instruction
                .as_ref()
                .map(|instruction| Content::user_text(instruction.clone())),
            ..GenerateContentConfig::default()
        }
    }
}

/// A named model alias.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAlias {
    pub model: String,
    pub config: GenerateContentConfig,
}

/// Resolves logical model keys to concrete models and generation settings.
///
/// Holds the process-wide active model: once a fallback is activated every
/// later chat-model resolution returns it, including attempts of a turn that
/// is already in flight.
#[derive(Debug, Default)]
pub struct ModelConfigService {
    aliases: HashMap<String, ModelAlias>,
    scope_overrides: HashMap<String, GenerateContentConfig>,
    active_model: RwLock<Option<String>>,
}

impl ModelConfigService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_alias(
        mut self,
        alias: impl Into<String>,
        model: impl Into<String>,
        config: GenerateContentConfig,
    ) -> Self {
        self.aliases.insert(
            alias.into(),
            ModelAlias {
                model: model.into(),
                config,
            },
        );
        self
    }

    #[must_use]
    pub fn with_scope_override(
        mut self,
        scope: impl Into<String>,
        config: GenerateContentConfig,
    ) -> Self {
        self.scope_overrides.insert(scope.into(), config);
        self
    }

    pub fn clear_active_model(&self) {
        *self
            .active_model
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl ModelResolver for ModelConfigService {
    fn resolve(&self, key: &ModelConfigKey) -> ResolvedModel {
        let alias = self.aliases.get(&key.model);
        let mut model = alias.map_or_else(|| key.model.clone(), |alias| alias.model.clone());
        let mut config = alias.map(|alias| alias.config.clone()).unwrap_or_default();

        if key.is_chat_model {
            if let Some(active) = self.active_model() {
                model = active;
            }
        }

        if let Some(scope) = key.override_scope.as_deref() {
            if let Some(scoped) = self.scope_overrides.get(scope) {
                config = config.merged_with(scoped);
            }
        }

        ResolvedModel { model, config }
    }

    fn active_model(&self) -> Option<String> {
        self.active_model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_active_model(&self, model: &str) {
        info!(%model, "activating model override");
        *self
            .active_model
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(model.to_string());
    }
}
