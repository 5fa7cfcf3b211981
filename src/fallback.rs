use std::sync::Arc;

use async_trait::async_trait;
use chat_contract::{ModelConfigKey, ModelResolver};
use tracing::info;

use crate::config::AuthType;
use crate::error::ChatError;
use crate::retry::QuotaFallback;

/// The user's answer to a persistent quota or missing-model failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackIntent {
    /// Switch to the fallback model for the rest of the process.
    RetryAlways,
    /// Try the current model once more.
    RetryOnce,
    Stop,
    RetryLater,
    Upgrade,
}

/// What the user is asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackRequest {
    pub failed_model: String,
    pub fallback_model: String,
    pub message: String,
    /// True for long-window quota exhaustion, false for a missing model or
    /// an exhausted short-window budget.
    pub terminal: bool,
}

#[async_trait]
pub trait FallbackHandler: Send + Sync {
    async fn handle_fallback(&self, request: FallbackRequest) -> FallbackIntent;
}

/// Offers a model switch to interactive logins when quota runs out.
pub struct ModelFallback {
    resolver: Arc<dyn ModelResolver>,
    handler: Arc<dyn FallbackHandler>,
    chat_model: ModelConfigKey,
    fallback_model: String,
}

impl ModelFallback {
    #[must_use]
    pub fn new(
        resolver: Arc<dyn ModelResolver>,
        handler: Arc<dyn FallbackHandler>,
        chat_model: ModelConfigKey,
        fallback_model: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            handler,
            chat_model,
            fallback_model: fallback_model.into(),
        }
    }

    pub fn fallback_model(&self) -> &str {
        &self.fallback_model
    }
}

#[async_trait]
impl QuotaFallback for ModelFallback {
    async fn on_persistent_quota(
        &self,
        auth_type: Option<AuthType>,
        error: &ChatError,
    ) -> Result<Option<String>, ChatError> {
        if auth_type != Some(AuthType::OAuth) {
            return Ok(None);
        }

        let failed_model = self.resolver.resolve(&self.chat_model).model;
        if failed_model == self.fallback_model {
            info!(model = %failed_model, "already on fallback model");
            return Ok(None);
        }

        let request = FallbackRequest {
            failed_model: failed_model.clone(),
            fallback_model: self.fallback_model.clone(),
            message: error.to_string(),
            terminal: matches!(error, ChatError::TerminalQuota(_)),
        };
        let intent = self.handler.handle_fallback(request).await;
        info!(?intent, failed_model = %failed_model, "fallback negotiation resolved");

        match intent {
            FallbackIntent::RetryAlways => {
                self.resolver.set_active_model(&self.fallback_model);
                Ok(Some(self.fallback_model.clone()))
            }
            FallbackIntent::RetryOnce => Ok(Some(failed_model)),
            FallbackIntent::Stop | FallbackIntent::RetryLater | FallbackIntent::Upgrade => Ok(None),
        }
    }
}
