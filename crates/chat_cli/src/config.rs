use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chat_core::{AuthType, ChatSettings, RetrySettings};
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_PATH_ENV_VAR: &str = "CHAT_CLI_CONFIG_PATH";
pub const API_KEY_ENV_VAR: &str = "CHAT_CLI_API_KEY";
pub const PROVIDER_ENV_VAR: &str = "CHAT_CLI_PROVIDER";

pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_FALLBACK_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which [`chat_core::chat_contract::ContentGenerator`] backs the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Mock,
    Api,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Api => "api",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub initial_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

/// JSON config file contract. Unknown fields are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub fallback_model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub timeout_sec: Option<u64>,
    #[serde(default)]
    pub auth_type: Option<AuthType>,
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub transcript_dir: Option<PathBuf>,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays environment values. `lookup` is `std::env::var` in production.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(api_key) = non_empty(API_KEY_ENV_VAR) {
            self.api_key = Some(api_key);
        }
        if let Some(provider) = non_empty(PROVIDER_ENV_VAR) {
            self.provider = Some(parse_provider(&provider)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.as_deref().is_some_and(|model| model.trim().is_empty()) {
            return Err(ConfigError::Invalid("`model` must not be empty".to_string()));
        }
        if self.timeout_sec == Some(0) {
            return Err(ConfigError::Invalid(
                "`timeout_sec` must be > 0 when provided".to_string(),
            ));
        }
        if self.retry.max_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "`retry.max_attempts` must be > 0 when provided".to_string(),
            ));
        }
        Ok(())
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider.unwrap_or_default()
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn fallback_model(&self) -> &str {
        self.fallback_model
            .as_deref()
            .unwrap_or(DEFAULT_FALLBACK_MODEL)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_sec.map(Duration::from_secs)
    }

    /// API keys authenticate the real transport; the mock stands in for an
    /// interactive login so fallback prompts can be exercised locally.
    pub fn auth_type(&self) -> AuthType {
        self.auth_type.unwrap_or(match self.provider() {
            ProviderKind::Mock => AuthType::OAuth,
            ProviderKind::Api => AuthType::ApiKey,
        })
    }

    pub fn settings(&self) -> ChatSettings {
        let defaults = RetrySettings::default();
        let retry = RetrySettings::new(
            self.retry.max_attempts.unwrap_or(defaults.max_attempts),
            self.retry
                .initial_delay_ms
                .map_or(defaults.initial_delay, Duration::from_millis),
            self.retry
                .max_delay_ms
                .map_or(defaults.max_delay, Duration::from_millis),
        );

        let settings = ChatSettings::default()
            .with_retry(retry)
            .with_auth_type(self.auth_type());
        match self.system_instruction.as_deref() {
            Some(instruction) if !instruction.trim().is_empty() => {
                settings.with_system_instruction(instruction)
            }
            _ => settings,
        }
    }
}

pub fn parse_provider(value: &str) -> Result<ProviderKind, ConfigError> {
    match value.trim() {
        "mock" => Ok(ProviderKind::Mock),
        "api" => Ok(ProviderKind::Api),
        unknown => Err(ConfigError::Invalid(format!(
            "unsupported provider '{unknown}'. Available providers: mock, api"
        ))),
    }
}
