use std::sync::Arc;

use chat_core::chat_contract::ContentGenerator;
use thiserror::Error;

use crate::config::{CliConfig, ProviderKind};

mod api;
mod mock;

pub use api::api_generator;
pub use mock::mock_generator;

#[derive(Debug, Error)]
pub enum ProviderInitError {
    #[error("the api provider needs an API key (set CHAT_CLI_API_KEY or `api_key`)")]
    MissingApiKey,
    #[error("failed to initialize the api provider: {0}")]
    Transport(#[from] model_api::ModelApiError),
}

pub fn generator_for(config: &CliConfig) -> Result<Arc<dyn ContentGenerator>, ProviderInitError> {
    match config.provider() {
        ProviderKind::Mock => Ok(Arc::new(mock_generator())),
        ProviderKind::Api => Ok(Arc::new(api_generator(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_needs_no_credentials() {
        assert!(generator_for(&CliConfig::default()).is_ok());
    }

    #[test]
    fn api_provider_requires_a_key() {
        let config = CliConfig {
            provider: Some(ProviderKind::Api),
            ..CliConfig::default()
        };

        let error = match generator_for(&config) {
            Ok(_) => panic!("missing key should fail"),
            Err(error) => error,
        };
        assert!(matches!(error, ProviderInitError::MissingApiKey));
    }
}
