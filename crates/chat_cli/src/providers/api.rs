use model_api::{ModelApiClient, ModelApiConfig};

use crate::config::CliConfig;
use crate::providers::ProviderInitError;

pub fn api_generator(config: &CliConfig) -> Result<ModelApiClient, ProviderInitError> {
    let api_key = config
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or(ProviderInitError::MissingApiKey)?;

    let mut api_config = ModelApiConfig::new(api_key);
    if let Some(base_url) = &config.base_url {
        api_config = api_config.with_base_url(base_url);
    }
    if let Some(api_version) = &config.api_version {
        api_config = api_config.with_api_version(api_version);
    }
    if let Some(timeout) = config.timeout() {
        api_config = api_config.with_connect_timeout(timeout);
    }

    Ok(ModelApiClient::new(api_config)?)
}
