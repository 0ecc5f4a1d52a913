//! Generation client module
//!
//! The planner, worker, reviewer, coordinator and classifier roles all talk
//! to the generation service through [`GenerationClient`].

use std::sync::Arc;

use tracing::debug;

pub mod client;
mod error;
mod openai;

pub use client::{GenRole, GenerationClient, OfflineClient, mock};
pub use error::LlmError;
pub use openai::OpenAIClient;

use crate::config::Config;

/// Create a generation client for the configured provider
///
/// Fails fast when credentials are missing; there is no mock fallback.
pub fn create_client(config: &Config) -> Result<Arc<dyn GenerationClient>, LlmError> {
    debug!(provider = %config.llm.provider, model = %config.llm.model, "create_client: called");
    if std::env::var(&config.llm.api_key_env).is_err() {
        debug!(env = %config.llm.api_key_env, "create_client: api key not set");
        return Err(LlmError::MissingCredentials(config.llm.api_key_env.clone()));
    }
    match config.llm.provider.as_str() {
        "openai" => {
            debug!("create_client: creating OpenAI client");
            Ok(Arc::new(OpenAIClient::from_config(config)?))
        }
        other => {
            debug!(provider = %other, "create_client: unknown provider");
            Err(LlmError::UnsupportedProvider(other.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_create_client_requires_key() {
        let mut config = Config::default();
        config.llm.api_key_env = "DRAFTLOOP_MISSING_KEY".to_string();
        // SAFETY: serialized with the other env-mutating tests
        unsafe { std::env::remove_var("DRAFTLOOP_MISSING_KEY") };

        let err = create_client(&config).err().unwrap();
        assert!(matches!(err, LlmError::MissingCredentials(_)));
    }

    #[test]
    #[serial]
    fn test_create_client_unknown_provider() {
        let mut config = Config::default();
        config.llm.provider = "carrier-pigeon".to_string();
        config.llm.api_key_env = "DRAFTLOOP_PROVIDER_KEY".to_string();
        unsafe { std::env::set_var("DRAFTLOOP_PROVIDER_KEY", "x") };

        let err = create_client(&config).err().unwrap();
        assert!(matches!(err, LlmError::UnsupportedProvider(_)));
        unsafe { std::env::remove_var("DRAFTLOOP_PROVIDER_KEY") };
    }
}
