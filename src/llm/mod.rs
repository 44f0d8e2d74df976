//! LLM integration.
//!
//! The generation service is reached through the `LlmProvider` trait. The only
//! concrete backend is an OpenAI-compatible chat completions client; tests
//! plug in their own providers.

pub mod openai;
pub mod provider;

pub use openai::OpenAiProvider;
pub use provider::*;

use std::sync::Arc;

use crate::config::GenerationConfig;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

impl LlmConfig {
    pub fn from_generation(config: &GenerationConfig, api_key: secrecy::SecretString) -> Self {
        Self {
            api_base: config.api_base.clone(),
            api_key,
            model: config.model.clone(),
        }
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Arc<dyn LlmProvider> {
    tracing::info!("Using OpenAI-compatible API (model: {})", config.model);
    Arc::new(OpenAiProvider::new(
        config.api_base.clone(),
        config.api_key.clone(),
        config.model.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_provider_uses_configured_model() {
        let config = LlmConfig::from_generation(
            &GenerationConfig::default(),
            secrecy::SecretString::from("sk-test"),
        );
        let provider = create_provider(&config);
        assert_eq!(provider.model_name(), "gpt-4-turbo");
    }
}
