//! LLM integration.
//!
//! One production backend (OpenAI chat completions over `reqwest`); the
//! pipeline depends only on the [`provider::LlmProvider`] trait so tests can
//! substitute stubs.

pub mod openai;
pub mod provider;

pub use openai::OpenAiProvider;
pub use provider::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};

use std::sync::Arc;

use secrecy::SecretString;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
    /// Override for proxies and tests.
    pub base_url: Option<String>,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Arc<dyn LlmProvider> {
    let mut provider = OpenAiProvider::new(config.api_key.clone(), config.model.clone());
    if let Some(ref base_url) = config.base_url {
        provider = provider.with_base_url(base_url);
    }
    tracing::info!(model = %config.model, "Using OpenAI provider");
    Arc::new(provider)
}
