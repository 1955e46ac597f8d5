//! Generation provider capability and provider selection.
//!
//! Every backend implements [`GenerationProvider`] and normalizes its own
//! response shape, so the answer engine only ever sees `String`s and
//! streams of `String` deltas.

pub mod openai_compat;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use tracing::info;

use tutor_core::config::LlmConfig;
use tutor_core::types::Message;

use crate::error::{ChatError, ProviderError};

pub use openai_compat::{extract_content, OpenAiCompatProvider};

/// Stream of text deltas produced by a provider. Single pass, finite.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Identity of the selected provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub name: String,
    pub model: String,
    pub supports_streaming: bool,
}

/// Per-call generation bounds. Read once from config, passed on every call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 512,
        }
    }
}

impl From<&LlmConfig> for GenerationOptions {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// A text-generation backend.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Generate a complete answer.
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<String, ProviderError>;

    /// Open a stream of answer deltas.
    ///
    /// Only called when `descriptor().supports_streaming` is true.
    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<DeltaStream, ProviderError>;
}

fn credential(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Pick a provider from the configured credentials.
///
/// Priority is fixed: Groq first, then OpenAI. Fails with
/// [`ChatError::Unavailable`] when neither credential is present.
pub fn select_provider(config: &LlmConfig) -> Result<Arc<dyn GenerationProvider>, ChatError> {
    if let Some(key) = credential(&config.groq_api_key) {
        let provider = OpenAiCompatProvider::groq(config, key)?;
        info!(provider = "groq", model = %config.groq_model, "Generation provider selected");
        return Ok(Arc::new(provider));
    }
    if let Some(key) = credential(&config.openai_api_key) {
        let provider = OpenAiCompatProvider::openai(config, key)?;
        info!(provider = "openai", model = %config.openai_model, "Generation provider selected");
        return Ok(Arc::new(provider));
    }
    Err(ChatError::Unavailable(
        "No valid LLM provider found. Set GROQ_API_KEY or OPENAI_API_KEY.".to_string(),
    ))
}
