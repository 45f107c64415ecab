//! Language-model capability
//!
//! Analyzers talk to a [`LanguageModel`] trait object; the concrete provider
//! is a closed set selected at startup from configuration.

mod json;
mod openai;

pub use json::extract_json;
pub use openai::OpenAiCompatible;

use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::PipelineError;

/// One completion request. Transcript and material context are embedded in
/// the prompt text by the caller.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one completion. Failures map to [`PipelineError::Analysis`];
    /// retry policy belongs to the caller.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, PipelineError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Build the configured provider. `openai` and `custom` both speak the
/// OpenAI-compatible chat API; they differ only in defaults.
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>, PipelineError> {
    match config.provider.as_str() {
        "openai" | "custom" => Ok(Arc::new(OpenAiCompatible::new(config))),
        other => Err(PipelineError::Analysis(format!(
            "unknown LLM provider: {other} (expected \"openai\" or \"custom\")"
        ))),
    }
}
