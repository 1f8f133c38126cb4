use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod prompts;

pub use client::OpenAiClient;

use crate::error::ScorerResult;

/// A text-completion service: one prompt in, generated text out.
///
/// Implementations own their transport, credentials and generation
/// parameters. Any `Err` is treated by the scorer as a failed batch.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> ScorerResult<String>;
}

/// Model and sampling parameters sent with each completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_output_tokens: 500,
            temperature: 0.2,
        }
    }
}
