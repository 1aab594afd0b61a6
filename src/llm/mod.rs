pub mod openai;

pub use openai::{OpenAiClient, OpenAiConfig};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("reasoning service api key not configured")]
    MissingApiKey,
    #[error("reasoning service timed out")]
    Timeout,
    #[error("reasoning service request failed: {0}")]
    Request(String),
    #[error("reasoning service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Which model family a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Vision,
    Refine,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub tier: ModelTier,
    pub system: String,
    pub user_text: String,
    /// Data URL or remote URL attached after the text.
    pub image_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl ChatRequest {
    pub fn text(tier: ModelTier, system: impl Into<String>, user_text: impl Into<String>) -> Self {
        Self {
            tier,
            system: system.into(),
            user_text: user_text.into(),
            image_url: None,
            max_tokens: 500,
            temperature: None,
            timeout: crate::http::REFINE_TIMEOUT,
        }
    }

    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A chat-style reasoning service returning free text.
#[async_trait]
pub trait Reasoner: Send + Sync {
    fn is_configured(&self) -> bool;

    fn model_label(&self, tier: ModelTier) -> String;

    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError>;
}
