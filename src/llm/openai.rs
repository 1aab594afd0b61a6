use crate::llm::{ChatRequest, LlmError, ModelTier, Reasoner};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ERROR_MESSAGE_LIMIT: usize = 300;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub vision_model: String,
    pub refine_model: String,
}

impl OpenAiConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            vision_model: std::env::var("OPENAI_VISION_MODEL").unwrap_or_else(|_| "gpt-4o".into()),
            refine_model: std::env::var("OPENAI_REFINE_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".into()),
        }
    }
}

pub struct OpenAiClient {
    http: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(http: Client, config: OpenAiConfig) -> Self {
        Self { http, config }
    }

    fn model(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Vision => &self.config.vision_model,
            ModelTier::Refine => &self.config.refine_model,
        }
    }
}

#[async_trait]
impl Reasoner for OpenAiClient {
    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn model_label(&self, tier: ModelTier) -> String {
        self.model(tier).to_string()
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        let api_key = self.config.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;
        let base = self.config.base_url.trim_end_matches('/');
        let body = chat_body(self.model(request.tier), &request);

        let response = self
            .http
            .post(format!("{base}/chat/completions"))
            .timeout(request.timeout)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Request(err.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                message: upstream_message(&raw),
            });
        }

        let payload: CompletionResponse = response.json().await.map_err(|err| {
            if err.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::InvalidResponse(err.to_string())
            }
        })?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("missing message content".into()))
    }
}

fn chat_body<'a>(model: &'a str, request: &'a ChatRequest) -> CompletionRequest<'a> {
    let user = match &request.image_url {
        Some(url) => UserContent::Parts(vec![
            ContentPart::Text {
                text: request.user_text.as_str(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: url.as_str(),
                    detail: "high",
                },
            },
        ]),
        None => UserContent::Text(request.user_text.as_str()),
    };
    CompletionRequest {
        model,
        messages: vec![
            Message {
                role: "system",
                content: UserContent::Text(request.system.as_str()),
            },
            Message {
                role: "user",
                content: user,
            },
        ],
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    }
}

/// Prefer the structured `error.message`, fall back to the raw body.
fn upstream_message(raw: &str) -> String {
    let message = serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|body| {
            body.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| raw.to_string());
    message.chars().take(ERROR_MESSAGE_LIMIT).collect()
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: UserContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum UserContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
