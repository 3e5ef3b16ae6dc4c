//! Client for the hosted vision model consulted on demand.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use frame_scout_common::config::VisionConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Label written into the remote slot when a call fails.
pub const REMOTE_ERROR_LABEL: &str = "Analysis error";

const SYSTEM_PROMPT: &str = "You are a real-time object detector. Identify what the person is \
holding in their hand. Be very concise - respond with just the object name and nothing else.";
const USER_PROMPT: &str =
    "What object am I holding in my hand? Respond with just the name of the object, nothing else.";

/// Names the object in a JPEG image.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn identify(&self, jpeg: &[u8]) -> Result<String, VisionError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(reqwest::Error),
    #[error("response contained no text")]
    Empty,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completions endpoint with image input.
pub struct OpenAiVisionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiVisionClient {
    pub fn new(config: &VisionConfig, api_key: String) -> Result<Self, VisionError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(VisionError::Client)?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    fn request<'a>(&'a self, jpeg: &[u8]) -> ChatRequest<'a> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(jpeg);
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(SYSTEM_PROMPT.into()),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: USER_PROMPT.into(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: format!("data:image/jpeg;base64,{encoded}"),
                            },
                        },
                    ]),
                },
            ],
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl VisionClient for OpenAiVisionClient {
    async fn identify(&self, jpeg: &[u8]) -> Result<String, VisionError> {
        debug!(bytes = jpeg.len(), model = self.model.as_str(), "calling vision API");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request(jpeg))
            .send()
            .await
            .map_err(VisionError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatResponse = response.json().await.map_err(VisionError::Decode)?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(VisionError::Empty)
    }

    fn name(&self) -> &str {
        &self.model
    }
}
