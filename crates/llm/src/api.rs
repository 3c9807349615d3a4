use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::model::ModelInfo;

/// Base URL used when the caller has not configured one.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Wire-layer message role, intentionally decoupled from storage-layer role enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One element of a multimodal message body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

/// Message content on the wire: plain turns stay plain strings, multimodal
/// turns become a part list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub role: Role,
    pub content: OutboundContent,
}

impl OutboundMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: OutboundContent::Text(content.into()),
        }
    }

    pub fn multimodal(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: OutboundContent::Parts(parts),
        }
    }
}

/// Full chat-completion payload. Optional generation parameters are
/// omitted from the body entirely when unset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<OutboundMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<OutboundMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stream: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompletionMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
}

/// Decoded completion body. `model` identifies which model actually
/// answered, which can differ from the one requested.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompletionResponse {
    pub model: String,
    pub choices: Vec<CompletionChoice>,
}

impl CompletionResponse {
    pub fn primary_text(&self) -> Option<&str> {
        self.choices
            .first()
            .map(|choice| choice.message.content.as_str())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("http request failed on `{stage}`: {source}"))]
    HttpTransport {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("Failed to fetch models: {status_text}"))]
    ModelFetchStatus {
        stage: &'static str,
        status: u16,
        status_text: String,
    },
    #[snafu(display("API Error: {status} - {body}"))]
    CompletionStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode response payload on `{stage}`: {source}"))]
    DecodeResponse {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("completion response contained no choices"))]
    EmptyChoices { stage: &'static str },
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Outbound HTTP boundary to the remote completion service. Implemented
/// over reqwest in production and by scripted fakes in tests.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    /// Lists the models available to this credential.
    async fn list_models(&self, api_key: &str, base_url: &str) -> ApiResult<Vec<ModelInfo>>;

    /// Submits one non-streaming chat completion and decodes the reply.
    async fn create_completion(
        &self,
        api_key: &str,
        request: CompletionRequest,
        base_url: &str,
    ) -> ApiResult<CompletionResponse>;
}
