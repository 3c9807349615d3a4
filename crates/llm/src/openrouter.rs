use async_trait::async_trait;
use serde::Deserialize;
use snafu::{ResultExt, ensure};

use crate::api::{
    ApiResult, CompletionApi, CompletionRequest, CompletionResponse, CompletionStatusSnafu,
    DecodeResponseSnafu, EmptyChoicesSnafu, HttpTransportSnafu, ModelFetchStatusSnafu,
};
use crate::model::ModelInfo;

/// Origin reported in the `HTTP-Referer` attribution header.
pub const DEFAULT_CLIENT_ORIGIN: &str = "app://quill";

/// Client name reported in the `X-Title` attribution header.
pub const DEFAULT_CLIENT_TITLE: &str = "Quill";

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    data: Vec<ModelInfo>,
}

/// reqwest-backed client for OpenRouter-compatible completion services.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    origin: String,
    title: String,
}

impl Default for OpenRouterClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenRouterClient {
    pub fn new() -> Self {
        Self::with_identity(DEFAULT_CLIENT_ORIGIN, DEFAULT_CLIENT_TITLE)
    }

    /// `origin` and `title` feed the service's attribution headers.
    pub fn with_identity(origin: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            origin: origin.into(),
            title: title.into(),
        }
    }
}

#[async_trait]
impl CompletionApi for OpenRouterClient {
    async fn list_models(&self, api_key: &str, base_url: &str) -> ApiResult<Vec<ModelInfo>> {
        let url = format!("{base_url}/models");
        let response = self
            .http
            .get(&url)
            .bearer_auth(api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .context(HttpTransportSnafu {
                stage: "send-model-request",
            })?;

        let status = response.status();
        if !status.is_success() {
            return ModelFetchStatusSnafu {
                stage: "model-http-status",
                status: status.as_u16(),
                status_text: status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string(),
            }
            .fail();
        }

        let payload: ModelListResponse =
            response.json().await.context(DecodeResponseSnafu {
                stage: "decode-model-response",
            })?;

        tracing::debug!(model_count = payload.data.len(), "fetched model catalog");
        Ok(payload.data)
    }

    async fn create_completion(
        &self,
        api_key: &str,
        request: CompletionRequest,
        base_url: &str,
    ) -> ApiResult<CompletionResponse> {
        let url = format!("{base_url}/chat/completions");
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("HTTP-Referer", &self.origin)
            .header("X-Title", &self.title)
            .json(&request)
            .send()
            .await
            .context(HttpTransportSnafu {
                stage: "send-completion-request",
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.context(HttpTransportSnafu {
                stage: "read-completion-error-body",
            })?;
            return CompletionStatusSnafu {
                stage: "completion-http-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let decoded: CompletionResponse =
            response.json().await.context(DecodeResponseSnafu {
                stage: "decode-completion-response",
            })?;

        ensure!(
            !decoded.choices.is_empty(),
            EmptyChoicesSnafu {
                stage: "completion-choices",
            }
        );

        Ok(decoded)
    }
}
