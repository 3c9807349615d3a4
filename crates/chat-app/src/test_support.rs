use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use quill_llm::{
    ApiError, ApiResult, CompletionApi, CompletionChoice, CompletionMessage, CompletionRequest,
    CompletionResponse, ModelInfo, Role,
};

/// Scripted stand-in for the remote completion service. Completion
/// responses are consumed from a queue; every request is recorded.
#[derive(Default)]
pub struct FakeCompletionApi {
    completions: Mutex<VecDeque<ApiResult<CompletionResponse>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    models: Mutex<Vec<ModelInfo>>,
    list_failure: Mutex<Option<ApiError>>,
    list_calls: AtomicUsize,
}

impl FakeCompletionApi {
    pub fn queue_completion(&self, result: ApiResult<CompletionResponse>) {
        self.completions
            .lock()
            .expect("completions lock")
            .push_back(result);
    }

    pub fn set_models(&self, models: Vec<ModelInfo>) {
        *self.models.lock().expect("models lock") = models;
    }

    pub fn fail_next_listing(&self, error: ApiError) {
        *self.list_failure.lock().expect("list failure lock") = Some(error);
    }

    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionApi for FakeCompletionApi {
    async fn list_models(&self, _api_key: &str, _base_url: &str) -> ApiResult<Vec<ModelInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.list_failure.lock().expect("list failure lock").take() {
            return Err(error);
        }
        Ok(self.models.lock().expect("models lock").clone())
    }

    async fn create_completion(
        &self,
        _api_key: &str,
        request: CompletionRequest,
        _base_url: &str,
    ) -> ApiResult<CompletionResponse> {
        self.requests.lock().expect("requests lock").push(request);
        self.completions
            .lock()
            .expect("completions lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(ApiError::EmptyChoices {
                    stage: "fake-completion-exhausted",
                })
            })
    }
}

pub fn assistant_reply(model: &str, content: &str) -> CompletionResponse {
    CompletionResponse {
        model: model.to_string(),
        choices: vec![CompletionChoice {
            message: CompletionMessage {
                role: Role::Assistant,
                content: content.to_string(),
            },
        }],
    }
}

pub fn completion_failure(status: u16, body: &str) -> ApiError {
    ApiError::CompletionStatus {
        stage: "completion-http-status",
        status,
        body: body.to_string(),
    }
}
