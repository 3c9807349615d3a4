mod api;
mod model;
mod openrouter;

pub use api::{
    ApiError, ApiResult, CompletionApi, CompletionChoice, CompletionMessage, CompletionRequest,
    CompletionResponse, ContentPart, DEFAULT_BASE_URL, ImageUrl, OutboundContent, OutboundMessage,
    Role,
};
pub use model::{ModelInfo, ModelPricing};
pub use openrouter::{DEFAULT_CLIENT_ORIGIN, DEFAULT_CLIENT_TITLE, OpenRouterClient};
