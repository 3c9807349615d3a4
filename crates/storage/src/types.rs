use super::ids::{AttachmentId, ChatId, MessageId};

/// Title assigned when a chat is created with an empty title.
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Model assigned when a chat is created without one.
pub const DEFAULT_CHAT_MODEL: &str = "openai/gpt-3.5-turbo";

/// Storage-local message role, intentionally decoupled from wire-layer role enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Attachment payload kind. Only inline images are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    Image,
}

/// Generation configuration carried by each chat.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            top_p: None,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRecord {
    pub id: ChatId,
    pub title: String,
    pub model_config: ModelConfig,
    pub created_at_unix_ms: i64,
    pub updated_at_unix_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChat {
    pub title: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatPatch {
    pub title: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub role: MessageRole,
    pub content: String,
    pub timestamp_unix_ms: i64,
    pub attachment_ids: Vec<AttachmentId>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub role: MessageRole,
    pub content: String,
    pub attachment_ids: Vec<AttachmentId>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRecord {
    pub id: AttachmentId,
    pub kind: AttachmentKind,
    // Inline base64 data URL; attachments are small enough to live in the row.
    pub data: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub kind: AttachmentKind,
    pub data: String,
    pub name: Option<String>,
}

impl NewAttachment {
    pub fn image(data: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Image,
            data: data.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// The persisted settings singleton. Theme is kept as raw text here;
/// interpretation belongs to the settings layer above.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SettingsRecord {
    pub api_key: String,
    pub base_url: Option<String>,
    pub theme: Option<String>,
}

/// One cached catalog entry, stored verbatim from the remote model list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModelRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub context_length: Option<u32>,
    pub pricing_prompt: Option<String>,
    pub pricing_completion: Option<String>,
}
